//! Harvest configuration
//!
//! A [`HarvestConfig`] is built once by the binary (defaults, then `.env` and
//! `HARVEST_*` variables, then command-line flags) and handed to the
//! [`Ingestor`](crate::ingestor::Ingestor). Nothing below the binary reads
//! the environment.

use geoharvest_common::BoundingBox;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IngestError, Result};

// ============================================================================
// Defaults
// ============================================================================

/// Default OGC API Features host; the dataset name is appended as a path.
pub const DEFAULT_OGC_BASE_URL: &str = "https://api.ra.no";

/// Default ArcGIS MapServer.
pub const DEFAULT_ARCGIS_MAPSERVER: &str =
    "https://kart.ra.no/arcgis/rest/services/Distribusjon/Kulturminner20180301/MapServer";

/// Default output directory for JSONL streams.
pub const DEFAULT_OUT_DIR: &str = "./artifacts/sync";

/// Default OGC page size. The OGC upstream truncates large pages, so keep it small.
pub const DEFAULT_OGC_PAGE_SIZE: u32 = 50;

/// Default ArcGIS `resultRecordCount`.
pub const DEFAULT_ARCGIS_PAGE_SIZE: u32 = 2000;

/// Default retry ceiling per request (attempts = retries + 1).
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default backoff base delay in milliseconds; attempt `n` waits `base * 2^n`.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Default number of skipped positions tolerated per target.
pub const DEFAULT_SKIP_CEILING: usize = 50;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default number of targets ingested concurrently.
pub const DEFAULT_JOBS: usize = 1;

/// Default provider attributed in records.
pub const DEFAULT_PROVIDER: &str = "Riksantikvaren";

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = concat!("geoharvest/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Configuration Types
// ============================================================================

/// Main harvest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// OGC API host; `{ogc_base_url}/{dataset}` is the API base of a dataset
    pub ogc_base_url: String,

    /// ArcGIS MapServer base URL (no trailing slash)
    pub arcgis_mapserver: String,

    /// Directory receiving one JSONL stream per target
    pub out_dir: PathBuf,

    /// Optional WGS84 filter applied to every target
    pub bbox: Option<BoundingBox>,

    /// ArcGIS `where` clause; every feature when unset
    pub arcgis_where: Option<String>,

    /// Provider attributed in every record
    pub provider: String,

    /// Number of targets ingested concurrently
    pub jobs: usize,

    /// Show per-target progress spinners
    pub progress: bool,

    pub fetch: FetchConfig,

    pub paging: PagingConfig,
}

/// Request and retry settings for the resilient fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Retries after the first attempt of one request
    pub max_retries: u32,

    /// Backoff base delay in milliseconds
    pub backoff_base_ms: u64,

    /// Whole-request timeout in seconds
    pub timeout_secs: u64,

    pub user_agent: String,
}

/// Pagination settings shared by all targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagingConfig {
    /// Nominal OGC page size (`limit`)
    pub ogc_page_size: u32,

    /// Fixed ArcGIS page size (`resultRecordCount`)
    pub arcgis_page_size: u32,

    /// Records to append per target per run; 0 means unlimited
    pub max_items: u64,

    /// Skipped positions after which a target is aborted
    pub skip_ceiling: usize,
}

impl FetchConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PagingConfig {
    /// The max-items cap, `None` when unlimited
    pub fn max_items(&self) -> Option<u64> {
        (self.max_items > 0).then_some(self.max_items)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            ogc_page_size: DEFAULT_OGC_PAGE_SIZE,
            arcgis_page_size: DEFAULT_ARCGIS_PAGE_SIZE,
            max_items: 0,
            skip_ceiling: DEFAULT_SKIP_CEILING,
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            ogc_base_url: DEFAULT_OGC_BASE_URL.to_string(),
            arcgis_mapserver: DEFAULT_ARCGIS_MAPSERVER.to_string(),
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            bbox: None,
            arcgis_where: None,
            provider: DEFAULT_PROVIDER.to_string(),
            jobs: DEFAULT_JOBS,
            progress: false,
            fetch: FetchConfig::default(),
            paging: PagingConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// Load configuration from `.env`, `HARVEST_*` variables and defaults
    ///
    /// Environment variables:
    /// - `HARVEST_OGC_BASE_URL`, `HARVEST_ARCGIS_MAPSERVER`, `HARVEST_OUT_DIR`
    /// - `HARVEST_BBOX` (`minLon,minLat,maxLon,maxLat`), `HARVEST_ARCGIS_WHERE`
    /// - `HARVEST_PROVIDER`, `HARVEST_JOBS`
    /// - `HARVEST_MAX_RETRIES`, `HARVEST_BACKOFF_BASE_MS`, `HARVEST_TIMEOUT_SECS`
    /// - `HARVEST_OGC_PAGE_SIZE`, `HARVEST_ARCGIS_PAGE_SIZE`, `HARVEST_MAX_ITEMS`,
    ///   `HARVEST_SKIP_CEILING`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(url) = std::env::var("HARVEST_OGC_BASE_URL") {
            config.ogc_base_url = url;
        }
        if let Ok(url) = std::env::var("HARVEST_ARCGIS_MAPSERVER") {
            config.arcgis_mapserver = url;
        }
        if let Ok(dir) = std::env::var("HARVEST_OUT_DIR") {
            config.out_dir = PathBuf::from(dir);
        }
        if let Ok(bbox) = std::env::var("HARVEST_BBOX") {
            config.bbox = Some(bbox.parse()?);
        }
        if let Ok(clause) = std::env::var("HARVEST_ARCGIS_WHERE") {
            config.arcgis_where = Some(clause).filter(|c| !c.trim().is_empty());
        }
        if let Ok(provider) = std::env::var("HARVEST_PROVIDER") {
            config.provider = provider;
        }

        config.jobs = env_number("HARVEST_JOBS", config.jobs)?;
        config.fetch.max_retries = env_number("HARVEST_MAX_RETRIES", config.fetch.max_retries)?;
        config.fetch.backoff_base_ms =
            env_number("HARVEST_BACKOFF_BASE_MS", config.fetch.backoff_base_ms)?;
        config.fetch.timeout_secs = env_number("HARVEST_TIMEOUT_SECS", config.fetch.timeout_secs)?;
        config.paging.ogc_page_size =
            env_number("HARVEST_OGC_PAGE_SIZE", config.paging.ogc_page_size)?;
        config.paging.arcgis_page_size =
            env_number("HARVEST_ARCGIS_PAGE_SIZE", config.paging.arcgis_page_size)?;
        config.paging.max_items = env_number("HARVEST_MAX_ITEMS", config.paging.max_items)?;
        config.paging.skip_ceiling = env_number("HARVEST_SKIP_CEILING", config.paging.skip_ceiling)?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ogc_base_url.trim().is_empty() {
            return Err(IngestError::Config("OGC base URL cannot be empty".into()));
        }
        if self.arcgis_mapserver.trim().is_empty() {
            return Err(IngestError::Config("ArcGIS MapServer URL cannot be empty".into()));
        }
        if self.jobs == 0 {
            return Err(IngestError::Config("jobs must be greater than 0".into()));
        }
        if self.paging.ogc_page_size == 0 || self.paging.arcgis_page_size == 0 {
            return Err(IngestError::Config("page sizes must be greater than 0".into()));
        }
        if self.paging.skip_ceiling == 0 {
            return Err(IngestError::Config("skip ceiling must be greater than 0".into()));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(IngestError::Config("request timeout must be greater than 0".into()));
        }

        Ok(())
    }

    /// API base of one OGC dataset, e.g. `https://api.ra.no/kulturminner`
    pub fn ogc_api_base(&self, dataset: &str) -> String {
        format!("{}/{}", self.ogc_base_url.trim_end_matches('/'), dataset)
    }
}

fn env_number<T: std::str::FromStr>(key: &str, current: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| IngestError::Config(format!("{} must be a number, got '{}'", key, raw))),
        Err(_) => Ok(current),
    }
}
