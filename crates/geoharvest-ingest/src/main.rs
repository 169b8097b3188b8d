//! Geoharvest - resumable harvester for OGC API Features and ArcGIS REST

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use geoharvest_common::logging::{init_logging, LogConfig, LogLevel};
use geoharvest_common::BoundingBox;
use geoharvest_ingest::config::HarvestConfig;
use geoharvest_ingest::ingestor::{Ingestor, TargetReport};
use geoharvest_ingest::source::ogc::list_collections;
use geoharvest_ingest::target::TargetSpec;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "geoharvest")]
#[command(author, version, about = "Harvest geospatial features into JSONL record streams")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest targets into the output directory, resuming earlier runs
    Sync(SyncArgs),

    /// List the collections of an OGC dataset
    Collections {
        /// Dataset name, e.g. "kulturminner"
        #[arg(short, long)]
        dataset: String,

        /// OGC API host
        #[arg(long, env = "HARVEST_OGC_BASE_URL")]
        ogc_base_url: Option<String>,
    },
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// OGC collection as dataset:collection (repeatable)
    #[arg(long = "ogc", value_name = "DATASET:COLLECTION")]
    ogc: Vec<String>,

    /// Every collection of an OGC dataset (repeatable)
    #[arg(long = "ogc-all", value_name = "DATASET")]
    ogc_all: Vec<String>,

    /// ArcGIS MapServer layer id (repeatable)
    #[arg(long = "arcgis-layer", value_name = "ID")]
    arcgis_layer: Vec<u32>,

    /// Targets ingested concurrently
    #[arg(short, long, env = "HARVEST_JOBS")]
    jobs: Option<usize>,

    /// WGS84 filter as minLon,minLat,maxLon,maxLat
    #[arg(long, env = "HARVEST_BBOX", allow_hyphen_values = true)]
    bbox: Option<BoundingBox>,

    /// ArcGIS where clause
    #[arg(long = "where", env = "HARVEST_ARCGIS_WHERE")]
    where_clause: Option<String>,

    /// Nominal OGC page size
    #[arg(long, env = "HARVEST_OGC_PAGE_SIZE")]
    limit: Option<u32>,

    /// ArcGIS page size
    #[arg(long, env = "HARVEST_ARCGIS_PAGE_SIZE")]
    arcgis_page_size: Option<u32>,

    /// Records per target per run, 0 for unlimited
    #[arg(long, env = "HARVEST_MAX_ITEMS")]
    max_items: Option<u64>,

    /// Retries per request
    #[arg(long, env = "HARVEST_MAX_RETRIES")]
    retries: Option<u32>,

    /// Backoff base delay in milliseconds
    #[arg(long, env = "HARVEST_BACKOFF_BASE_MS")]
    backoff_ms: Option<u64>,

    /// Skipped positions after which a target is aborted
    #[arg(long, env = "HARVEST_SKIP_CEILING")]
    skip_ceiling: Option<usize>,

    /// Output directory
    #[arg(short, long, env = "HARVEST_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// OGC API host
    #[arg(long, env = "HARVEST_OGC_BASE_URL")]
    ogc_base_url: Option<String>,

    /// ArcGIS MapServer URL
    #[arg(long, env = "HARVEST_ARCGIS_MAPSERVER")]
    arcgis_mapserver: Option<String>,

    /// Hide progress spinners
    #[arg(long)]
    no_progress: bool,
}

impl SyncArgs {
    fn specs(&self) -> Result<Vec<TargetSpec>> {
        let mut specs = Vec::new();
        for raw in &self.ogc {
            specs.push(TargetSpec::parse_ogc(raw)?);
        }
        for raw in &self.ogc_all {
            specs.push(TargetSpec::parse_ogc_dataset(raw)?);
        }
        specs.extend(
            self.arcgis_layer
                .iter()
                .map(|&layer_id| TargetSpec::ArcGisLayer { layer_id }),
        );
        Ok(specs)
    }

    fn apply(&self, config: &mut HarvestConfig) {
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if self.bbox.is_some() {
            config.bbox = self.bbox;
        }
        if let Some(clause) = &self.where_clause {
            config.arcgis_where = Some(clause.clone());
        }
        if let Some(limit) = self.limit {
            config.paging.ogc_page_size = limit;
        }
        if let Some(size) = self.arcgis_page_size {
            config.paging.arcgis_page_size = size;
        }
        if let Some(max_items) = self.max_items {
            config.paging.max_items = max_items;
        }
        if let Some(retries) = self.retries {
            config.fetch.max_retries = retries;
        }
        if let Some(backoff) = self.backoff_ms {
            config.fetch.backoff_base_ms = backoff;
        }
        if let Some(ceiling) = self.skip_ceiling {
            config.paging.skip_ceiling = ceiling;
        }
        if let Some(dir) = &self.out_dir {
            config.out_dir = dir.clone();
        }
        if let Some(url) = &self.ogc_base_url {
            config.ogc_base_url = url.clone();
        }
        if let Some(url) = &self.arcgis_mapserver {
            config.arcgis_mapserver = url.clone();
        }
        config.progress = !self.no_progress;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before clap reads env fallbacks
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("geoharvest")
        .filter_directives("reqwest=warn,hyper=warn")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    match cli.command {
        Command::Sync(args) => sync(args).await,
        Command::Collections {
            dataset,
            ogc_base_url,
        } => collections(&dataset, ogc_base_url).await,
    }
}

async fn sync(args: SyncArgs) -> Result<()> {
    let specs = args.specs()?;
    if specs.is_empty() {
        bail!("Nothing to sync: pass --ogc, --ogc-all or --arcgis-layer");
    }

    let mut config = HarvestConfig::from_env().context("Failed to load configuration")?;
    args.apply(&mut config);

    tokio::fs::create_dir_all(&config.out_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.out_dir.display()))?;

    let jobs = config.jobs;
    let ingestor = Ingestor::new(config)?;
    let targets = ingestor.resolve(&specs).await?;
    if targets.is_empty() {
        warn!("No targets resolved");
        return Ok(());
    }

    info!(targets = targets.len(), jobs, "Syncing");
    let reports = ingestor.ingest_all(targets, jobs).await;
    print_summary(&reports);

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        bail!("{} of {} targets failed", failed, reports.len());
    }

    info!("Sync complete");
    Ok(())
}

async fn collections(dataset: &str, ogc_base_url: Option<String>) -> Result<()> {
    let mut config = HarvestConfig::from_env().context("Failed to load configuration")?;
    if let Some(url) = ogc_base_url {
        config.ogc_base_url = url;
    }

    let api_base = config.ogc_api_base(dataset);
    let ingestor = Ingestor::new(config)?;
    let ids = list_collections(&ingestor.fetcher(), &api_base).await?;

    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

fn print_summary(reports: &[TargetReport]) {
    println!();
    println!("Summary:");
    for report in reports {
        match &report.error {
            None => println!(
                "  ok      {}: {} appended ({} total), {} skipped -> {}",
                report.label,
                report.appended,
                report.resumed_from + report.appended,
                report.skipped.len(),
                report.output_path.display()
            ),
            Some(err) => println!(
                "  FAILED  {}: {} appended before failure: {}",
                report.label, report.appended, err
            ),
        }
    }
}
