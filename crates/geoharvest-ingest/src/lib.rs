//! Geoharvest Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resumable harvesting of geospatial features from paginated REST services
//! into append-only JSONL record streams.
//!
//! # Supported Upstreams
//!
//! - **OGC API Features**: `offset`/`limit` paging with adaptive page
//!   shrinking and bounded skip-forward
//! - **ArcGIS REST MapServer**: `resultOffset`/`resultRecordCount` paging at
//!   a fixed page size
//!
//! # Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Explicit harvest configuration |
//! | [`http`] | Fetcher with retry and backoff |
//! | [`policy`] | Retry, shrink and skip decisions |
//! | [`source`] | OGC and ArcGIS paged sources |
//! | [`pager`] | Position-driven pagination |
//! | [`normalize`] | Feature to record conversion |
//! | [`sink`] | JSONL stream and skip sidecar |
//! | [`target`] | Target specs and resolution |
//! | [`ingestor`] | Resume, append and worker pool |
//!
//! # Example
//!
//! ```no_run
//! use geoharvest_ingest::config::HarvestConfig;
//! use geoharvest_ingest::ingestor::Ingestor;
//! use geoharvest_ingest::target::TargetSpec;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ingestor = Ingestor::new(HarvestConfig::default())?;
//!     let specs = vec![TargetSpec::parse_ogc("kulturminner:kulturminner")?];
//!
//!     let targets = ingestor.resolve(&specs).await?;
//!     for report in ingestor.ingest_all(targets, 2).await {
//!         println!("{}: {} appended", report.label, report.appended);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod ingestor;
pub mod normalize;
pub mod pager;
pub mod policy;
pub mod sink;
pub mod source;
pub mod target;

pub use error::{FetchFailure, IngestError, Result};
