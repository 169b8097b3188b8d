//! Geoharvest Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the geoharvest workspace.
//!
//! # Overview
//!
//! This crate provides functionality used by every geoharvest component:
//!
//! - **Error Handling**: Shared error and result types
//! - **Fingerprints**: Stable content hashes for records without identifiers
//! - **Types**: Bounding boxes, normalized records and skip sidecars
//! - **Logging**: Tracing subscriber setup for binaries
//!
//! # Example
//!
//! ```no_run
//! use geoharvest_common::types::BoundingBox;
//! use geoharvest_common::Result;
//!
//! fn parse_filter(raw: &str) -> Result<BoundingBox> {
//!     let bbox: BoundingBox = raw.parse()?;
//!     println!("Filtering on {}", bbox);
//!     Ok(bbox)
//! }
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{HarvestError, Result};
pub use types::{BoundingBox, HarvestRecord, SkipSidecar, SourceInfo};
