//! Error types shared across geoharvest crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Shared error type for geoharvest
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid bounding box '{input}': {reason}")]
    InvalidBoundingBox { input: String, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),
}
