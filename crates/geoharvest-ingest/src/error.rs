//! Error types for harvesting
//!
//! Fetch failures are classified once, at the point where a response is
//! inspected, into a [`FetchFailure`]. The classification decides whether a
//! failure is retried by the fetcher, absorbed by page shrinking, or ends
//! the target.

use thiserror::Error;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Why a single request failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The body was not a JSON object (often a truncated 200 response)
    Decode(String),
    /// The server answered with an error status, either as the HTTP status
    /// or inside an ArcGIS-style `{"error": {"code": ...}}` envelope
    Status(u16),
    /// The request never produced a complete response
    Transport(String),
}

impl FetchFailure {
    /// Whether the failure is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchFailure::Decode(_) | FetchFailure::Transport(_) => true,
            FetchFailure::Status(code) => is_retryable_status(*code),
        }
    }
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::Decode(msg) => write!(f, "invalid JSON body: {}", msg),
            FetchFailure::Status(code) => write!(f, "HTTP status {}", code),
            FetchFailure::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

/// Statuses the upstream services return for transient overload
pub fn is_retryable_status(code: u16) -> bool {
    matches!(code, 429 | 500 | 502 | 503 | 504)
}

/// Error types for harvesting
#[derive(Debug, Error)]
pub enum IngestError {
    /// A retryable failure of one attempt; recovered by retry or shrink
    #[error("Transient fetch error for {url}: {failure}")]
    TransientFetch { url: String, failure: FetchFailure },

    /// A non-retryable status, or the retry ceiling was exhausted
    #[error("Fatal fetch error for {url} after {attempts} attempt(s): {failure}")]
    FatalFetch {
        url: String,
        failure: FetchFailure,
        attempts: u32,
    },

    #[error("Too many skipped positions ({skipped}), last at position {position}. Last error: {last_error}")]
    SkipCeilingExceeded {
        skipped: usize,
        position: u64,
        last_error: String,
    },

    #[error("Target {target} failed at position {position}: {source}")]
    TargetIngestion {
        target: String,
        position: u64,
        #[source]
        source: Box<IngestError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] geoharvest_common::HarvestError),
}

impl IngestError {
    /// Whether a page request that failed this way can be retried at a
    /// smaller page size
    ///
    /// True for failures whose cause is transient in kind, even after the
    /// fetcher gave up on them; a non-retryable status is final.
    pub fn is_shrinkable(&self) -> bool {
        match self {
            IngestError::TransientFetch { .. } => true,
            IngestError::FatalFetch { failure, .. } => failure.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for code in [429, 500, 502, 503, 504] {
            assert!(FetchFailure::Status(code).is_retryable(), "{code} should retry");
        }
        for code in [400, 401, 403, 404, 501] {
            assert!(!FetchFailure::Status(code).is_retryable(), "{code} should not retry");
        }
        assert!(FetchFailure::Decode("EOF while parsing".into()).is_retryable());
        assert!(FetchFailure::Transport("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_shrinkable_classification() {
        let exhausted = IngestError::FatalFetch {
            url: "http://x/items".into(),
            failure: FetchFailure::Status(500),
            attempts: 6,
        };
        assert!(exhausted.is_shrinkable());

        let not_found = IngestError::FatalFetch {
            url: "http://x/items".into(),
            failure: FetchFailure::Status(404),
            attempts: 1,
        };
        assert!(!not_found.is_shrinkable());

        assert!(!IngestError::Config("bad".into()).is_shrinkable());
    }

    #[test]
    fn test_target_error_names_target_and_position() {
        let err = IngestError::TargetIngestion {
            target: "ogc kulturminner/sikringssoner".into(),
            position: 350,
            source: Box::new(IngestError::SkipCeilingExceeded {
                skipped: 50,
                position: 349,
                last_error: "HTTP status 500".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("ogc kulturminner/sikringssoner"));
        assert!(msg.contains("350"));
        assert!(msg.contains("Too many skipped positions (50)"));
    }
}
