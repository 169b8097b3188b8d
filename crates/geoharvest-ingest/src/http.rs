//! Resilient JSON fetcher
//!
//! Issues one GET, parses the body as a JSON object and retries transient
//! failures with exponential backoff. The upstream OGC service occasionally
//! answers `200 OK` with a truncated body, which is why a decode failure is
//! retried like a `503`. Requests ask for `Accept-Encoding: identity`
//! because compressed responses from that service are the ones that get cut
//! short.
//!
//! Backoff sleeps suspend only the calling task, so sibling targets keep
//! running while one of them waits.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::{FetchFailure, IngestError, Result};
use crate::policy::{FailurePolicy, Step};

/// A parsed JSON object body
pub type JsonObject = Map<String, Value>;

/// HTTP client with retry and backoff
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    policy: FailurePolicy,
}

impl Fetcher {
    /// Create a fetcher; `policy` supplies the retry ceiling and backoff base
    pub fn new(config: &FetchConfig, policy: FailurePolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    /// Fetch `url` with `params` and return the body as a JSON object
    ///
    /// Retryable failures are attempted up to `max_retries` more times.
    /// The returned error is always [`IngestError::FatalFetch`] carrying the
    /// last observed failure.
    pub async fn fetch(&self, url: &str, params: &[(&str, String)]) -> Result<JsonObject> {
        let mut attempt = 0u32;

        loop {
            let failure = match self.fetch_once(url, params).await {
                Ok(body) => return Ok(body),
                Err(IngestError::TransientFetch { failure, .. }) => failure,
                Err(IngestError::FatalFetch { failure, .. }) => {
                    return Err(IngestError::FatalFetch {
                        url: url.to_string(),
                        failure,
                        attempts: attempt + 1,
                    })
                },
                Err(other) => return Err(other),
            };

            match self.policy.after_attempt(attempt, &failure) {
                Step::Retry(delay) => {
                    warn!(
                        url = %url,
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                _ => {
                    return Err(IngestError::FatalFetch {
                        url: url.to_string(),
                        failure,
                        attempts: attempt + 1,
                    })
                },
            }
        }
    }

    /// One attempt, classified as success, transient or fatal
    async fn fetch_once(&self, url: &str, params: &[(&str, String)]) -> Result<JsonObject> {
        let transient = |failure: FetchFailure| IngestError::TransientFetch {
            url: url.to_string(),
            failure,
        };

        debug!(url = %url, ?params, "GET");

        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| transient(FetchFailure::Transport(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| transient(FetchFailure::Transport(e.to_string())))?;

        let object: JsonObject = serde_json::from_str(&body)
            .map_err(|e| transient(FetchFailure::Decode(e.to_string())))?;

        if let Some(code) = envelope_status(&object) {
            return Err(classify_status(url, code));
        }

        Ok(object)
    }
}

fn classify_status(url: &str, code: u16) -> IngestError {
    let failure = FetchFailure::Status(code);
    if failure.is_retryable() {
        IngestError::TransientFetch {
            url: url.to_string(),
            failure,
        }
    } else {
        IngestError::FatalFetch {
            url: url.to_string(),
            failure,
            attempts: 1,
        }
    }
}

/// Status code of an ArcGIS-style `{"error": {"code": N}}` body
///
/// ArcGIS reports query failures inside a `200 OK`; treating the embedded
/// code as the response status keeps such a body from passing as an empty
/// page.
fn envelope_status(body: &JsonObject) -> Option<u16> {
    let code = body.get("error")?.as_object()?.get("code")?.as_u64()?;
    u16::try_from(code).ok()
}
