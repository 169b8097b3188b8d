//! OGC API Features source
//!
//! Pages `{api_base}/collections/{collection}/items` with `offset`/`limit`:
//!
//! ```text
//! GET {api_base}/collections/{collection}/items?f=json&limit=50&offset=1200[&bbox=...]
//! ```
//!
//! This upstream is the one that truncates bodies, so it pages adaptively.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{PageRequest, PageResult, PagedSource, PagingMode};
use crate::error::{IngestError, Result};
use crate::http::Fetcher;

/// One collection of an OGC API Features dataset
#[derive(Debug, Clone)]
pub struct OgcSource {
    fetcher: Arc<Fetcher>,
    api_base: String,
    dataset: String,
    collection: String,
}

impl OgcSource {
    pub fn new(
        fetcher: Arc<Fetcher>,
        api_base: impl Into<String>,
        dataset: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            api_base: api_base.into(),
            dataset: dataset.into(),
            collection: collection.into(),
        }
    }

    pub fn items_url(&self) -> String {
        format!(
            "{}/collections/{}/items",
            self.api_base.trim_end_matches('/'),
            self.collection
        )
    }
}

#[async_trait]
impl PagedSource for OgcSource {
    fn label(&self) -> String {
        format!("ogc {}/{}", self.dataset, self.collection)
    }

    fn paging_mode(&self) -> PagingMode {
        PagingMode::Adaptive
    }

    async fn next_page(&self, request: &PageRequest) -> Result<PageResult> {
        let url = self.items_url();
        let mut params = vec![
            ("f", "json".to_string()),
            ("limit", request.page_size.to_string()),
            ("offset", request.position.to_string()),
        ];
        if let Some(bbox) = request.filter.bbox {
            params.push(("bbox", bbox.to_string()));
        }

        let mut body = self.fetcher.fetch(&url, &params).await?;
        let page = PageResult::from_body(&mut body)
            .map_err(|failure| IngestError::TransientFetch { url, failure })?;

        debug!(
            source = %self.label(),
            position = request.position,
            page_size = request.page_size,
            returned = page.features.len(),
            "OGC page"
        );

        Ok(page)
    }
}

/// License advertised by an OGC dataset's OpenAPI document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct License {
    pub name: Option<String>,
    pub url: Option<String>,
}

/// Read `info.license` from `{api_base}/api?f=json`
pub async fn fetch_license(fetcher: &Fetcher, api_base: &str) -> Result<License> {
    let url = format!("{}/api", api_base.trim_end_matches('/'));
    let body = fetcher.fetch(&url, &[("f", "json".to_string())]).await?;

    let license = body
        .get("info")
        .and_then(|info| info.get("license"))
        .and_then(|license| license.as_object());

    let text = |key: &str| {
        license
            .and_then(|l| l.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    Ok(License {
        name: text("name"),
        url: text("url"),
    })
}

/// List collection ids from `{api_base}/collections?f=json`
pub async fn list_collections(fetcher: &Fetcher, api_base: &str) -> Result<Vec<String>> {
    let url = format!("{}/collections", api_base.trim_end_matches('/'));
    let body = fetcher.fetch(&url, &[("f", "json".to_string())]).await?;

    let ids = body
        .get("collections")
        .and_then(|c| c.as_array())
        .map(|collections| {
            collections
                .iter()
                .filter_map(|c| c.get("id"))
                .filter_map(|id| match id {
                    serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ids)
}
