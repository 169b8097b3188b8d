//! ArcGIS REST MapServer source
//!
//! Pages `{mapserver}/{layer}/query` with `resultOffset`/`resultRecordCount`.
//! The page size never changes: offsets here are positional, and skipping
//! a position on this protocol is not supported, so any failure the fetcher
//! cannot absorb ends the target.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{PageRequest, PageResult, PagedSource, PagingMode};
use crate::error::{IngestError, Result};
use crate::http::Fetcher;

/// WGS84, used for both the output geometry and the envelope filter
const WGS84: &str = "4326";

/// One feature layer of an ArcGIS MapServer
#[derive(Debug, Clone)]
pub struct ArcGisSource {
    fetcher: Arc<Fetcher>,
    mapserver: String,
    layer_id: u32,
}

impl ArcGisSource {
    pub fn new(fetcher: Arc<Fetcher>, mapserver: impl Into<String>, layer_id: u32) -> Self {
        Self {
            fetcher,
            mapserver: mapserver.into(),
            layer_id,
        }
    }

    pub fn query_url(&self) -> String {
        format!("{}/{}/query", self.mapserver.trim_end_matches('/'), self.layer_id)
    }

    fn query_params(&self, request: &PageRequest) -> Vec<(&'static str, String)> {
        let where_clause = request
            .filter
            .where_clause
            .clone()
            .unwrap_or_else(|| "1=1".to_string());

        let mut params = vec![
            ("f", "json".to_string()),
            ("where", where_clause),
            ("outFields", "*".to_string()),
            ("returnGeometry", "true".to_string()),
            ("outSR", WGS84.to_string()),
            ("resultOffset", request.position.to_string()),
            ("resultRecordCount", request.page_size.to_string()),
        ];

        if let Some(bbox) = request.filter.bbox {
            params.extend([
                ("geometryType", "esriGeometryEnvelope".to_string()),
                ("geometry", bbox.to_string()),
                ("inSR", WGS84.to_string()),
                ("spatialRel", "esriSpatialRelIntersects".to_string()),
            ]);
        }

        params
    }
}

#[async_trait]
impl PagedSource for ArcGisSource {
    fn label(&self) -> String {
        format!("arcgis layer {}", self.layer_id)
    }

    fn paging_mode(&self) -> PagingMode {
        PagingMode::Fixed
    }

    async fn next_page(&self, request: &PageRequest) -> Result<PageResult> {
        let url = self.query_url();
        let params = self.query_params(request);

        let mut body = self.fetcher.fetch(&url, &params).await?;
        let page = PageResult::from_body(&mut body)
            .map_err(|failure| IngestError::TransientFetch { url, failure })?;

        debug!(
            source = %self.label(),
            position = request.position,
            page_size = request.page_size,
            returned = page.features.len(),
            "ArcGIS page"
        );

        Ok(page)
    }
}

/// Read a layer's display name from `{mapserver}/{layer}?f=pjson`
pub async fn fetch_layer_name(fetcher: &Fetcher, mapserver: &str, layer_id: u32) -> Result<Option<String>> {
    let url = format!("{}/{}", mapserver.trim_end_matches('/'), layer_id);
    let body = fetcher.fetch(&url, &[("f", "pjson".to_string())]).await?;

    Ok(body
        .get("name")
        .and_then(|n| n.as_str())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::policy::FailurePolicy;
    use crate::source::QueryFilter;

    fn source() -> ArcGisSource {
        let fetcher = Fetcher::new(&FetchConfig::default(), FailurePolicy::default()).unwrap();
        ArcGisSource::new(Arc::new(fetcher), "https://example.test/MapServer/", 3)
    }

    #[test]
    fn test_query_url() {
        assert_eq!(source().query_url(), "https://example.test/MapServer/3/query");
    }

    #[test]
    fn test_query_params_with_envelope() {
        let request = PageRequest {
            position: 4000,
            page_size: 2000,
            filter: QueryFilter {
                bbox: Some("10.0,59.0,11.0,60.0".parse().unwrap()),
                where_clause: None,
            },
        };

        let params = source().query_params(&request);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("where"), Some("1=1"));
        assert_eq!(get("resultOffset"), Some("4000"));
        assert_eq!(get("resultRecordCount"), Some("2000"));
        assert_eq!(get("geometryType"), Some("esriGeometryEnvelope"));
        assert_eq!(get("geometry"), Some("10,59,11,60"));
        assert_eq!(get("spatialRel"), Some("esriSpatialRelIntersects"));
    }

    #[test]
    fn test_query_params_without_envelope() {
        let request = PageRequest {
            position: 0,
            page_size: 10,
            filter: QueryFilter {
                bbox: None,
                where_clause: Some("KOMMUNE = 'Oslo'".into()),
            },
        };

        let params = source().query_params(&request);
        assert!(params.iter().all(|(k, _)| *k != "geometry"));
        assert!(params.contains(&("where", "KOMMUNE = 'Oslo'".to_string())));
    }
}
