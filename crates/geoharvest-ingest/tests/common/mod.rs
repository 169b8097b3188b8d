//! Shared helpers for integration tests
//!
//! Simulated upstreams are `wiremock` responders that serve a collection of
//! `total` features by position, optionally failing every page that covers
//! one of a set of poisoned positions.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use geoharvest_common::HarvestRecord;
use geoharvest_ingest::config::HarvestConfig;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// A `200 OK` whose body was cut short, as the OGC upstream sometimes sends
pub fn truncated_body() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        r#"{"type":"FeatureCollection","features":[{"type":"Feature","id":"f1","prop"#,
        "application/json",
    )
}

pub fn query_param(request: &Request, key: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn query_u64(request: &Request, key: &str) -> u64 {
    query_param(request, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn covers(poisoned: &[u64], start: u64, size: u64) -> bool {
    poisoned.iter().any(|p| (start..start + size).contains(p))
}

pub fn ogc_feature(n: u64) -> Value {
    json!({
        "type": "Feature",
        "id": format!("f{}", n),
        "geometry": {"type": "Point", "coordinates": [10.75, 59.91]},
        "properties": {
            "navn": format!("Kulturminne {}", n),
            "kommune": "Oslo",
            "vernetype": "Listeført"
        }
    })
}

/// OGC `items` endpoint serving `offset`/`limit` pages
pub struct OgcCollection {
    pub total: u64,
    pub poisoned: Vec<u64>,
}

impl OgcCollection {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            poisoned: Vec::new(),
        }
    }

    pub fn poisoned(total: u64, poisoned: &[u64]) -> Self {
        Self {
            total,
            poisoned: poisoned.to_vec(),
        }
    }
}

impl Respond for OgcCollection {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let offset = query_u64(request, "offset");
        let limit = query_u64(request, "limit");

        if covers(&self.poisoned, offset, limit) {
            return truncated_body();
        }

        let end = (offset + limit).min(self.total);
        let features: Vec<Value> = (offset..end).map(ogc_feature).collect();
        ResponseTemplate::new(200).set_body_json(json!({
            "type": "FeatureCollection",
            "numberReturned": features.len(),
            "features": features
        }))
    }
}

/// ArcGIS `query` endpoint serving `resultOffset`/`resultRecordCount` pages
pub struct ArcGisLayer {
    pub total: u64,
}

impl Respond for ArcGisLayer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let offset = query_u64(request, "resultOffset");
        let count = query_u64(request, "resultRecordCount");

        let end = (offset + count).min(self.total);
        let features: Vec<Value> = (offset..end)
            .map(|n| {
                json!({
                    "attributes": {"OBJECTID": n + 1, "navn": format!("Bygning {}", n + 1), "KOMMUNE": "Lom"},
                    "geometry": {"x": 8.56, "y": 61.84}
                })
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({
            "geometryType": "esriGeometryPoint",
            "features": features
        }))
    }
}

/// Fails the first `failures` requests with `failing`, then serves `ok`
pub struct FlakyThenOk {
    pub failures: usize,
    pub failing: ResponseTemplate,
    pub ok: ResponseTemplate,
    pub calls: AtomicUsize,
}

impl FlakyThenOk {
    pub fn new(failures: usize, failing: ResponseTemplate, ok: ResponseTemplate) -> Self {
        Self {
            failures,
            failing,
            ok,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Respond for FlakyThenOk {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            self.failing.clone()
        } else {
            self.ok.clone()
        }
    }
}

pub fn items_path(dataset: &str, collection: &str) -> String {
    format!("/{}/collections/{}/items", dataset, collection)
}

pub const MAPSERVER_PATH: &str = "/arcgis/rest/services/Kulturminner/MapServer";

pub async fn mount_ogc_collection(server: &MockServer, dataset: &str, collection: &str, responder: OgcCollection) {
    Mock::given(method("GET"))
        .and(path(items_path(dataset, collection)))
        .respond_with(responder)
        .mount(server)
        .await;
}

pub async fn mount_arcgis_layer(server: &MockServer, layer_id: u32, name: Option<&str>, total: u64) {
    if let Some(name) = name {
        Mock::given(method("GET"))
            .and(path(format!("{}/{}", MAPSERVER_PATH, layer_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": layer_id,
                "name": name,
                "type": "Feature Layer"
            })))
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path(format!("{}/{}/query", MAPSERVER_PATH, layer_id)))
        .respond_with(ArcGisLayer { total })
        .mount(server)
        .await;
}

/// Configuration pointing both upstreams at `server`, with fast retries
pub fn test_config(server: &MockServer, out_dir: &Path) -> HarvestConfig {
    let mut config = HarvestConfig {
        ogc_base_url: server.uri(),
        arcgis_mapserver: format!("{}{}", server.uri(), MAPSERVER_PATH),
        out_dir: out_dir.to_path_buf(),
        progress: false,
        ..HarvestConfig::default()
    };
    config.fetch.max_retries = 0;
    config.fetch.backoff_base_ms = 1;
    config.fetch.timeout_secs = 10;
    config
}

/// `(offset, limit)` of every request received on `request_path`, in order
pub async fn page_requests(server: &MockServer, request_path: &str, offset_key: &str, size_key: &str) -> Vec<(u64, u64)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == request_path)
        .map(|r| (query_u64(r, offset_key), query_u64(r, size_key)))
        .collect()
}

pub async fn ogc_page_requests(server: &MockServer, dataset: &str, collection: &str) -> Vec<(u64, u64)> {
    page_requests(server, &items_path(dataset, collection), "offset", "limit").await
}

pub fn read_records(path: &Path) -> Vec<HarvestRecord> {
    serde_jsonlines::json_lines(path)
        .unwrap()
        .collect::<std::io::Result<Vec<HarvestRecord>>>()
        .unwrap()
}
