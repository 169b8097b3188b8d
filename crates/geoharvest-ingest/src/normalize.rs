//! Feature normalization
//!
//! Turns one upstream [`Feature`] into one [`HarvestRecord`]. Normalization
//! is a pure function of the feature and the target it came from; it never
//! fails, so every feature the pager yields produces exactly one line.

use geoharvest_common::fingerprint::fingerprint_properties;
use geoharvest_common::{HarvestRecord, SourceInfo};
use serde_json::{json, Map, Value};

use crate::source::Feature;

/// Language tag attached to every record
pub const RECORD_LANGUAGE: &str = "no";

/// Dataset name used for ArcGIS layers
pub const ARCGIS_DATASET: &str = "arcgis";

const OGC_TITLE_KEYS: &[&str] = &["tittel", "navn", "gårdsnavn", "enkeltminneart", "lokalitetsart"];

const OGC_TEXT_KEYS: &[&str] = &[
    "beskrivelse",
    "informasjon",
    "kulturminnesøk",
    "datering",
    "vernetype",
    "vernelov",
    "kommune",
    "fylke",
];

const OGC_LINK_KEYS: &[&str] = &["linkKulturminnesøk", "linkkulturminnesok", "linkAskeladden"];

const OGC_TAG_KEYS: &[&str] = &[
    "minnetype",
    "enkeltminnekategori",
    "lokalitetskategori",
    "enkeltminneart",
    "lokalitetsart",
    "vernetype",
];

const ARCGIS_ID_KEYS: &[&str] = &["OBJECTID", "objectid", "id"];

const ARCGIS_TITLE_KEYS: &[&str] = &["navn", "tittel", "KULTURMINNE", "LOKALITET"];

const ARCGIS_TEXT_KEYS: &[&str] = &[
    "BESKRIVELSE",
    "beskrivelse",
    "INFORMASJON",
    "informasjon",
    "KOMMUNE",
    "kommune",
    "FYLKE",
    "fylke",
];

/// Converts raw features of one target into output records
pub trait Normalize: Send + Sync {
    fn normalize(&self, feature: Feature) -> HarvestRecord;
}

/// Provenance shared by every record of a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContext {
    pub provider: String,
    pub dataset: String,
    /// Collection id, or layer name for ArcGIS
    pub collection: String,
    pub license_name: Option<String>,
    pub license_url: Option<String>,
}

impl RecordContext {
    fn source_info(&self, api_url: Option<String>, web_url: Option<String>) -> SourceInfo {
        SourceInfo {
            provider: self.provider.clone(),
            dataset: self.dataset.clone(),
            collection: self.collection.clone(),
            license_name: self.license_name.clone(),
            license_url: self.license_url.clone(),
            api_url,
            web_url,
        }
    }

    fn doc_id(&self, feature_id: &str) -> String {
        format!("{}:{}:{}", self.dataset, self.collection, feature_id)
    }
}

/// Normalizer for OGC API GeoJSON features
#[derive(Debug, Clone)]
pub struct OgcNormalizer {
    context: RecordContext,
    /// `{api_base}/collections/{collection}/items`, used to build feature URLs
    items_url: Option<String>,
}

impl OgcNormalizer {
    pub fn new(context: RecordContext, items_url: Option<String>) -> Self {
        Self { context, items_url }
    }
}

impl Normalize for OgcNormalizer {
    fn normalize(&self, feature: Feature) -> HarvestRecord {
        let mut raw = feature.into_inner();
        let properties = match raw.remove("properties") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let upstream_id = raw
            .get("id")
            .filter(|v| is_truthy(v))
            .or_else(|| properties.get("id").filter(|v| is_truthy(v)))
            .map(render);
        let feature_id = upstream_id
            .clone()
            .unwrap_or_else(|| fingerprint_properties(&properties));

        let title = first_present(&properties, OGC_TITLE_KEYS).unwrap_or_else(|| feature_id.clone());
        let title = clean_text(&title);
        let text = describe(&properties, OGC_TEXT_KEYS).unwrap_or_else(|| title.clone());

        let web_url = OGC_LINK_KEYS
            .iter()
            .filter_map(|key| properties.get(*key))
            .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_string));
        let api_url = match (&self.items_url, &upstream_id) {
            (Some(items), Some(id)) => Some(format!("{}/{}", items, id)),
            _ => None,
        };

        let tags = OGC_TAG_KEYS
            .iter()
            .filter_map(|key| properties.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();

        let geometry = raw.remove("geometry").filter(|g| !g.is_null());

        HarvestRecord {
            doc_id: self.context.doc_id(&feature_id),
            title,
            text,
            language: RECORD_LANGUAGE.to_string(),
            source: self.context.source_info(api_url, web_url),
            tags,
            geojson_geometry: geometry,
            properties,
        }
    }
}

/// Normalizer for ArcGIS REST query features
#[derive(Debug, Clone)]
pub struct ArcGisNormalizer {
    context: RecordContext,
}

impl ArcGisNormalizer {
    pub fn new(context: RecordContext) -> Self {
        Self { context }
    }
}

impl Normalize for ArcGisNormalizer {
    fn normalize(&self, feature: Feature) -> HarvestRecord {
        let mut raw = feature.into_inner();
        let attributes = match raw.remove("attributes") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let feature_id = first_present(&attributes, ARCGIS_ID_KEYS)
            .unwrap_or_else(|| fingerprint_properties(&attributes));

        let title = first_present(&attributes, ARCGIS_TITLE_KEYS).unwrap_or_else(|| feature_id.clone());
        let title = clean_text(&title);
        let text = describe(&attributes, ARCGIS_TEXT_KEYS).unwrap_or_else(|| title.clone());

        let geometry = raw.remove("geometry").and_then(esri_to_geojson);

        HarvestRecord {
            doc_id: self.context.doc_id(&feature_id),
            title,
            text,
            language: RECORD_LANGUAGE.to_string(),
            source: self.context.source_info(None, None),
            tags: Vec::new(),
            geojson_geometry: geometry,
            properties: attributes,
        }
    }
}

/// Convert an Esri JSON geometry to GeoJSON
///
/// Points (`x`/`y`), polylines (`paths`) and polygons (`rings`) are
/// converted; anything else is kept as-is. Rings are not reoriented.
pub fn esri_to_geojson(geometry: Value) -> Option<Value> {
    let object = match geometry {
        Value::Null => return None,
        Value::Object(ref object) => object,
        other => return Some(other),
    };

    if let (Some(x), Some(y)) = (
        object.get("x").and_then(Value::as_f64),
        object.get("y").and_then(Value::as_f64),
    ) {
        return Some(json!({"type": "Point", "coordinates": [x, y]}));
    }
    if let Some(paths) = object.get("paths").filter(|p| p.is_array()) {
        return Some(json!({"type": "MultiLineString", "coordinates": paths}));
    }
    if let Some(rings) = object.get("rings").filter(|r| r.is_array()) {
        return Some(json!({"type": "Polygon", "coordinates": rings}));
    }

    Some(geometry)
}

/// Whether a value counts as present (not null, empty, zero or false)
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn first_present(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|v| is_truthy(v))
        .map(render)
}

/// `key: value` for every scalar among `keys`, whitespace-collapsed
fn describe(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    let parts: Vec<String> = keys
        .iter()
        .filter_map(|key| match map.get(*key) {
            Some(value @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                Some(format!("{}: {}", key, render(value)))
            },
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(clean_text(&parts.join("\n")))
    }
}

fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
