//! Common types used across geoharvest

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HarvestError, Result};

// ============================================================================
// Filters
// ============================================================================

/// WGS84 bounding box used to filter upstream queries.
///
/// Parsed from and rendered as `minLon,minLat,maxLon,maxLat`, which is the
/// form both the OGC `bbox` parameter and the ArcGIS envelope geometry
/// expect.
///
/// # Examples
///
/// ```rust
/// use geoharvest_common::types::BoundingBox;
///
/// let bbox: BoundingBox = "10.6,59.8,10.9,60.0".parse().unwrap();
/// assert_eq!(bbox.to_string(), "10.6,59.8,10.9,60");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Create a bounding box, validating coordinate ranges and ordering
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let bbox = Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| HarvestError::InvalidBoundingBox {
            input: self.to_string(),
            reason: reason.to_string(),
        };

        if !(-180.0..=180.0).contains(&self.min_lon) || !(-180.0..=180.0).contains(&self.max_lon) {
            return Err(invalid("longitude must be within [-180, 180]"));
        }
        if !(-90.0..=90.0).contains(&self.min_lat) || !(-90.0..=90.0).contains(&self.max_lat) {
            return Err(invalid("latitude must be within [-90, 90]"));
        }
        if self.min_lon > self.max_lon || self.min_lat > self.max_lat {
            return Err(invalid("minimum corner must not exceed maximum corner"));
        }
        Ok(())
    }
}

impl std::str::FromStr for BoundingBox {
    type Err = HarvestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(HarvestError::InvalidBoundingBox {
                input: s.to_string(),
                reason: format!("expected 4 comma-separated values, got {}", parts.len()),
            });
        }

        let mut coords = [0.0f64; 4];
        for (slot, part) in coords.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| HarvestError::InvalidBoundingBox {
                input: s.to_string(),
                reason: format!("'{}' is not a number", part),
            })?;
        }

        Self::new(coords[0], coords[1], coords[2], coords[3])
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

// ============================================================================
// Output Records
// ============================================================================

/// Provenance of a harvested record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Organisation publishing the data (e.g., "Riksantikvaren")
    pub provider: String,

    /// Dataset name (e.g., "kulturminner", or "arcgis" for map layers)
    pub dataset: String,

    /// Collection id or map layer name
    pub collection: String,

    /// License name (e.g., "NLOD")
    pub license_name: Option<String>,

    /// License URL
    pub license_url: Option<String>,

    /// Canonical API URL for the feature when known
    pub api_url: Option<String>,

    /// Human-facing page for the feature when known
    pub web_url: Option<String>,
}

/// One normalized record, written as a single line of the output stream.
///
/// `doc_id` is derived from dataset, collection/layer and feature id and is
/// stable across runs, which lets downstream consumers deduplicate records
/// that were appended twice after an interrupted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestRecord {
    pub doc_id: String,
    pub title: String,
    pub text: String,
    pub language: String,
    pub source: SourceInfo,
    pub tags: Vec<String>,
    pub geojson_geometry: Option<Value>,
    pub properties: Map<String, Value>,
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Positions abandoned during one run of a target.
///
/// Written next to the output stream for operators. Nothing reads it back
/// to decide where to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipSidecar {
    pub dataset: String,

    /// Collection id (OGC) or layer name (ArcGIS)
    pub collection: String,

    pub skipped_offsets: Vec<u64>,

    pub note: String,
}

impl SkipSidecar {
    /// Default note attached to sidecar files
    pub const NOTE: &'static str =
        "Offsets that consistently returned upstream errors (e.g., HTTP 500) during sync.";

    pub fn new(dataset: impl Into<String>, collection: impl Into<String>, offsets: Vec<u64>) -> Self {
        Self {
            dataset: dataset.into(),
            collection: collection.into(),
            skipped_offsets: offsets,
            note: Self::NOTE.to_string(),
        }
    }

    /// Pretty-printed JSON, as written next to the output stream
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_parse() {
        let bbox: BoundingBox = "10.5, 59.5, 11.0, 60.25".parse().unwrap();
        assert_eq!(bbox.min_lon, 10.5);
        assert_eq!(bbox.min_lat, 59.5);
        assert_eq!(bbox.max_lon, 11.0);
        assert_eq!(bbox.max_lat, 60.25);
        assert_eq!(bbox.to_string(), "10.5,59.5,11,60.25");
    }

    #[test]
    fn test_bbox_rejects_bad_input() {
        assert!("10,59,11".parse::<BoundingBox>().is_err());
        assert!("a,59,11,60".parse::<BoundingBox>().is_err());
        assert!("11,59,10,60".parse::<BoundingBox>().is_err());
        assert!("10,-95,11,60".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn test_sidecar_serialization() {
        let sidecar = SkipSidecar::new("kulturminner", "sikringssoner", vec![12, 40]);
        let json: serde_json::Value = serde_json::from_str(&sidecar.to_json().unwrap()).unwrap();

        assert_eq!(json["dataset"], "kulturminner");
        assert_eq!(json["collection"], "sikringssoner");
        assert_eq!(json["skipped_offsets"], serde_json::json!([12, 40]));
        assert_eq!(json["note"], SkipSidecar::NOTE);
    }
}
