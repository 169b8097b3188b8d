//! Paged upstream sources
//!
//! Both upstream protocols are reduced to one capability: given a position
//! and a page size, return the features found there. The [`Pager`] drives a
//! [`PagedSource`] and owns every decision about what to do next.
//!
//! | Protocol | Position parameter | Size parameter | On failure |
//! |----------|--------------------|----------------|------------|
//! | OGC API Features | `offset` | `limit` | shrink, then skip |
//! | ArcGIS REST query | `resultOffset` | `resultRecordCount` | fatal |
//!
//! [`Pager`]: crate::pager::Pager

pub mod arcgis;
pub mod ogc;

use async_trait::async_trait;
use geoharvest_common::BoundingBox;
use serde_json::{Map, Value};

use crate::error::{FetchFailure, Result};

pub use arcgis::ArcGisSource;
pub use ogc::OgcSource;

/// One feature as returned by the upstream service
///
/// OGC features carry `id`, `properties` and GeoJSON `geometry`; ArcGIS
/// features carry `attributes` and Esri `geometry`. The payload is passed
/// untouched to normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature(Map<String, Value>);

impl Feature {
    pub fn new(raw: Map<String, Value>) -> Self {
        Self(raw)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Object-valued member, e.g. `properties` or `attributes`
    pub fn object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.0.get(key).and_then(Value::as_object)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Optional filters applied to every page of a target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub bbox: Option<BoundingBox>,
    /// ArcGIS `where` clause; `1=1` when absent
    pub where_clause: Option<String>,
}

/// One page request: exactly one target at exactly one position
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub position: u64,
    pub page_size: u32,
    pub filter: QueryFilter,
}

/// Features found at a position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub features: Vec<Feature>,
    /// Nothing was returned at this position. The pager only believes this
    /// when the request was made at the nominal page size.
    pub exhausted: bool,
}

impl PageResult {
    pub fn new(features: Vec<Feature>) -> Self {
        let exhausted = features.is_empty();
        Self {
            features,
            exhausted,
        }
    }

    /// Build a page from a response body's `features` array
    ///
    /// A missing or null `features` member is an empty page. Any entry that
    /// is not an object makes the whole page undecodable, since dropping it
    /// would desynchronise positions from records.
    pub fn from_body(body: &mut Map<String, Value>) -> std::result::Result<Self, FetchFailure> {
        let items = match body.remove("features") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(FetchFailure::Decode("`features` is not an array".into())),
        };

        let features = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(map) => Ok(Feature::new(map)),
                _ => Err(FetchFailure::Decode(format!("feature {} is not an object", index))),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self::new(features))
    }
}

/// How a pager reacts when the fetcher gives up on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingMode {
    /// Halve the page size down to 1, then skip single positions
    Adaptive,
    /// Any page failure ends the target
    Fixed,
}

/// A paginated upstream collection
#[async_trait]
pub trait PagedSource: Send + Sync {
    /// Human-readable label used in logs and errors
    fn label(&self) -> String;

    fn paging_mode(&self) -> PagingMode;

    /// Fetch the page at `request.position`
    async fn next_page(&self, request: &PageRequest) -> Result<PageResult>;
}
