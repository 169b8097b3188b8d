//! Harvest targets
//!
//! A target is one OGC collection or one ArcGIS layer, with its own output
//! stream. Resolution turns what the user asked for into concrete targets,
//! looking up collection lists, licenses and layer names on the way.

use geoharvest_common::HarvestError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::HarvestConfig;
use crate::error::Result;
use crate::http::Fetcher;
use crate::normalize::{ArcGisNormalizer, Normalize, OgcNormalizer, RecordContext, ARCGIS_DATASET};
use crate::sink::sidecar_path;
use crate::source::arcgis::fetch_layer_name;
use crate::source::ogc::{fetch_license, list_collections, License};
use crate::source::{ArcGisSource, OgcSource, PagedSource, QueryFilter};

/// License of every ArcGIS layer
pub const ARCGIS_LICENSE_NAME: &str = "NLOD";
pub const ARCGIS_LICENSE_URL: &str = "https://data.norge.no/nlod";

/// What the user asked to harvest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetSpec {
    /// One collection of an OGC dataset
    OgcCollection { dataset: String, collection: String },
    /// Every collection of an OGC dataset
    OgcDataset { dataset: String },
    /// One ArcGIS MapServer layer
    ArcGisLayer { layer_id: u32 },
}

impl TargetSpec {
    /// Parse `dataset:collection`
    pub fn parse_ogc(raw: &str) -> std::result::Result<Self, HarvestError> {
        match raw.split_once(':') {
            Some((dataset, collection)) if !dataset.trim().is_empty() && !collection.trim().is_empty() => {
                Ok(TargetSpec::OgcCollection {
                    dataset: dataset.trim().to_string(),
                    collection: collection.trim().to_string(),
                })
            },
            _ => Err(HarvestError::Parse(format!(
                "expected 'dataset:collection', got '{}'",
                raw
            ))),
        }
    }

    /// Parse a bare dataset name
    pub fn parse_ogc_dataset(raw: &str) -> std::result::Result<Self, HarvestError> {
        let dataset = raw.trim();
        if dataset.is_empty() || dataset.contains(['/', ':']) {
            return Err(HarvestError::Parse(format!("invalid dataset name '{}'", raw)));
        }
        Ok(TargetSpec::OgcDataset {
            dataset: dataset.to_string(),
        })
    }
}

/// A fully resolved target, ready to ingest
#[derive(Clone)]
pub struct Target {
    /// Label used in logs, progress and the summary
    pub label: String,
    pub dataset: String,
    /// Collection id, or layer name for ArcGIS
    pub collection: String,
    pub output_path: PathBuf,
    pub nominal_page_size: u32,
    pub filter: QueryFilter,
    pub source: Arc<dyn PagedSource>,
    pub normalizer: Arc<dyn Normalize>,
}

impl Target {
    pub fn sidecar_path(&self) -> PathBuf {
        sidecar_path(&self.output_path)
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("label", &self.label)
            .field("output_path", &self.output_path)
            .field("nominal_page_size", &self.nominal_page_size)
            .finish_non_exhaustive()
    }
}

/// Output stream of an OGC collection
pub fn ogc_output_path(out_dir: &Path, dataset: &str, collection: &str) -> PathBuf {
    out_dir.join(format!("ogc__{}__{}.jsonl", dataset, collection))
}

/// Output stream of an ArcGIS layer
pub fn arcgis_output_path(out_dir: &Path, layer_id: u32) -> PathBuf {
    out_dir.join(format!("arcgis__{}.jsonl", layer_id))
}

/// Turns [`TargetSpec`]s into [`Target`]s
pub struct TargetResolver {
    config: Arc<HarvestConfig>,
    fetcher: Arc<Fetcher>,
    licenses: HashMap<String, License>,
}

impl TargetResolver {
    pub fn new(config: Arc<HarvestConfig>, fetcher: Arc<Fetcher>) -> Self {
        Self {
            config,
            fetcher,
            licenses: HashMap::new(),
        }
    }

    /// Resolve every spec, in order, dropping duplicates
    ///
    /// Listing the collections of a dataset must succeed; license and layer
    /// name lookups are best-effort.
    pub async fn resolve(&mut self, specs: &[TargetSpec]) -> Result<Vec<Target>> {
        let mut targets: Vec<Target> = Vec::new();

        for spec in specs {
            let resolved = match spec {
                TargetSpec::OgcCollection {
                    dataset,
                    collection,
                } => vec![self.ogc_target(dataset, collection).await],
                TargetSpec::OgcDataset { dataset } => {
                    let api_base = self.config.ogc_api_base(dataset);
                    let collections = list_collections(&self.fetcher, &api_base).await?;
                    info!(dataset = %dataset, count = collections.len(), "Listed collections");

                    let mut found = Vec::with_capacity(collections.len());
                    for collection in &collections {
                        found.push(self.ogc_target(dataset, collection).await);
                    }
                    found
                },
                TargetSpec::ArcGisLayer { layer_id } => vec![self.arcgis_target(*layer_id).await],
            };

            for target in resolved {
                if targets.iter().any(|t| t.output_path == target.output_path) {
                    continue;
                }
                targets.push(target);
            }
        }

        Ok(targets)
    }

    async fn license(&mut self, dataset: &str) -> License {
        if let Some(license) = self.licenses.get(dataset) {
            return license.clone();
        }

        let api_base = self.config.ogc_api_base(dataset);
        let license = match fetch_license(&self.fetcher, &api_base).await {
            Ok(license) => license,
            Err(e) => {
                warn!(dataset = %dataset, error = %e, "Could not read dataset license");
                License::default()
            },
        };

        self.licenses.insert(dataset.to_string(), license.clone());
        license
    }

    async fn ogc_target(&mut self, dataset: &str, collection: &str) -> Target {
        let license = self.license(dataset).await;
        let api_base = self.config.ogc_api_base(dataset);

        let source = OgcSource::new(self.fetcher.clone(), api_base, dataset, collection);
        let context = RecordContext {
            provider: self.config.provider.clone(),
            dataset: dataset.to_string(),
            collection: collection.to_string(),
            license_name: license.name,
            license_url: license.url,
        };
        let normalizer = OgcNormalizer::new(context, Some(source.items_url()));

        Target {
            label: source.label(),
            dataset: dataset.to_string(),
            collection: collection.to_string(),
            output_path: ogc_output_path(&self.config.out_dir, dataset, collection),
            nominal_page_size: self.config.paging.ogc_page_size,
            filter: QueryFilter {
                bbox: self.config.bbox,
                where_clause: None,
            },
            source: Arc::new(source),
            normalizer: Arc::new(normalizer),
        }
    }

    async fn arcgis_target(&mut self, layer_id: u32) -> Target {
        let mapserver = self.config.arcgis_mapserver.clone();
        let layer_name = match fetch_layer_name(&self.fetcher, &mapserver, layer_id).await {
            Ok(Some(name)) => name,
            Ok(None) => format!("layer_{}", layer_id),
            Err(e) => {
                warn!(layer_id, error = %e, "Could not read layer info");
                format!("layer_{}", layer_id)
            },
        };

        let source = ArcGisSource::new(self.fetcher.clone(), mapserver, layer_id);
        let context = RecordContext {
            provider: self.config.provider.clone(),
            dataset: ARCGIS_DATASET.to_string(),
            collection: layer_name.clone(),
            license_name: Some(ARCGIS_LICENSE_NAME.to_string()),
            license_url: Some(ARCGIS_LICENSE_URL.to_string()),
        };

        Target {
            label: format!("{} ({})", source.label(), layer_name),
            dataset: ARCGIS_DATASET.to_string(),
            collection: layer_name,
            output_path: arcgis_output_path(&self.config.out_dir, layer_id),
            nominal_page_size: self.config.paging.arcgis_page_size,
            filter: QueryFilter {
                bbox: self.config.bbox,
                where_clause: self.config.arcgis_where.clone(),
            },
            source: Arc::new(source),
            normalizer: Arc::new(ArcGisNormalizer::new(context)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ogc_spec() {
        assert_eq!(
            TargetSpec::parse_ogc("kulturminner:sikringssoner").unwrap(),
            TargetSpec::OgcCollection {
                dataset: "kulturminner".into(),
                collection: "sikringssoner".into(),
            }
        );
        assert!(TargetSpec::parse_ogc("kulturminner").is_err());
        assert!(TargetSpec::parse_ogc(":x").is_err());
        assert!(TargetSpec::parse_ogc("x:").is_err());
    }

    #[test]
    fn test_parse_ogc_dataset() {
        assert_eq!(
            TargetSpec::parse_ogc_dataset(" brukerminner ").unwrap(),
            TargetSpec::OgcDataset {
                dataset: "brukerminner".into()
            }
        );
        assert!(TargetSpec::parse_ogc_dataset("a:b").is_err());
        assert!(TargetSpec::parse_ogc_dataset("").is_err());
    }

    #[test]
    fn test_output_paths() {
        let dir = Path::new("/tmp/sync");
        assert_eq!(
            ogc_output_path(dir, "kulturminner", "kulturminner"),
            PathBuf::from("/tmp/sync/ogc__kulturminner__kulturminner.jsonl")
        );
        assert_eq!(
            arcgis_output_path(dir, 3),
            PathBuf::from("/tmp/sync/arcgis__3.jsonl")
        );
    }
}
