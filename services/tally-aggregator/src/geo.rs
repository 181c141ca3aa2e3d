//! Reference geometry and the turnout/geometry merge
//!
//! The map collaborator draws one shape per reference region. `merge`
//! left-joins the location table onto the reference set so every reference
//! region gets exactly one row, zero-filled when no turnout was seen.
//! Aggregate regions missing from the reference set cannot be drawn; they
//! are returned as `unmatched` and logged instead of vanishing.
//!
//! Region names are compared as `RegionKey`s on both sides, which makes the
//! join insensitive to case and whitespace.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use types::ids::RegionKey;
use types::tally::LocationAggregate;

/// Default GeoJSON feature property holding the region name.
pub const DEFAULT_NAME_PROPERTY: &str = "NAME_1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceDataError {
    #[error("failed to read reference geometry from {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid reference geometry: {0}")]
    Parse(String),

    #[error("reference geometry contains no named regions")]
    Empty,

    #[error("reference geometry source unavailable: {0}")]
    Unavailable(String),
}

/// One drawable region. `geometry` is opaque and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRegion {
    pub region_name: String,
    pub geometry: Value,
}

/// The static set of drawable regions, keyed by normalized name.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGeometry {
    regions: Vec<(RegionKey, ReferenceRegion)>,
}

impl ReferenceGeometry {
    /// Build the reference set.
    ///
    /// Regions with blank names are skipped. Regions whose names normalize
    /// to an already-present key are collapsed into the first occurrence.
    pub fn new(regions: impl IntoIterator<Item = ReferenceRegion>) -> Result<Self, ReferenceDataError> {
        let mut seen: BTreeMap<RegionKey, usize> = BTreeMap::new();
        let mut kept = Vec::new();

        for region in regions {
            let Some(key) = RegionKey::try_new(&region.region_name) else {
                warn!("Skipping reference region with blank name");
                continue;
            };
            if let Some(first) = seen.get(&key) {
                warn!(
                    region = %region.region_name,
                    first_index = *first,
                    "Duplicate reference region collapsed"
                );
                continue;
            }
            seen.insert(key.clone(), kept.len());
            kept.push((key, region));
        }

        if kept.is_empty() {
            return Err(ReferenceDataError::Empty);
        }
        Ok(Self { regions: kept })
    }

    /// Parse a GeoJSON `FeatureCollection`, naming each region by the
    /// feature property `name_property`.
    pub fn from_geojson(document: &Value, name_property: &str) -> Result<Self, ReferenceDataError> {
        if document.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
            return Err(ReferenceDataError::Parse(
                "expected a GeoJSON FeatureCollection".to_string(),
            ));
        }
        let features = document
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| ReferenceDataError::Parse("missing features array".to_string()))?;

        let mut unnamed = 0usize;
        let regions: Vec<ReferenceRegion> = features
            .iter()
            .filter_map(|feature| {
                let name = feature
                    .get("properties")
                    .and_then(|props| props.get(name_property))
                    .and_then(Value::as_str);
                match name {
                    Some(name) => Some(ReferenceRegion {
                        region_name: name.to_string(),
                        geometry: feature.get("geometry").cloned().unwrap_or(Value::Null),
                    }),
                    None => {
                        unnamed += 1;
                        None
                    }
                }
            })
            .collect();

        if unnamed > 0 {
            warn!(unnamed, name_property, "Features without a region name were skipped");
        }
        Self::new(regions)
    }

    /// Regions in source order.
    pub fn regions(&self) -> impl Iterator<Item = &ReferenceRegion> {
        self.regions.iter().map(|(_, region)| region)
    }

    pub fn contains(&self, key: &RegionKey) -> bool {
        self.regions.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// One map row: a reference region and its turnout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoRow {
    pub region_name: String,
    pub count: u64,
}

/// Result of joining the location table onto the reference set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoMerge {
    /// One row per reference region, in reference order.
    pub rows: Vec<GeoRow>,
    /// Aggregate keys with no reference region, in key order.
    pub unmatched: Vec<RegionKey>,
}

/// Left outer join of `locations` onto `reference`.
pub fn merge(reference: &ReferenceGeometry, locations: &BTreeMap<RegionKey, LocationAggregate>) -> GeoMerge {
    let rows = reference
        .regions
        .iter()
        .map(|(key, region)| GeoRow {
            region_name: region.region_name.clone(),
            count: locations.get(key).map(|agg| agg.count).unwrap_or(0),
        })
        .collect();

    let unmatched: Vec<RegionKey> = locations
        .keys()
        .filter(|key| !reference.contains(key))
        .cloned()
        .collect();

    if !unmatched.is_empty() {
        warn!(
            unmatched = unmatched.len(),
            regions = ?unmatched.iter().map(RegionKey::as_str).collect::<Vec<_>>(),
            "Turnout regions missing from reference geometry"
        );
    }

    GeoMerge { rows, unmatched }
}

/// Render the map layer as a GeoJSON `FeatureCollection`: one feature per
/// reference region, its geometry passed through untouched, with
/// `region_name` and `count` as properties. Regions without a row count 0.
pub fn feature_collection(reference: &ReferenceGeometry, rows: &[GeoRow]) -> Value {
    let counts: BTreeMap<&str, u64> = rows
        .iter()
        .map(|row| (row.region_name.as_str(), row.count))
        .collect();

    let features: Vec<Value> = reference
        .regions()
        .map(|region| {
            json!({
                "type": "Feature",
                "properties": {
                    "region_name": region.region_name,
                    "count": counts.get(region.region_name.as_str()).copied().unwrap_or(0),
                },
                "geometry": region.geometry,
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

/// Supplier of the reference region set.
#[async_trait]
pub trait GeometryProvider: Send + Sync {
    async fn load(&self) -> Result<ReferenceGeometry, ReferenceDataError>;
}

/// Reads a GeoJSON FeatureCollection from disk.
#[derive(Debug, Clone)]
pub struct GeoJsonFileProvider {
    path: PathBuf,
    name_property: String,
}

impl GeoJsonFileProvider {
    pub fn new(path: impl Into<PathBuf>, name_property: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name_property: name_property.into(),
        }
    }
}

#[async_trait]
impl GeometryProvider for GeoJsonFileProvider {
    async fn load(&self) -> Result<ReferenceGeometry, ReferenceDataError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|err| ReferenceDataError::Io {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        })?;
        let document: Value =
            serde_json::from_slice(&bytes).map_err(|err| ReferenceDataError::Parse(err.to_string()))?;
        ReferenceGeometry::from_geojson(&document, &self.name_property)
    }
}

/// Serves a fixed, already-built reference set.
#[derive(Debug, Clone)]
pub struct StaticGeometry(pub ReferenceGeometry);

#[async_trait]
impl GeometryProvider for StaticGeometry {
    async fn load(&self) -> Result<ReferenceGeometry, ReferenceDataError> {
        Ok(self.0.clone())
    }
}

/// Loads the reference set once per process; a failed load is retried on
/// the next call.
#[derive(Debug, Default)]
pub struct GeometryCache {
    cell: OnceCell<Arc<ReferenceGeometry>>,
}

impl GeometryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(
        &self,
        provider: &dyn GeometryProvider,
    ) -> Result<Arc<ReferenceGeometry>, ReferenceDataError> {
        self.cell
            .get_or_try_init(|| async {
                let geometry = provider.load().await?;
                info!(regions = geometry.len(), "Reference geometry loaded");
                Ok::<_, ReferenceDataError>(Arc::new(geometry))
            })
            .await
            .cloned()
    }

    /// The cached set, if it has been loaded.
    pub fn get(&self) -> Option<Arc<ReferenceGeometry>> {
        self.cell.get().cloned()
    }
}
