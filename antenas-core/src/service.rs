//! High-level service facade combining the loader and the query engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use geojson::FeatureCollection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::geo::{export_properties, feature_collection, map_properties};
use crate::loader::DatasetLoader;
use crate::model::TowerRecord;
use crate::query::{
    self, BoundingBox, Frequencies, Nearby, OperatorSummary, Page, QueryError, TowerFilter,
    aggregate_by, operator_key, operator_summary, paginate, province_key, technology_key,
};

/// Default search radius for [`NearbyQuery`], in meters.
pub const DEFAULT_RADIUS_M: f64 = 5_000.0;
/// Default result cap for [`NearbyQuery`].
pub const DEFAULT_NEARBY_LIMIT: usize = 50;
/// Default result cap for [`MapQuery`].
pub const DEFAULT_MAP_LIMIT: usize = 500;
/// Default size of each ranking in [`TowerService::rankings`].
pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, Serialize)]
/// Dataset size and provenance.
pub struct Overview {
    /// Number of towers in the current snapshot.
    pub total: usize,
    /// When the snapshot was fetched.
    pub fetched_at: DateTime<Utc>,
    /// Name of the source the snapshot came from.
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
/// Tower counts per operator and per province.
pub struct Coverage {
    /// Number of towers in the snapshot.
    pub total: usize,
    /// Towers per operator.
    pub by_operator: Frequencies,
    /// Towers per province bucket.
    pub by_province: Frequencies,
}

#[derive(Debug, Clone, Serialize)]
/// Most represented provinces and operators.
pub struct Rankings {
    /// Provinces with the most towers.
    pub top_provinces: Vec<(String, usize)>,
    /// Operators with the most towers.
    pub top_operators: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Serialize)]
/// Tower counts per operator and per technology, for dashboards.
pub struct MapStats {
    /// Number of towers in the snapshot.
    pub total: usize,
    /// Towers per operator.
    pub by_operator: Frequencies,
    /// Towers per technology.
    pub by_technology: Frequencies,
}

#[derive(Debug, Clone, Copy)]
/// Parameters of a proximity search.
pub struct NearbyQuery {
    /// Latitude of the query point, in degrees.
    pub lat: f64,
    /// Longitude of the query point, in degrees.
    pub lon: f64,
    /// Inclusive search radius, in meters.
    pub radius_m: f64,
    /// Maximum number of results.
    pub limit: usize,
}

impl NearbyQuery {
    /// Query around a point with the default radius and limit.
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            radius_m: DEFAULT_RADIUS_M,
            limit: DEFAULT_NEARBY_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
/// Parameters of a map viewport request.
pub struct MapQuery {
    /// Viewport as `min_lon,min_lat,max_lon,max_lat`; ignored if malformed.
    pub bbox: Option<String>,
    /// Exact operator name.
    pub operator: Option<String>,
    /// Exact technology name.
    pub technology: Option<String>,
    /// Maximum number of towers returned.
    pub limit: usize,
}

impl Default for MapQuery {
    fn default() -> Self {
        Self {
            bbox: None,
            operator: None,
            technology: None,
            limit: DEFAULT_MAP_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
/// Which map filters the caller supplied.
pub struct FiltersApplied {
    /// A bounding box string was supplied, valid or not.
    pub bbox: bool,
    /// An operator was supplied.
    pub operator: bool,
    /// A technology was supplied.
    pub technology: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
/// Summary attached to a map viewport response.
pub struct MapMetadata {
    /// Towers selected after filtering and limiting, with or without coordinates.
    pub total: usize,
    /// Limit that was applied.
    pub limit: usize,
    /// Filters the caller supplied.
    pub filters_applied: FiltersApplied,
}

#[derive(Debug, Clone, Serialize)]
/// GeoJSON map viewport with its metadata.
pub struct MapView {
    /// Selected towers as point features.
    #[serde(flatten)]
    pub collection: FeatureCollection,
    /// Request summary.
    pub metadata: MapMetadata,
}

/// Public entry point for querying the tower dataset.
///
/// Every operation loads the current snapshot first, so callers always query
/// whatever the loader considers fresh.
pub struct TowerService {
    loader: Arc<DatasetLoader>,
}

impl TowerService {
    /// Create a new service bound to the provided loader.
    #[must_use]
    pub fn new(loader: Arc<DatasetLoader>) -> Self {
        Self { loader }
    }

    /// The loader backing this service.
    #[must_use]
    pub fn loader(&self) -> &Arc<DatasetLoader> {
        &self.loader
    }

    /// Size and provenance of the current dataset.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Unavailable`] if the dataset cannot be loaded.
    pub async fn overview(&self) -> Result<Overview, QueryError> {
        let snapshot = self.loader.load().await?;
        Ok(Overview {
            total: snapshot.len(),
            fetched_at: snapshot.fetched_at(),
            source: self.loader.source().name.clone(),
        })
    }

    /// One page of towers matching every filter, in dataset order.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotFound`] when the page is empty and
    /// [`QueryError::Unavailable`] if the dataset cannot be loaded.
    pub async fn list(&self, filter: &TowerFilter, page: Page) -> Result<Vec<TowerRecord>, QueryError> {
        let snapshot = self.loader.load().await?;
        let matching = query::filter(snapshot.records(), filter);
        let results: Vec<TowerRecord> = paginate(&matching, page).into_iter().cloned().collect();

        debug!(
            matching = matching.len(),
            page = page.page,
            returned = results.len(),
            "Listed towers"
        );

        if results.is_empty() {
            return Err(QueryError::NotFound(
                "no towers match these filters".to_owned(),
            ));
        }
        Ok(results)
    }

    /// Towers within the query radius, nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Unavailable`] if the dataset cannot be loaded.
    pub async fn nearby(&self, request: NearbyQuery) -> Result<Vec<Nearby>, QueryError> {
        let snapshot = self.loader.load().await?;
        Ok(query::nearby(
            snapshot.records(),
            request.lat,
            request.lon,
            request.radius_m,
            request.limit,
        ))
    }

    /// Footprint of the operators whose name contains `operator`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotFound`] when no tower matches and
    /// [`QueryError::Unavailable`] if the dataset cannot be loaded.
    pub async fn operator_info(&self, operator: &str) -> Result<OperatorSummary, QueryError> {
        let snapshot = self.loader.load().await?;
        operator_summary(snapshot.records(), operator)
            .ok_or_else(|| QueryError::NotFound(format!("no towers found for {operator}")))
    }

    /// Tower counts per operator and per province.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Unavailable`] if the dataset cannot be loaded.
    pub async fn coverage(&self) -> Result<Coverage, QueryError> {
        let snapshot = self.loader.load().await?;
        Ok(Coverage {
            total: snapshot.len(),
            by_operator: aggregate_by(snapshot.records(), operator_key),
            by_province: aggregate_by(snapshot.records(), province_key),
        })
    }

    /// The `top_n` provinces and operators by tower count.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Unavailable`] if the dataset cannot be loaded.
    pub async fn rankings(&self, top_n: usize) -> Result<Rankings, QueryError> {
        let snapshot = self.loader.load().await?;
        Ok(Rankings {
            top_provinces: aggregate_by(snapshot.records(), province_key).top(top_n),
            top_operators: aggregate_by(snapshot.records(), operator_key).top(top_n),
        })
    }

    /// Every tower with coordinates as a GeoJSON feature collection.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Unavailable`] if the dataset cannot be loaded.
    pub async fn geojson(&self) -> Result<FeatureCollection, QueryError> {
        let snapshot = self.loader.load().await?;
        Ok(feature_collection(snapshot.records(), export_properties))
    }

    /// Tower counts per operator and per technology.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Unavailable`] if the dataset cannot be loaded.
    pub async fn map_stats(&self) -> Result<MapStats, QueryError> {
        let snapshot = self.loader.load().await?;
        let stats = MapStats {
            total: snapshot.len(),
            by_operator: aggregate_by(snapshot.records(), operator_key),
            by_technology: aggregate_by(snapshot.records(), technology_key),
        };
        info!(total = stats.total, "Computed map statistics");
        Ok(stats)
    }

    /// Towers inside a viewport, optionally restricted to an exact operator
    /// and technology, as GeoJSON.
    ///
    /// A malformed viewport is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Unavailable`] if the dataset cannot be loaded.
    pub async fn map_view(&self, request: &MapQuery) -> Result<MapView, QueryError> {
        let snapshot = self.loader.load().await?;
        let mut selected: Vec<&TowerRecord> = snapshot.records().iter().collect();

        if let Some(raw) = request.bbox.as_deref() {
            match BoundingBox::parse(raw) {
                Ok(bbox) => {
                    selected.retain(|record| bbox.contains(record));
                    debug!(bbox = raw, matching = selected.len(), "Applied bounding box");
                }
                Err(err) => warn!(error = %err, "Ignoring bounding box"),
            }
        }
        if let Some(operator) = request.operator.as_deref().filter(|value| !value.is_empty()) {
            selected.retain(|record| record.operator.as_deref() == Some(operator));
            debug!(operator, matching = selected.len(), "Applied operator filter");
        }
        if let Some(technology) = request.technology.as_deref().filter(|value| !value.is_empty()) {
            selected.retain(|record| record.technology.as_deref() == Some(technology));
            debug!(technology, matching = selected.len(), "Applied technology filter");
        }

        selected.truncate(request.limit);
        let collection = feature_collection(selected.iter().copied(), map_properties);
        info!(features = collection.features.len(), "Built map viewport");

        Ok(MapView {
            collection,
            metadata: MapMetadata {
                total: selected.len(),
                limit: request.limit,
                filters_applied: FiltersApplied {
                    bbox: request.bbox.is_some(),
                    operator: request.operator.is_some(),
                    technology: request.technology.is_some(),
                },
            },
        })
    }
}
