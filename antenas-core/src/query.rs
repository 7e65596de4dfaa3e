//! Pure filter, proximity, and aggregation functions over tower records.
//!
//! Nothing here touches the loader: every function takes the records it works
//! on and returns a derived subset or aggregate, leaving the input untouched.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::warn;

use crate::loader::DatasetError;
use crate::model::{TowerRecord, UNKNOWN};

/// Mean Earth radius used by [`haversine`], in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Caller-visible query outcomes that are not a plain result.
pub enum QueryError {
    /// Filters or search matched nothing.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The dataset could not be loaded.
    #[error(transparent)]
    Unavailable(#[from] DatasetError),
    /// A geographic bound or bounding-box string was malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Great-circle distance in meters between two points given in degrees.
#[must_use]
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let half_chord = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * half_chord.sqrt().atan2((1.0 - half_chord).sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
/// Inclusive latitude/longitude rectangle.
pub struct BoundingBox {
    /// Southern edge.
    pub lat_min: f64,
    /// Northern edge.
    pub lat_max: f64,
    /// Western edge.
    pub lon_min: f64,
    /// Eastern edge.
    pub lon_max: f64,
}

impl BoundingBox {
    /// Build a box from its four edges.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidArgument`] when a bound is not finite or a
    /// minimum exceeds its maximum.
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Result<Self, QueryError> {
        let finite = [lat_min, lat_max, lon_min, lon_max]
            .iter()
            .all(|bound| bound.is_finite());
        if !finite {
            return Err(QueryError::InvalidArgument(
                "bounding box bounds must be finite numbers".to_owned(),
            ));
        }
        if lat_min > lat_max || lon_min > lon_max {
            return Err(QueryError::InvalidArgument(format!(
                "inverted bounding box: lat {lat_min}..{lat_max}, lon {lon_min}..{lon_max}"
            )));
        }

        Ok(Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        })
    }

    /// Build a box from optional query bounds.
    ///
    /// Returns `Ok(None)` unless all four bounds are supplied.
    ///
    /// # Errors
    ///
    /// Same as [`BoundingBox::new`] once all four bounds are present.
    pub fn from_bounds(
        lat_min: Option<f64>,
        lat_max: Option<f64>,
        lon_min: Option<f64>,
        lon_max: Option<f64>,
    ) -> Result<Option<Self>, QueryError> {
        match (lat_min, lat_max, lon_min, lon_max) {
            (Some(lat_min), Some(lat_max), Some(lon_min), Some(lon_max)) => {
                Self::new(lat_min, lat_max, lon_min, lon_max).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Parse the map viewport form `min_lon,min_lat,max_lon,max_lat`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidArgument`] when the string does not hold
    /// exactly four numbers or the numbers do not form a valid box.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let values = raw
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| QueryError::InvalidArgument(format!("bbox {raw:?}: {err}")))?;

        let [min_lon, min_lat, max_lon, max_lat] = values.as_slice() else {
            return Err(QueryError::InvalidArgument(format!(
                "bbox {raw:?}: expected min_lon,min_lat,max_lon,max_lat"
            )));
        };

        Self::new(*min_lat, *max_lat, *min_lon, *max_lon)
    }

    /// Whether the record has coordinates inside the box.
    #[must_use]
    pub fn contains(&self, record: &TowerRecord) -> bool {
        record.coordinates().is_some_and(|(lat, lon)| {
            (self.lat_min..=self.lat_max).contains(&lat) && (self.lon_min..=self.lon_max).contains(&lon)
        })
    }
}

#[derive(Debug, Clone, Default)]
/// Conjunction of attribute predicates for listing towers.
///
/// An absent or empty predicate imposes no constraint.
pub struct TowerFilter {
    /// Case-insensitive substring matched against the address.
    pub province: Option<String>,
    /// Case-insensitive substring matched against the address as well.
    pub municipality: Option<String>,
    /// Case-insensitive substring matched against the operator.
    pub operator: Option<String>,
    /// Case-insensitive substring matched against the technology.
    pub technology: Option<String>,
    /// Geographic rectangle; records without coordinates never match it.
    pub bbox: Option<BoundingBox>,
}

impl TowerFilter {
    /// Apply optional query bounds. Malformed bounds are logged and ignored.
    #[must_use]
    pub fn with_bounds(
        mut self,
        lat_min: Option<f64>,
        lat_max: Option<f64>,
        lon_min: Option<f64>,
        lon_max: Option<f64>,
    ) -> Self {
        match BoundingBox::from_bounds(lat_min, lat_max, lon_min, lon_max) {
            Ok(bbox) => self.bbox = bbox,
            Err(err) => warn!(error = %err, "Ignoring bounding box filter"),
        }
        self
    }

    /// Whether the record satisfies every active predicate.
    #[must_use]
    pub fn matches(&self, record: &TowerRecord) -> bool {
        Matcher::new(self).matches(record)
    }
}

struct Matcher {
    province: Option<String>,
    municipality: Option<String>,
    operator: Option<String>,
    technology: Option<String>,
    bbox: Option<BoundingBox>,
}

impl Matcher {
    fn new(filter: &TowerFilter) -> Self {
        Self {
            province: needle(filter.province.as_deref()),
            municipality: needle(filter.municipality.as_deref()),
            operator: needle(filter.operator.as_deref()),
            technology: needle(filter.technology.as_deref()),
            bbox: filter.bbox,
        }
    }

    fn matches(&self, record: &TowerRecord) -> bool {
        let address = record.address.as_deref();

        contains_folded(address, self.province.as_deref())
            && contains_folded(address, self.municipality.as_deref())
            && contains_folded(record.operator.as_deref(), self.operator.as_deref())
            && contains_folded(record.technology.as_deref(), self.technology.as_deref())
            && self.bbox.is_none_or(|bbox| bbox.contains(record))
    }
}

fn needle(raw: Option<&str>) -> Option<String> {
    raw.filter(|value| !value.is_empty()).map(str::to_lowercase)
}

fn contains_folded(haystack: Option<&str>, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(needle) => haystack.is_some_and(|value| value.to_lowercase().contains(needle)),
    }
}

/// Records satisfying every predicate, in dataset order.
#[must_use]
pub fn filter<'a>(records: &'a [TowerRecord], predicates: &TowerFilter) -> Vec<&'a TowerRecord> {
    let matcher = Matcher::new(predicates);
    records.iter().filter(|record| matcher.matches(record)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// One-based page selector.
pub struct Page {
    /// Page number, starting at 1.
    pub page: usize,
    /// Page size.
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 100,
        }
    }
}

/// Slice `[(page - 1) * limit, page * limit)` of `items`.
///
/// Page 0 and limit 0 both select nothing.
#[must_use]
pub fn paginate<T: Clone>(items: &[T], page: Page) -> Vec<T> {
    let Some(skip) = page
        .page
        .checked_sub(1)
        .and_then(|index| index.checked_mul(page.limit))
    else {
        return Vec::new();
    };

    items.iter().skip(skip).take(page.limit).cloned().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// A record returned by a proximity search together with its distance.
pub struct Nearby {
    /// The matching tower.
    #[serde(flatten)]
    pub record: TowerRecord,
    /// Great-circle distance from the query point, in meters.
    pub distance_m: f64,
}

/// Records within `radius_m` of `(lat, lon)`, nearest first, at most `limit`.
///
/// The radius is inclusive. Ties keep dataset order.
#[must_use]
pub fn nearby(records: &[TowerRecord], lat: f64, lon: f64, radius_m: f64, limit: usize) -> Vec<Nearby> {
    let mut hits: Vec<(f64, &TowerRecord)> = records
        .iter()
        .filter_map(|record| {
            let (tower_lat, tower_lon) = record.coordinates()?;
            let distance = haversine(lat, lon, tower_lat, tower_lon);
            (distance <= radius_m).then_some((distance, record))
        })
        .collect();

    hits.sort_by(|left, right| left.0.total_cmp(&right.0));
    hits.truncate(limit);

    hits.into_iter()
        .map(|(distance_m, record)| Nearby {
            record: record.clone(),
            distance_m,
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Frequency table that remembers the order keys were first seen in.
pub struct Frequencies {
    entries: Vec<(String, usize)>,
    positions: HashMap<String, usize>,
}

impl Frequencies {
    /// Count one more occurrence of `key`.
    pub fn add(&mut self, key: &str) {
        if let Some(entry) = self
            .positions
            .get(key)
            .and_then(|&position| self.entries.get_mut(position))
        {
            entry.1 += 1;
            return;
        }

        self.positions.insert(key.to_owned(), self.entries.len());
        self.entries.push((key.to_owned(), 1));
    }

    /// Count for `key`, zero if never seen.
    #[must_use]
    pub fn get(&self, key: &str) -> usize {
        self.positions
            .get(key)
            .and_then(|&position| self.entries.get(position))
            .map_or(0, |(_, count)| *count)
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts.
    #[must_use]
    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    /// Keys and counts in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(key, count)| (key.as_str(), *count))
    }

    /// The `n` most frequent keys, highest first; ties keep first-seen order.
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<(String, usize)> {
        let mut ranked = self.entries.clone();
        ranked.sort_by_key(|(_, count)| Reverse(*count));
        ranked.truncate(n);
        ranked
    }
}

impl Serialize for Frequencies {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, count) in &self.entries {
            map.serialize_entry(key, count)?;
        }
        map.end()
    }
}

/// Count records by the key `key_fn` extracts.
pub fn aggregate_by<'a, I, F>(records: I, key_fn: F) -> Frequencies
where
    I: IntoIterator<Item = &'a TowerRecord>,
    F: Fn(&'a TowerRecord) -> &'a str,
{
    let mut frequencies = Frequencies::default();
    for record in records {
        frequencies.add(key_fn(record));
    }
    frequencies
}

/// Operator bucket; records without one count as [`UNKNOWN`].
#[must_use]
pub fn operator_key(record: &TowerRecord) -> &str {
    record.operator.as_deref().unwrap_or(UNKNOWN)
}

/// Technology bucket; records without one count as [`UNKNOWN`].
#[must_use]
pub fn technology_key(record: &TowerRecord) -> &str {
    record.technology.as_deref().unwrap_or(UNKNOWN)
}

/// Province bucket from the last address segment; records without an address count as `""`.
#[must_use]
pub fn province_key(record: &TowerRecord) -> &str {
    record.address_province().unwrap_or("")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Footprint of one operator across the dataset.
pub struct OperatorSummary {
    /// Operator substring the summary was built for.
    pub operator: String,
    /// Number of matching towers.
    pub count: usize,
    /// Matching towers per province bucket.
    pub provinces: Frequencies,
    /// Share of the whole dataset, in percent, rounded to two decimals.
    pub percentage: f64,
}

/// Summarize the towers whose operator contains `operator`, case-insensitively.
///
/// Returns `None` when nothing matches.
#[must_use]
pub fn operator_summary(records: &[TowerRecord], operator: &str) -> Option<OperatorSummary> {
    let needle = operator.to_lowercase();
    let matching: Vec<&TowerRecord> = records
        .iter()
        .filter(|record| {
            needle.is_empty() || contains_folded(record.operator.as_deref(), Some(needle.as_str()))
        })
        .collect();

    if matching.is_empty() {
        return None;
    }

    Some(OperatorSummary {
        operator: operator.to_owned(),
        count: matching.len(),
        provinces: aggregate_by(matching.iter().copied(), province_key),
        percentage: percentage(matching.len(), records.len()),
    })
}

#[expect(
    clippy::cast_precision_loss,
    reason = "tower counts stay far below 2^52"
)]
fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let raw = part as f64 / whole as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}
