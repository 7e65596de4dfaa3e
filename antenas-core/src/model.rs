//! Domain data structures for tower records and dataset snapshots.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bucket name used when a record has no operator or technology.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A single mobile-network tower.
///
/// Field names on the wire follow the flat dataset format, so a snapshot can be
/// written back out as a dataset file.
pub struct TowerRecord {
    /// Identifier, unique within one snapshot only.
    pub id: u64,
    /// Network operator, e.g. "Telefónica".
    #[serde(rename = "operador", default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    /// Radio technology, e.g. "LTE".
    #[serde(rename = "tecnologia", default, skip_serializing_if = "Option::is_none")]
    pub technology: Option<String>,
    /// Frequency band.
    #[serde(rename = "banda", default, skip_serializing_if = "Option::is_none")]
    pub band: Option<String>,
    /// Province as published by the source, when it has a structured field.
    #[serde(rename = "provincia", default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    /// Municipality as published by the source, when it has a structured field.
    #[serde(rename = "municipio", default, skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
    /// Free-text address. The last comma-separated segment names the province.
    #[serde(rename = "direccion", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Latitude in degrees.
    #[serde(rename = "lat", default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    #[serde(rename = "lon", default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Provenance tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

impl TowerRecord {
    /// Both coordinates as `(lat, lon)`, if the record has them.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    /// Province bucket derived from the last comma segment of the address.
    ///
    /// Returns `None` when the record has no address at all.
    #[must_use]
    pub fn address_province(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(|address| address.rsplit(',').next().unwrap_or(address).trim())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// A tower as produced by a source, before identifiers are settled.
pub struct SourceRecord {
    /// Source-provided identifier, if any.
    #[serde(default)]
    pub id: Option<u64>,
    /// Network operator.
    #[serde(rename = "operador", default)]
    pub operator: Option<String>,
    /// Radio technology.
    #[serde(rename = "tecnologia", default)]
    pub technology: Option<String>,
    /// Frequency band.
    #[serde(rename = "banda", default)]
    pub band: Option<String>,
    /// Structured province field.
    #[serde(rename = "provincia", default)]
    pub province: Option<String>,
    /// Structured municipality field.
    #[serde(rename = "municipio", default)]
    pub municipality: Option<String>,
    /// Free-text address.
    #[serde(rename = "direccion", default)]
    pub address: Option<String>,
    /// Latitude in degrees.
    #[serde(rename = "lat", default)]
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    #[serde(rename = "lon", default)]
    pub longitude: Option<f64>,
    /// Provenance tag.
    #[serde(default)]
    pub source_file: Option<String>,
}

impl SourceRecord {
    fn into_record(self, id: u64) -> TowerRecord {
        TowerRecord {
            id,
            operator: self.operator,
            technology: self.technology,
            band: self.band,
            province: self.province,
            municipality: self.municipality,
            address: self.address,
            latitude: self.latitude,
            longitude: self.longitude,
            source_file: self.source_file,
        }
    }
}

/// Settle identifiers for one load pass.
///
/// If every record carries an id the source ids are kept. If any id is missing
/// the whole batch is renumbered `1..=n` in encounter order, which keeps ids
/// unique inside the snapshot.
#[must_use]
pub fn assign_ids(records: Vec<SourceRecord>) -> Vec<TowerRecord> {
    let complete = records.iter().all(|record| record.id.is_some());

    records
        .into_iter()
        .zip(1_u64..)
        .map(|(record, sequence)| {
            let id = if complete {
                record.id.unwrap_or(sequence)
            } else {
                sequence
            };
            record.into_record(id)
        })
        .collect()
}

#[derive(Debug, Clone)]
/// One immutable, fully-loaded copy of the dataset.
pub struct Snapshot {
    records: Vec<TowerRecord>,
    fetched_at: DateTime<Utc>,
    loaded_at: Instant,
}

impl Snapshot {
    /// Wrap a loaded record list, stamped with the current time.
    #[must_use]
    pub fn new(records: Vec<TowerRecord>) -> Self {
        Self {
            records,
            fetched_at: Utc::now(),
            loaded_at: Instant::now(),
        }
    }

    /// Records in dataset order.
    #[must_use]
    pub fn records(&self) -> &[TowerRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Wall-clock time of the fetch that produced this snapshot.
    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Monotonic time of the fetch, used for expiry.
    #[must_use]
    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }
}
