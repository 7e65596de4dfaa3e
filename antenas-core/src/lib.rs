//! Core types, dataset loading, and query evaluation for the antenas tower dataset.

/// GeoJSON projections of tower records.
pub mod geo;
/// Cached, single-flight dataset loader.
pub mod loader;
/// Tower records and dataset snapshots.
pub mod model;
/// Traits describing dataset sources and their errors.
pub mod ports;
/// Pure filter, proximity, and aggregation functions.
pub mod query;
/// High-level service facade used by clients.
pub mod service;

pub use geo::*;
pub use loader::*;
pub use model::*;
pub use ports::*;
pub use query::*;
pub use service::*;
