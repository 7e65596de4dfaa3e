//! GeoJSON projections of tower records.

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value};

use crate::model::{TowerRecord, UNKNOWN};
use crate::query::{operator_key, technology_key};

/// Project records with coordinates onto `Point` features; others are skipped.
pub fn feature_collection<'a, I, F>(records: I, properties: F) -> FeatureCollection
where
    I: IntoIterator<Item = &'a TowerRecord>,
    F: Fn(&TowerRecord) -> JsonObject,
{
    let features = records
        .into_iter()
        .filter_map(|record| {
            let (lat, lon) = record.coordinates()?;
            Some(Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Point(vec![lon, lat]))),
                id: None,
                properties: Some(properties(record)),
                foreign_members: None,
            })
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Properties for the full dataset export: address and operator, nulls kept.
#[must_use]
pub fn export_properties(record: &TowerRecord) -> JsonObject {
    let mut properties = JsonObject::new();
    properties.insert("direccion".to_owned(), optional(record.address.as_deref()));
    properties.insert("operador".to_owned(), optional(record.operator.as_deref()));
    // no source publishes a link per tower
    properties.insert("url".to_owned(), JsonValue::Null);
    properties
}

/// Properties for the map viewport, with readable fallbacks for missing values.
#[must_use]
pub fn map_properties(record: &TowerRecord) -> JsonObject {
    let province = record
        .address
        .as_deref()
        .filter(|address| !address.is_empty())
        .and_then(|_| record.address_province())
        .unwrap_or(UNKNOWN);

    let mut properties = JsonObject::new();
    properties.insert("id".to_owned(), JsonValue::from(record.id));
    properties.insert("operador".to_owned(), JsonValue::from(operator_key(record)));
    properties.insert("tecnologia".to_owned(), JsonValue::from(technology_key(record)));
    properties.insert("provincia".to_owned(), JsonValue::from(province));
    properties
}

fn optional(value: Option<&str>) -> JsonValue {
    value.map_or(JsonValue::Null, JsonValue::from)
}
