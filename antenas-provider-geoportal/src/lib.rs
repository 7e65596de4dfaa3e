//! Source implementation for the MINETUR geoportal using its WFS endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use antenas_core::{
    model::SourceRecord,
    ports::{DatasetSource, SourceError, SourceMeta},
};

/// WFS `GetFeature` request for the mobile tower layer, as GeoJSON.
pub const WFS_URL: &str = "https://geoportal.minetur.gob.es/VCTEL/services/QUERY_SERVICE/MapServer/WFSServer?service=WFS&request=GetFeature&typeName=vctel:estacionestelefonia&outputFormat=application/json";

/// Response body of the WFS request.
#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<Feature>,
}

/// Single tower feature.
#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Properties,
    geometry: Option<Geometry>,
}

/// Upper-case attribute table of the layer.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct Properties {
    #[serde(rename = "OBJECTID")]
    object_id: Option<u64>,
    operador: Option<String>,
    tecnologia: Option<String>,
    banda: Option<String>,
    provincia: Option<String>,
    municipio: Option<String>,
    direccion: Option<String>,
}

/// Geometry of a feature; the layer only publishes points.
#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(default)]
    coordinates: Value,
}

impl Geometry {
    /// `(lat, lon)` from a GeoJSON `[lon, lat]` position.
    fn lat_lon(&self) -> Option<(f64, f64)> {
        match self.coordinates.as_array()?.as_slice() {
            [lon, lat, ..] => Some((lat.as_f64()?, lon.as_f64()?)),
            _ => None,
        }
    }
}

/// Dataset source reading the geoportal WFS layer.
pub struct GeoportalSource {
    client: Client,
    meta: SourceMeta,
}

impl GeoportalSource {
    /// Create a source for the public WFS endpoint.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self::with_url(client, WFS_URL)
    }

    /// Create a source for a different WFS endpoint serving the same layer.
    #[must_use]
    pub fn with_url<U: Into<String>>(client: Client, url: U) -> Self {
        Self {
            client,
            meta: SourceMeta::new("geoportal", url),
        }
    }
}

#[async_trait]
impl DatasetSource for GeoportalSource {
    fn describe(&self) -> &SourceMeta {
        &self.meta
    }

    async fn fetch(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let response =
            fetch_json::<FeatureCollection>(self.client.get(&self.meta.location)).await?;
        let records = into_records(response)?;
        debug!(records = records.len(), "Parsed geoportal features");
        Ok(records)
    }
}

/// Build the source for the public geoportal endpoint.
#[must_use]
pub fn source(client: Client) -> Arc<dyn DatasetSource> {
    Arc::new(GeoportalSource::new(client))
}

fn into_records(response: FeatureCollection) -> Result<Vec<SourceRecord>, SourceError> {
    if response.kind != "FeatureCollection" {
        return Err(SourceError::Malformed(format!(
            "expected a FeatureCollection, got {}",
            response.kind
        )));
    }

    Ok(response
        .features
        .into_iter()
        .map(|feature| {
            let coordinates = feature.geometry.as_ref().and_then(Geometry::lat_lon);
            let properties = feature.properties;

            SourceRecord {
                id: properties.object_id,
                operator: properties.operador,
                technology: properties.tecnologia,
                band: properties.banda,
                province: properties.provincia,
                municipality: properties.municipio,
                address: properties.direccion,
                latitude: coordinates.map(|(lat, _)| lat),
                longitude: coordinates.map(|(_, lon)| lon),
                source_file: None,
            }
        })
        .collect())
}

// Small helper to fetch and decode JSON with status handling.
async fn fetch_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, SourceError> {
    req.send()
        .await
        .map_err(SourceError::from)?
        .error_for_status()
        .map_err(SourceError::from)?
        .json()
        .await
        .map_err(SourceError::from)
}
