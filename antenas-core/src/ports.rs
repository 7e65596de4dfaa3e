//! Traits describing dataset sources and shared helper types.

use std::io::Error as IoError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Error as ReqwestError;
use serde_json::Error as JsonError;

use crate::model::SourceRecord;

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while fetching the dataset from a source.
pub enum SourceError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    /// Reading a local dataset failed.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
    /// The payload was not valid JSON for the expected shape.
    #[error("Parse error: {0}")]
    Parse(#[from] JsonError),
    /// The payload parsed but does not describe a dataset.
    #[error("Malformed payload: {0}")]
    Malformed(String),
    /// The fetch did not finish within the configured timeout.
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
/// Static description of where a source reads its data from.
pub struct SourceMeta {
    /// Short identifier, e.g. "geoportal".
    pub name: String,
    /// URL or path the source reads.
    pub location: String,
}

impl SourceMeta {
    /// Construct source metadata.
    #[must_use]
    pub fn new<N: Into<String>, L: Into<String>>(name: N, location: L) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }
}

#[async_trait]
/// Trait for backends that can produce the full tower dataset.
pub trait DatasetSource: Send + Sync {
    /// Metadata describing this source.
    fn describe(&self) -> &SourceMeta;

    /// Fetch and parse the complete dataset.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the transfer fails or the payload cannot be parsed.
    async fn fetch(&self) -> Result<Vec<SourceRecord>, SourceError>;
}
