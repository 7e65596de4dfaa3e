//! Sources for the flat tower dataset format, read from an HTTP mirror or a local file.
//!
//! The flat format is a list of objects with the fields `id`, `operador`,
//! `tecnologia`, `banda`, `provincia`, `municipio`, `direccion`, `lat` and
//! `lon`. Mirrors publish it either as one JSON array or as one object per
//! line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::fs;
use tracing::debug;

use antenas_core::{
    model::SourceRecord,
    ports::{DatasetSource, SourceError, SourceMeta},
};

/// Public mirror of the flat dataset.
pub const MIRROR_URL: &str =
    "https://drive.google.com/uc?export=download&id=156kbTsnPQzPh-z0Fz1wc3DdvLEonShKd";

/// Dataset source downloading the flat format over HTTP.
pub struct MirrorSource {
    client: Client,
    meta: SourceMeta,
}

impl MirrorSource {
    /// Create a source for the given URL.
    #[must_use]
    pub fn new<U: Into<String>>(client: Client, url: U) -> Self {
        Self {
            client,
            meta: SourceMeta::new("mirror", url),
        }
    }
}

#[async_trait]
impl DatasetSource for MirrorSource {
    fn describe(&self) -> &SourceMeta {
        &self.meta
    }

    async fn fetch(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let payload = self
            .client
            .get(&self.meta.location)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        debug!(bytes = payload.len(), "Downloaded mirror payload");
        parse_records(&payload)
    }
}

/// Dataset source reading the flat format from disk.
pub struct FileSource {
    path: PathBuf,
    meta: SourceMeta,
}

impl FileSource {
    /// Create a source for the file at `path`.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let meta = SourceMeta::new("file", path.display().to_string());
        Self { path, meta }
    }

    /// Path this source reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DatasetSource for FileSource {
    fn describe(&self) -> &SourceMeta {
        &self.meta
    }

    async fn fetch(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let payload = fs::read_to_string(&self.path).await?;
        let mut records = parse_records(&payload)?;

        // Tag provenance with the file name unless the record already carries one.
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        for record in &mut records {
            if record.source_file.is_none() {
                record.source_file.clone_from(&file_name);
            }
        }

        Ok(records)
    }
}

/// Build the source for the public mirror.
#[must_use]
pub fn source(client: Client) -> Arc<dyn DatasetSource> {
    Arc::new(MirrorSource::new(client, MIRROR_URL))
}

/// Parse a flat dataset given as a JSON array or as one JSON object per line.
///
/// In the line-delimited form, lines that are not a `{...}` object are skipped.
///
/// # Errors
///
/// Returns [`SourceError::Parse`] when an array or object line is invalid JSON
/// for a record and [`SourceError::Malformed`] when the payload holds no
/// records at all in either form.
pub fn parse_records(payload: &str) -> Result<Vec<SourceRecord>, SourceError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(SourceError::Malformed("empty payload".to_owned()));
    }

    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let records = trimmed
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.ends_with('}'))
        .map(serde_json::from_str::<SourceRecord>)
        .collect::<Result<Vec<_>, _>>()?;

    if records.is_empty() {
        return Err(SourceError::Malformed(
            "payload contains no tower records".to_owned(),
        ));
    }
    Ok(records)
}
