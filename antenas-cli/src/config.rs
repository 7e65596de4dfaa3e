use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use antenas_core::{DatasetSource, LoaderConfig};
use antenas_provider_geoportal::{GeoportalSource, WFS_URL};
use antenas_provider_mirror::{FileSource, MIRROR_URL, MirrorSource};
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) source: SourceConfig,
    pub(crate) cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum SourceKind {
    Geoportal,
    #[default]
    Mirror,
    File,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub(crate) struct SourceConfig {
    pub(crate) kind: SourceKind,
    // overrides the built-in endpoint of the geoportal and mirror kinds
    pub(crate) url: Option<String>,
    pub(crate) path: Option<PathBuf>,
    pub(crate) timeout_secs: u64,
    pub(crate) user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            url: None,
            path: None,
            timeout_secs: 120,
            user_agent: "antenas/0.1".to_owned(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CacheConfig {
    // unset means the snapshot never expires
    pub(crate) ttl_secs: Option<u64>,
}

impl Config {
    pub(crate) fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            ttl: self.cache.ttl_secs.map(Duration::from_secs),
            fetch_timeout: Duration::from_secs(self.source.timeout_secs),
        }
    }

    pub(crate) fn build_source(&self) -> Result<Arc<dyn DatasetSource>> {
        let source: Arc<dyn DatasetSource> = match self.source.kind {
            SourceKind::Geoportal => {
                let url = self.source.url.as_deref().unwrap_or(WFS_URL);
                Arc::new(GeoportalSource::with_url(self.http_client()?, url))
            }
            SourceKind::Mirror => {
                let url = self.source.url.as_deref().unwrap_or(MIRROR_URL);
                Arc::new(MirrorSource::new(self.http_client()?, url))
            }
            SourceKind::File => {
                let Some(path) = self.source.path.as_deref() else {
                    bail!("source.path is required when source.kind = \"file\"");
                };
                Arc::new(FileSource::new(path))
            }
        };
        Ok(source)
    }

    fn http_client(&self) -> Result<Client> {
        Client::builder()
            .user_agent(self.source.user_agent.as_str())
            .timeout(Duration::from_secs(self.source.timeout_secs))
            .build()
            .context("Failed to build HTTP client")
    }
}

pub(crate) fn parse(data: &str) -> Result<Config> {
    toml::from_str(data).context("Failed to parse config")
}

pub(crate) fn load(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path).context("Failed to read config")?;
    parse(&data)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("").expect("empty config");
        assert_eq!(config.source.kind, SourceKind::Mirror);
        assert_eq!(config.source.timeout_secs, 120);

        let loader = config.loader_config();
        assert_eq!(loader.ttl, None);
        assert_eq!(loader.fetch_timeout, Duration::from_secs(120));
    }

    #[test]
    fn reads_source_and_cache_sections() {
        let config = parse(
            r#"
            [source]
            kind = "geoportal"
            timeout_secs = 300

            [cache]
            ttl_secs = 21600
            "#,
        )
        .expect("valid config");

        assert_eq!(config.source.kind, SourceKind::Geoportal);
        assert_eq!(config.loader_config().ttl, Some(Duration::from_secs(6 * 60 * 60)));
        assert_eq!(config.loader_config().fetch_timeout, Duration::from_secs(300));

        let source = config.build_source().expect("geoportal source");
        assert_eq!(source.describe().name, "geoportal");
        assert_eq!(source.describe().location, WFS_URL);
    }

    #[test]
    fn file_kind_requires_path() {
        let config = parse("[source]\nkind = \"file\"\n").expect("valid config");
        assert!(config.build_source().is_err());

        let config = parse("[source]\nkind = \"file\"\npath = \"antenas.json\"\n").expect("valid config");
        let source = config.build_source().expect("file source");
        assert_eq!(source.describe().location, "antenas.json");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(parse("[source]\nkind = \"ftp\"\n").is_err());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[source]\nurl = \"https://mirror.example/antenas.json\"").expect("write config");

        let config = load(file.path()).expect("config file");
        let source = config.build_source().expect("mirror source");
        assert_eq!(source.describe().location, "https://mirror.example/antenas.json");
    }
}
