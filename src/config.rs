//! YAML configuration loaded once at startup.
//!
//! The file keeps the upper-case section names used by the deployed
//! `config.yaml`:
//!
//! ```yaml
//! WEBSITE:
//!   greenhousegas:
//!     articleList: https://example.org/list
//!     articleDetail: https://example.org/detail
//! DATABASE:
//!   QDRANT:
//!     HOST: localhost
//!     PORT: 6333
//!     API_KEY: ""
//! ```
//!
//! `EMBEDDING` and `CRAWLER` are optional and fall back to defaults.
//! `QDRANT_URI` and `OPENAI_API_KEY` in the environment override the file.

use crate::error::{Error, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    pub website: BTreeMap<String, SiteConfig>,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

/// Named URLs of one source site.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub article_list: String,
    pub article_detail: String,
    /// Target collection; the site name when absent.
    #[serde(default)]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DatabaseConfig {
    pub qdrant: QdrantConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct QdrantConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub api_key: String,
    /// `host:port` or full URL taken from `QDRANT_URI`.
    #[serde(skip)]
    pub uri: Option<String>,
}

impl QdrantConfig {
    /// Base URL of the Qdrant REST API.
    pub fn url(&self) -> String {
        let raw = self
            .uri
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port));
        if raw.starts_with("http://") || raw.starts_with("https://") {
            raw
        } else {
            format!("http://{raw}")
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub dimensions: Option<usize>,
    pub max_chunk_length: usize,
    pub batch_size: usize,
    pub max_retries: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: String::new(),
            dimensions: None,
            max_chunk_length: 2048,
            batch_size: 32,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct CrawlerConfig {
    pub data_dir: PathBuf,
    pub retry: usize,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub timeout_secs: u64,
    pub timezone: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            retry: 3,
            min_wait_ms: 3_000,
            max_wait_ms: 5_000,
            timeout_secs: 30,
            timezone: "Asia/Taipei".to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| Error::Config(format!("unknown timezone {:?}", self.timezone)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Config {
    /// Read, parse and apply environment overrides.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_yaml_str(&raw)?;
        config.apply_env(|key| std::env::var(key).ok());
        info!(
            sites = config.website.len(),
            qdrant = %config.database.qdrant.url(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)?;
        if config.crawler.min_wait_ms > config.crawler.max_wait_ms {
            return Err(Error::Config(format!(
                "MIN_WAIT_MS ({}) exceeds MAX_WAIT_MS ({})",
                config.crawler.min_wait_ms, config.crawler.max_wait_ms
            )));
        }
        config.crawler.tz()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(uri) = lookup("QDRANT_URI").filter(|v| !v.trim().is_empty()) {
            debug!(%uri, "QDRANT_URI overrides configured host/port");
            self.database.qdrant.uri = Some(uri);
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.embedding.api_key = key;
        }
    }

    pub fn site(&self, name: &str) -> Result<&SiteConfig> {
        self.website
            .get(name)
            .ok_or_else(|| Error::Config(format!("no WEBSITE entry for {name:?}")))
    }

    /// Collection a site writes to.
    pub fn collection_for(&self, site: &str) -> String {
        self.website
            .get(site)
            .and_then(|s| s.collection.clone())
            .unwrap_or_else(|| site.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
WEBSITE:
  greenhousegas:
    articleList: https://example.org/list
    articleDetail: https://example.org/detail
  other:
    articleList: https://other.org/list
    articleDetail: https://other.org/detail
    collection: esg
DATABASE:
  QDRANT:
    HOST: qdrant.local
    PORT: 6333
    API_KEY: secret
"#;

    #[test]
    fn test_parses_sections_and_defaults() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        let site = config.site("greenhousegas").unwrap();
        assert_eq!(site.article_list, "https://example.org/list");
        assert_eq!(site.article_detail, "https://example.org/detail");
        assert_eq!(config.database.qdrant.api_key, "secret");
        assert_eq!(config.crawler.retry, 3);
        assert_eq!(config.crawler.min_wait_ms, 3_000);
        assert_eq!(config.embedding.max_chunk_length, 2048);
        assert_eq!(config.crawler.tz().unwrap(), chrono_tz::Asia::Taipei);
    }

    #[test]
    fn test_collection_defaults_to_site_name() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.collection_for("greenhousegas"), "greenhousegas");
        assert_eq!(config.collection_for("other"), "esg");
    }

    #[test]
    fn test_unknown_site_is_config_error() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        assert!(matches!(config.site("nope"), Err(Error::Config(_))));
    }

    #[test]
    fn test_qdrant_url_and_env_override() {
        let mut config = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.database.qdrant.url(), "http://qdrant.local:6333");

        config.apply_env(|key| match key {
            "QDRANT_URI" => Some("10.0.0.5:7000".to_string()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            _ => None,
        });
        assert_eq!(config.database.qdrant.url(), "http://10.0.0.5:7000");
        assert_eq!(config.embedding.api_key, "sk-test");
    }

    #[test]
    fn test_rejects_inverted_wait_window() {
        let raw = format!("{SAMPLE}CRAWLER:\n  MIN_WAIT_MS: 10\n  MAX_WAIT_MS: 5\n");
        assert!(matches!(Config::from_yaml_str(&raw), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let raw = format!("{SAMPLE}CRAWLER:\n  TIMEZONE: Mars/Olympus\n");
        assert!(matches!(Config::from_yaml_str(&raw), Err(Error::Config(_))));
    }
}
