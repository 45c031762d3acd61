//! Configuration surface.
//!
//! [`Config::load`] is a minimal TOML-plus-env-override loader in the
//! common `serde` + `toml` shape; a deployment with richer secret
//! management needs is free to replace it without touching any collector
//! code, since everything downstream only depends on this struct.

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CollectorError;

fn default_server_bind() -> String {
    "0.0.0.0:9101".to_string()
}

fn default_feed_concurrency() -> usize {
    3
}

fn default_feed_timeout_secs() -> u64 {
    30
}

fn default_feed_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_nvd_page_size() -> u32 {
    2000
}

fn default_epss_page_size() -> u32 {
    5000
}

fn default_poll_interval_secs() -> u64 {
    3600
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Postgres connection string. Required; missing it is a fatal
    /// start-up error.
    #[serde(default)]
    pub database_url: String,

    #[serde(default = "default_server_bind")]
    pub server_bind: String,

    #[serde(default)]
    pub feeds: Vec<FeedConfig>,

    #[serde(default)]
    pub feed_collector: FeedCollectorConfig,

    #[serde(default)]
    pub nvd: NvdConfig,

    #[serde(default)]
    pub kev: CatalogConfig,

    #[serde(default)]
    pub epss: CatalogConfig,
}

/// One configured syndication feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    /// Optional hint ("rss" | "atom"); the parser auto-detects regardless,
    /// this is informational only.
    #[serde(default)]
    pub type_hint: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Collector-wide settings for the syndicated-feed collector that aren't
/// per-feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedCollectorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_feed_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_feed_timeout_secs")]
    pub per_feed_timeout_secs: u64,
    #[serde(default = "default_feed_max_bytes")]
    pub max_response_bytes: u64,
}

impl Default for FeedCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval_secs(),
            concurrency: default_feed_concurrency(),
            per_feed_timeout_secs: default_feed_timeout_secs(),
            max_response_bytes: default_feed_max_bytes(),
        }
    }
}

impl FeedCollectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn per_feed_timeout(&self) -> Duration {
        Duration::from_secs(self.per_feed_timeout_secs)
    }
}

/// Per-collector block shared by the NVD, KEV, and EPSS collectors:
/// `{enabled, poll-interval, url (override), page-size, optional api-key}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    pub url: Option<String>,
    pub page_size: Option<u32>,
    pub api_key: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval_secs(),
            url: None,
            page_size: None,
            api_key: None,
        }
    }
}

impl CatalogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Canonical-database collector block; adds the default page size
/// (2000).
#[derive(Debug, Clone, Deserialize)]
pub struct NvdConfig {
    #[serde(flatten)]
    pub common: CatalogConfig,
}

impl Default for NvdConfig {
    fn default() -> Self {
        Self {
            common: CatalogConfig {
                page_size: Some(default_nvd_page_size()),
                ..Default::default()
            },
        }
    }
}

impl NvdConfig {
    pub fn page_size(&self) -> u32 {
        self.common.page_size.unwrap_or_else(default_nvd_page_size)
    }
}

impl CatalogConfig {
    pub fn epss_page_size(&self) -> u32 {
        self.page_size.unwrap_or_else(default_epss_page_size)
    }
}

impl Config {
    /// Load configuration from the TOML file at `VULNCOLLECT_CONFIG`
    /// (default `./vulncollect.toml`), with `database_url` and
    /// `server_bind` overridable by `DATABASE_URL` / `SERVER_BIND`
    /// environment variables.
    pub fn load() -> Result<Self, CollectorError> {
        let path = env::var("VULNCOLLECT_CONFIG").unwrap_or_else(|_| "vulncollect.toml".into());
        let contents = std::fs::read_to_string(&path).unwrap_or_default();
        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| CollectorError::Malformed(format!("invalid config at {path}: {e}")))?;

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(bind) = env::var("SERVER_BIND") {
            config.server_bind = bind;
        }

        if config.database_url.trim().is_empty() {
            return Err(CollectorError::Malformed(
                "database_url is required (set it in config or DATABASE_URL)".into(),
            ));
        }

        Ok(config)
    }
}
