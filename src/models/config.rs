//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Collection;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream catalog API access and rate limits
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Document index connection and collection names
    #[serde(default)]
    pub index: IndexConfig,

    /// Where the sweep cursor is persisted
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Crawl loop behavior
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// In-memory lookup cache
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.client_id.trim().is_empty() {
            return Err(AppError::validation("upstream.client_id is empty"));
        }
        if self.upstream.client_secret.trim().is_empty() {
            return Err(AppError::validation("upstream.client_secret is empty"));
        }
        if self.upstream.username.is_some() != self.upstream.password.is_some() {
            return Err(AppError::validation(
                "upstream.username and upstream.password must be set together",
            ));
        }
        if self.upstream.max_requests_per_minute == 0 {
            return Err(AppError::validation(
                "upstream.max_requests_per_minute must be > 0",
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(AppError::validation("upstream.timeout_secs must be > 0"));
        }
        if self.index.maps_collection == self.index.sets_collection {
            return Err(AppError::validation(
                "index.maps_collection and index.sets_collection must differ",
            ));
        }
        if self.crawler.strategies.is_empty() {
            return Err(AppError::validation("No crawl strategies configured"));
        }
        if self.crawler.backoff_unit_ms == 0 {
            return Err(AppError::validation("crawler.backoff_unit_ms must be > 0"));
        }
        if self.crawler.max_backoff_units == 0 {
            return Err(AppError::validation(
                "crawler.max_backoff_units must be > 0",
            ));
        }
        if self.crawler.map_batch_size == 0 {
            return Err(AppError::validation("crawler.map_batch_size must be > 0"));
        }
        if self.cache.capacity == 0 {
            return Err(AppError::validation("cache.capacity must be > 0"));
        }
        Ok(())
    }
}

/// Upstream API credentials, endpoints and rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the versioned API, without trailing path
    #[serde(default = "defaults::api_base_url")]
    pub api_base_url: String,

    /// OAuth2 token endpoint
    #[serde(default = "defaults::token_url")]
    pub token_url: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default = "defaults::scope")]
    pub scope: String,

    /// Resource-owner grant; client-credentials is used when unset
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum spacing between two upstream calls in milliseconds
    #[serde(default = "defaults::request_interval")]
    pub request_interval_ms: u64,

    /// Cap on calls within one 60-second window
    #[serde(default = "defaults::max_requests_per_minute")]
    pub max_requests_per_minute: u32,
}

impl UpstreamConfig {
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base_url: defaults::api_base_url(),
            token_url: defaults::token_url(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: defaults::scope(),
            username: None,
            password: None,
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_interval_ms: defaults::request_interval(),
            max_requests_per_minute: defaults::max_requests_per_minute(),
        }
    }
}

/// Document index connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "defaults::index_url")]
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "defaults::maps_collection")]
    pub maps_collection: String,

    #[serde(default = "defaults::sets_collection")]
    pub sets_collection: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl IndexConfig {
    /// Index name backing a collection.
    pub fn collection_name(&self, collection: Collection) -> &str {
        match collection {
            Collection::Maps => &self.maps_collection,
            Collection::Sets => &self.sets_collection,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: defaults::index_url(),
            username: None,
            password: None,
            maps_collection: defaults::maps_collection(),
            sets_collection: defaults::sets_collection(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Cursor persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    #[serde(default = "defaults::cursor_path")]
    pub path: PathBuf,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            path: defaults::cursor_path(),
        }
    }
}

/// A crawl loop the runner can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Cursor-driven walk of the recently-updated listing
    Sweep,
    /// Walk of the set ID space past the highest indexed set
    DiscoverSets,
    /// Batched walk of the map ID space past the highest indexed map
    DiscoverMaps,
}

/// Crawl loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Loops started by `run`
    #[serde(default = "defaults::strategies")]
    pub strategies: Vec<StrategyKind>,

    /// Length of one backoff unit in milliseconds
    #[serde(default = "defaults::backoff_unit")]
    pub backoff_unit_ms: u64,

    /// Backoff ceiling, in units
    #[serde(default = "defaults::max_backoff_units")]
    pub max_backoff_units: u32,

    /// Upstream sort order used by the sweep
    #[serde(default = "defaults::sweep_sort")]
    pub sweep_sort: String,

    /// Start a fresh sweep once the listing is exhausted
    #[serde(default = "defaults::restart_sweep")]
    pub restart_sweep: bool,

    /// Pause before a restarted sweep, in seconds
    #[serde(default = "defaults::sweep_restart_delay")]
    pub sweep_restart_delay_secs: u64,

    /// IDs requested per map discovery call
    #[serde(default = "defaults::map_batch_size")]
    pub map_batch_size: usize,
}

impl CrawlerConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            strategies: defaults::strategies(),
            backoff_unit_ms: defaults::backoff_unit(),
            max_backoff_units: defaults::max_backoff_units(),
            sweep_sort: defaults::sweep_sort(),
            restart_sweep: defaults::restart_sweep(),
            sweep_restart_delay_secs: defaults::sweep_restart_delay(),
            map_batch_size: defaults::map_batch_size(),
        }
    }
}

/// Lookup cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries per entity kind
    #[serde(default = "defaults::cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::StrategyKind;

    // Upstream defaults
    pub fn api_base_url() -> String {
        "https://osu.ppy.sh/api/v2".into()
    }
    pub fn token_url() -> String {
        "https://osu.ppy.sh/oauth/token".into()
    }
    pub fn scope() -> String {
        "public".into()
    }
    pub fn user_agent() -> String {
        concat!("mirror-crawler/", env!("CARGO_PKG_VERSION")).into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_interval() -> u64 {
        1000
    }
    pub fn max_requests_per_minute() -> u32 {
        60
    }

    // Index defaults
    pub fn index_url() -> String {
        "http://localhost:9200".into()
    }
    pub fn maps_collection() -> String {
        "beatmaps".into()
    }
    pub fn sets_collection() -> String {
        "beatmapsets".into()
    }

    pub fn cursor_path() -> PathBuf {
        PathBuf::from("storage/cursor.json")
    }

    // Crawler defaults
    pub fn strategies() -> Vec<StrategyKind> {
        vec![StrategyKind::Sweep, StrategyKind::DiscoverSets]
    }
    pub fn backoff_unit() -> u64 {
        1000
    }
    pub fn max_backoff_units() -> u32 {
        32
    }
    pub fn sweep_sort() -> String {
        "updated_desc".into()
    }
    pub fn restart_sweep() -> bool {
        true
    }
    pub fn sweep_restart_delay() -> u64 {
        300
    }
    pub fn map_batch_size() -> usize {
        50
    }

    pub fn cache_capacity() -> usize {
        10_000
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
