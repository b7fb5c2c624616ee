use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol::DEFAULT_TOPIC;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Messages the topic holds before publishers are refused
    #[serde(default = "default_topic_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bounded queue between the dispatcher and the worker pool
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheProvider {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_provider")]
    pub provider: CacheProvider,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Base URL of the archival index; archival is disabled when unset
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
    /// Upper bound on one bulk request, including the connection
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_period")]
    pub period_secs: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8082".to_string()
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_topic_capacity() -> usize {
    4096
}

fn default_workers() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    100
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/healthcheck/servers.db")
}

fn default_cache_provider() -> CacheProvider {
    CacheProvider::Memory
}

fn default_cache_ttl() -> u64 {
    600
}

fn default_memory_capacity() -> u64 {
    100_000
}

fn default_index() -> String {
    "heartbeats".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_flush_interval() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_reconcile_period() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            capacity: default_topic_capacity(),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            provider: default_cache_provider(),
            url: None,
            ttl_secs: default_cache_ttl(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            url: None,
            index: default_index(),
            api_key: None,
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            period_secs: default_reconcile_period(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl ArchiveConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ReconcileConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the file when present, fall back to defaults otherwise, then apply
    /// environment overrides and validate.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::info!("No config file at {}, using defaults", path.display());
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides. `lookup` returns the value of a variable.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(listen) = lookup("HEALTHCHECKD_LISTEN") {
            self.api.listen = listen;
        }
        if let Some(topic) = lookup("HEALTHCHECKD_TOPIC") {
            self.transport.topic = topic;
        }
        if let Some(db_path) = lookup("HEALTHCHECKD_DB_PATH") {
            self.store.db_path = PathBuf::from(db_path);
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.cache.provider = CacheProvider::Redis;
            self.cache.url = Some(url);
        }
        if let Some(workers) = lookup("HEALTHCHECKD_WORKERS") {
            self.intake.workers = parse_var("HEALTHCHECKD_WORKERS", &workers)?;
        }
        if let Some(capacity) = lookup("HEALTHCHECKD_QUEUE_CAPACITY") {
            self.intake.queue_capacity = parse_var("HEALTHCHECKD_QUEUE_CAPACITY", &capacity)?;
        }
        if let Some(period) = lookup("HEALTHCHECKD_RECONCILE_PERIOD_SECS") {
            self.reconcile.period_secs = parse_var("HEALTHCHECKD_RECONCILE_PERIOD_SECS", &period)?;
        }
        if let Some(url) = lookup("ELASTIC_URL") {
            self.archive.url = Some(url);
        }
        if let Some(key) = lookup("ELASTIC_API_KEY") {
            self.archive.api_key = Some(key);
        }
        if let Some(index) = lookup("ELASTIC_INDEX") {
            self.archive.index = index;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.intake.workers == 0 {
            bail!("intake.workers must be at least 1");
        }
        if self.intake.queue_capacity == 0 {
            bail!("intake.queue_capacity must be at least 1");
        }
        if self.transport.capacity == 0 {
            bail!("transport.capacity must be at least 1");
        }
        if self.archive.batch_size == 0 {
            bail!("archive.batch_size must be at least 1");
        }
        if self.archive.flush_interval_ms == 0 {
            bail!("archive.flush_interval_ms must be at least 1");
        }
        if self.archive.request_timeout_ms == 0 {
            bail!("archive.request_timeout_ms must be at least 1");
        }
        if self.reconcile.period_secs == 0 {
            bail!("reconcile.period_secs must be at least 1");
        }
        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be at least 1");
        }
        if self.cache.provider == CacheProvider::Redis && self.cache.url.is_none() {
            bail!("cache.url is required for the redis provider");
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", name, value, e))
}
