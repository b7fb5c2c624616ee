//! Fast-path cache for server records.
//!
//! Never authoritative: every failure here degrades to a durable store lookup.

pub mod memory;
pub mod redis;

use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// Key/value store with per-write TTL
#[async_trait]
pub trait RecordCache: Send + Sync {
    /// `Ok(Some(value))` on hit, `Ok(None)` on miss
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    fn provider_name(&self) -> &'static str;
}
