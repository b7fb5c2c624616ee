use std::time::Duration;
use async_trait::async_trait;
use super::{CacheError, RecordCache};

/// Redis-backed cache using a `ConnectionManager`, which multiplexes one
/// connection and reconnects on its own.
#[derive(Clone)]
pub struct RedisCache {
    connection_manager: ::redis::aio::ConnectionManager,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = ::redis::Client::open(url)
            .map_err(|e| CacheError::Connection(format!("Failed to create Redis client: {}", e)))?;

        let connection_manager = ::redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!("Connected to Redis at {}", redact_url(url));
        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl RecordCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection_manager.clone();
        let result: Option<String> = ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("Redis GET failed: {}", e)))?;

        if result.is_some() {
            tracing::debug!(key, "Cache HIT");
        } else {
            tracing::debug!(key, "Cache MISS");
        }
        Ok(result)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let ttl_seconds = ttl.as_secs().max(1);

        ::redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_seconds)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("Redis SETEX failed: {}", e)))?;

        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}

/// Redact credentials from a Redis URL for logging
fn redact_url(url: &str) -> String {
    let userinfo_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if colon_pos >= userinfo_start {
                return format!("{}***{}", &url[..=colon_pos], &url[at_pos..]);
            }
        }
    }
    url.to_string()
}
