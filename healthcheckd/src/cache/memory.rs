use std::time::Duration;
use async_trait::async_trait;
use super::{CacheError, RecordCache};

/// In-process cache for single-instance deployments.
///
/// Entries share the TTL given at construction; the per-write TTL is ignored.
#[derive(Clone)]
pub struct MemoryCache {
    cache: moka::future::Cache<String, String>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl RecordCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let result = self.cache.get(key).await;
        if result.is_some() {
            tracing::debug!(key, "Cache HIT (memory)");
        } else {
            tracing::debug!(key, "Cache MISS (memory)");
        }
        Ok(result)
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), CacheError> {
        self.cache.insert(key.to_string(), value.to_string()).await;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_and_set() {
        let cache = MemoryCache::new(100, Duration::from_secs(60));
        assert_eq!(cache.get("server:10.0.0.1").await.unwrap(), None);

        cache
            .set("server:10.0.0.1", "{}", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("server:10.0.0.1").await.unwrap().as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryCache::new(100, Duration::from_millis(50));
        cache.set("k", "v", Duration::from_millis(50)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
