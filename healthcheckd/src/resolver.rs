//! Cache-aside resolution of an address to its server record.
//!
//! Lookup order is fast-path cache, then durable store, then create. Two
//! resolvers (in this process or another) can both miss and both try to
//! create; the store's unique constraint lets exactly one win and the loser
//! re-fetches the winner's record.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use shared::protocol::server_cache_key;
use shared::types::{CachedRecord, ServerRecord, ServerStatus};
use crate::cache::{CacheError, RecordCache};
use crate::store::{ServerStore, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("server {address} conflicted on create but could not be re-fetched")]
    Vanished { address: String },
}

/// Where a resolved record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Cache,
    Store,
    Created,
    /// Lost a creation race and re-fetched the winner's record
    CreatedElsewhere,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub record: ServerRecord,
    pub resolution: Resolution,
}

#[derive(Clone)]
pub struct EntityResolver {
    cache: Arc<dyn RecordCache>,
    store: Arc<dyn ServerStore>,
    cache_ttl: Duration,
}

impl EntityResolver {
    pub fn new(cache: Arc<dyn RecordCache>, store: Arc<dyn ServerStore>, cache_ttl: Duration) -> Self {
        Self {
            cache,
            store,
            cache_ttl,
        }
    }

    pub async fn resolve(&self, address: &str) -> Result<Resolved, ResolveError> {
        if let Some(record) = self.cached(address).await {
            return Ok(Resolved {
                record,
                resolution: Resolution::Cache,
            });
        }

        if let Some(record) = self.store.find_by_address(address).await? {
            return Ok(Resolved {
                record,
                resolution: Resolution::Store,
            });
        }

        match self.store.create(address, address, ServerStatus::Up).await {
            Ok(record) => {
                tracing::info!("Server created: {} (id {})", record.address, record.id);
                Ok(Resolved {
                    record,
                    resolution: Resolution::Created,
                })
            }
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!("Lost creation race for {}, re-fetching", address);
                match self.store.find_by_address(address).await? {
                    Some(record) => Ok(Resolved {
                        record,
                        resolution: Resolution::CreatedElsewhere,
                    }),
                    None => Err(ResolveError::Vanished {
                        address: address.to_string(),
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a record to the fast-path cache under its address key, refreshing the TTL
    pub async fn cache_record(&self, record: &ServerRecord) -> Result<(), CacheError> {
        let value = CachedRecord::encode(record)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.cache
            .set(&server_cache_key(&record.address), &value, self.cache_ttl)
            .await
    }

    /// Cache lookup. Errors and undecodable entries count as a miss.
    async fn cached(&self, address: &str) -> Option<ServerRecord> {
        let key = server_cache_key(address);
        match self.cache.get(&key).await {
            Ok(Some(value)) => {
                let record = CachedRecord::decode(&value);
                if record.is_none() {
                    tracing::warn!("Ignoring undecodable cache entry {}", key);
                }
                record
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    "{} cache lookup for {} failed, falling back to store: {}",
                    self.cache.provider_name(),
                    key,
                    e
                );
                None
            }
        }
    }
}
