//! In-process doubles for the pipeline's collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use chrono::Utc;
use shared::types::{ArchiveDocument, ServerRecord, ServerStatus};
use crate::archive::{ArchiveIndex, IndexError, IndexItem, ItemOutcome};
use crate::cache::{CacheError, MemoryCache, RecordCache};
use crate::store::{Membership, ServerDb, ServerStore, StoreError, StoreHandle};

pub fn sqlite_store() -> StoreHandle {
    StoreHandle::spawn(ServerDb::open(":memory:").unwrap())
}

pub fn memory_cache() -> Arc<MemoryCache> {
    Arc::new(MemoryCache::new(1000, Duration::from_secs(600)))
}

pub fn document(n: i64) -> ArchiveDocument {
    ArchiveDocument {
        server: ServerRecord {
            id: n,
            name: format!("10.0.0.{}", n),
            address: format!("10.0.0.{}", n),
            status: ServerStatus::Up,
            created_at: Utc::now(),
            last_updated: Utc::now(),
        },
        observed_at_millis: 1_700_000_000_000 + n,
        duration_seconds: 15,
    }
}

/// Poll `check` for up to two seconds
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Records every batch; fails the bulk calls whose 0-based number is listed
#[derive(Default)]
pub struct RecordingIndex {
    pub batches: Mutex<Vec<Vec<IndexItem>>>,
    pub fail_calls: Vec<usize>,
}

impl RecordingIndex {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_calls: calls.to_vec(),
            ..Default::default()
        }
    }

    pub fn documents(&self) -> Vec<IndexItem> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl ArchiveIndex for RecordingIndex {
    async fn bulk_insert(&self, items: &[IndexItem]) -> Result<Vec<ItemOutcome>, IndexError> {
        let mut batches = self.batches.lock();
        let call = batches.len();
        batches.push(items.to_vec());
        if self.fail_calls.contains(&call) {
            return Err(IndexError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(items
            .iter()
            .map(|i| ItemOutcome::Created { id: i.id.clone() })
            .collect())
    }
}

/// Index whose bulk calls never complete
#[derive(Default)]
pub struct HangingIndex {
    calls: AtomicUsize,
}

impl HangingIndex {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveIndex for HangingIndex {
    async fn bulk_insert(&self, _items: &[IndexItem]) -> Result<Vec<ItemOutcome>, IndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Cache whose every call fails
pub struct BrokenCache;

#[async_trait]
impl RecordCache for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Connection("refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Connection("refused".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "broken"
    }
}

/// Store whose every call fails as if the thread had gone away
pub struct DownStore;

#[async_trait]
impl ServerStore for DownStore {
    async fn create(
        &self,
        _name: &str,
        _address: &str,
        _status: ServerStatus,
    ) -> Result<ServerRecord, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn find_by_address(&self, _address: &str) -> Result<Option<ServerRecord>, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn set_status(
        &self,
        _addresses: Vec<String>,
        _membership: Membership,
        _status: ServerStatus,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn list(&self) -> Result<Vec<ServerRecord>, StoreError> {
        Err(StoreError::Unavailable)
    }
}
