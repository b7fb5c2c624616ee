use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use shared::types::ArchiveDocument;
use super::{ArchiveIndex, IndexItem, ItemOutcome};

#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// Flush once this many documents are buffered
    pub batch_size: usize,
    /// Flush a non-empty buffer at least this often
    pub flush_interval: Duration,
    /// A bulk call still running after this long is abandoned as failed
    pub flush_timeout: Duration,
}

#[derive(Debug, Error)]
#[error("archive writer has stopped")]
pub struct ArchiveClosed;

#[derive(Debug, Default)]
pub struct ArchiveStats {
    submitted: AtomicU64,
    indexed: AtomicU64,
    failed: AtomicU64,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveStatsSnapshot {
    pub submitted: u64,
    pub indexed: u64,
    pub failed: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
}

impl ArchiveStats {
    pub fn snapshot(&self) -> ArchiveStatsSnapshot {
        ArchiveStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
        }
    }
}

/// Submission side of the archive buffer. Cheap to clone; `submit` never waits.
#[derive(Clone)]
pub struct ArchiveWriter {
    tx: flume::Sender<IndexItem>,
    stats: Arc<ArchiveStats>,
}

impl ArchiveWriter {
    /// Start the flush task. It runs until `close` is cancelled, then drains
    /// whatever was submitted and flushes one last time.
    pub fn spawn(
        index: Arc<dyn ArchiveIndex>,
        config: WriterConfig,
        close: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = flume::unbounded();
        let stats = Arc::new(ArchiveStats::default());

        let handle = tokio::spawn(run(index, rx, config, stats.clone(), close));
        (Self { tx, stats }, handle)
    }

    /// Queue a document under a fresh id and return that id
    pub fn submit(&self, document: ArchiveDocument) -> Result<String, ArchiveClosed> {
        let id = Uuid::new_v4().to_string();
        self.tx
            .send(IndexItem {
                id: id.clone(),
                document,
            })
            .map_err(|_| ArchiveClosed)?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    pub fn stats(&self) -> Arc<ArchiveStats> {
        self.stats.clone()
    }
}

async fn run(
    index: Arc<dyn ArchiveIndex>,
    rx: flume::Receiver<IndexItem>,
    config: WriterConfig,
    stats: Arc<ArchiveStats>,
    close: CancellationToken,
) {
    let batch_size = config.batch_size.max(1);
    let mut buffer: Vec<IndexItem> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + config.flush_interval,
        config.flush_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = rx.recv_async() => {
                let Ok(item) = item else { break };
                buffer.push(item);
                if buffer.len() >= batch_size {
                    flush(index.as_ref(), &mut buffer, &stats, config.flush_timeout).await;
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(index.as_ref(), &mut buffer, &stats, config.flush_timeout).await;
                }
            }
            _ = close.cancelled() => break,
        }
    }

    while let Ok(item) = rx.try_recv() {
        buffer.push(item);
        if buffer.len() >= batch_size {
            flush(index.as_ref(), &mut buffer, &stats, config.flush_timeout).await;
        }
    }
    if !buffer.is_empty() {
        flush(index.as_ref(), &mut buffer, &stats, config.flush_timeout).await;
    }

    tracing::info!("Archive writer stopped");
}

/// One bulk call for the whole buffer. Failures and timeouts are logged
/// and dropped.
async fn flush(index: &dyn ArchiveIndex, buffer: &mut Vec<IndexItem>, stats: &ArchiveStats, timeout: Duration) {
    let batch = std::mem::take(buffer);
    stats.flushes.fetch_add(1, Ordering::Relaxed);

    let result = match tokio::time::timeout(timeout, index.bulk_insert(&batch)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(
                "Bulk insert of {} documents timed out after {:?}",
                batch.len(),
                timeout
            );
            stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
            stats.failed.fetch_add(batch.len() as u64, Ordering::Relaxed);
            return;
        }
    };

    match result {
        Ok(outcomes) => {
            let mut failed = batch.len().saturating_sub(outcomes.len()) as u64;
            let mut indexed = 0u64;
            for outcome in outcomes {
                match outcome {
                    ItemOutcome::Created { id } => {
                        indexed += 1;
                        tracing::debug!("Document {} added to the index", id);
                    }
                    ItemOutcome::Failed { id, reason } => {
                        failed += 1;
                        tracing::warn!("Failed to index document {}: {}", id, reason);
                    }
                }
            }
            stats.indexed.fetch_add(indexed, Ordering::Relaxed);
            stats.failed.fetch_add(failed, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::error!("Bulk insert of {} documents failed: {}", batch.len(), e);
            stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
            stats.failed.fetch_add(batch.len() as u64, Ordering::Relaxed);
        }
    }
}
