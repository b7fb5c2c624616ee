use std::sync::Arc;
use chrono::Utc;
use thiserror::Error;
use shared::types::{ArchiveDocument, ServerRecord, ServerStatus, Signal};
use crate::archive::writer::{ArchiveClosed, ArchiveWriter};
use crate::resolver::{EntityResolver, ResolveError, Resolution};
use crate::tracker::LivenessTracker;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to resolve server: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Archive(#[from] ArchiveClosed),
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub record: ServerRecord,
    pub resolution: Resolution,
    pub document_id: String,
}

/// Handles one signal at a time; shared by every worker.
pub struct SignalProcessor {
    tracker: Arc<LivenessTracker>,
    resolver: EntityResolver,
    archive: ArchiveWriter,
}

impl SignalProcessor {
    pub fn new(tracker: Arc<LivenessTracker>, resolver: EntityResolver, archive: ArchiveWriter) -> Self {
        Self {
            tracker,
            resolver,
            archive,
        }
    }

    /// Mark, resolve, refresh, re-cache, archive. Stops at the first failure
    /// except the re-cache, which only degrades the next lookup.
    pub async fn process(&self, signal: Signal) -> Result<ProcessOutcome, ProcessError> {
        self.tracker.mark_seen(&signal.address);

        let resolved = self.resolver.resolve(&signal.address).await?;
        let mut record = resolved.record;
        record.status = ServerStatus::Up;
        record.last_updated = Utc::now();

        if let Err(e) = self.resolver.cache_record(&record).await {
            tracing::warn!("Failed to cache server {}: {}", record.address, e);
        }

        let document_id = self.archive.submit(ArchiveDocument::new(record.clone(), &signal))?;

        Ok(ProcessOutcome {
            record,
            resolution: resolved.resolution,
            document_id,
        })
    }
}
