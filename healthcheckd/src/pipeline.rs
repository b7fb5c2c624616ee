//! Wiring of the ingestion pipeline and its shutdown sequence.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::archive::{ArchiveIndex, ArchiveStats, ArchiveWriter, WriterConfig};
use crate::cache::RecordCache;
use crate::config::Config;
use crate::dispatcher::{DispatchSummary, IntakeDispatcher};
use crate::pool::WorkerPool;
use crate::processor::SignalProcessor;
use crate::reconcile::{Reconciler, ReconcilerStatus};
use crate::resolver::EntityResolver;
use crate::store::ServerStore;
use crate::tracker::LivenessTracker;
use crate::transport::SignalSource;

/// External back-ends the pipeline talks to
pub struct Collaborators {
    pub source: Arc<dyn SignalSource>,
    pub store: Arc<dyn ServerStore>,
    pub cache: Arc<dyn RecordCache>,
    pub index: Arc<dyn ArchiveIndex>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub cache_ttl: Duration,
    pub archive: WriterConfig,
    pub reconcile_period: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.intake.workers,
            queue_capacity: config.intake.queue_capacity,
            cache_ttl: config.cache.ttl(),
            archive: WriterConfig {
                batch_size: config.archive.batch_size,
                flush_interval: config.archive.flush_interval(),
                flush_timeout: config.archive.request_timeout(),
            },
            reconcile_period: config.reconcile.period(),
        }
    }
}

pub struct Pipeline {
    tracker: Arc<LivenessTracker>,
    reconciler_status: watch::Receiver<ReconcilerStatus>,
    archive_stats: Arc<ArchiveStats>,
    intake: CancellationToken,
    reconcile_cancel: CancellationToken,
    archive_close: CancellationToken,
    dispatcher: JoinHandle<DispatchSummary>,
    workers: WorkerPool,
    reconciler: JoinHandle<()>,
    archive: JoinHandle<()>,
}

impl Pipeline {
    /// Spawn every loop. Cancelling `intake` stops transport reads; call
    /// [`Pipeline::shutdown`] to drain the rest.
    pub fn start(collaborators: Collaborators, settings: PipelineSettings, intake: CancellationToken) -> Self {
        let Collaborators {
            source,
            store,
            cache,
            index,
        } = collaborators;

        let tracker = Arc::new(LivenessTracker::new());

        let archive_close = CancellationToken::new();
        let (archive_writer, archive) = ArchiveWriter::spawn(index, settings.archive, archive_close.clone());
        let archive_stats = archive_writer.stats();

        let resolver = EntityResolver::new(cache, store.clone(), settings.cache_ttl);
        let processor = Arc::new(SignalProcessor::new(tracker.clone(), resolver, archive_writer));

        let (queue_tx, queue_rx) = flume::bounded(settings.queue_capacity.max(1));
        let workers = WorkerPool::spawn(settings.workers, queue_rx, processor);
        let dispatcher = tokio::spawn(IntakeDispatcher::new(source, queue_tx).run(intake.clone()));

        let reconcile_cancel = CancellationToken::new();
        let reconciler = Reconciler::new(tracker.clone(), store);
        let reconciler_status = reconciler.subscribe();
        let reconciler = tokio::spawn(reconciler.run(settings.reconcile_period, reconcile_cancel.clone()));

        tracing::info!(
            "Pipeline started: {} workers, queue capacity {}, reconcile every {}s",
            settings.workers,
            settings.queue_capacity,
            settings.reconcile_period.as_secs()
        );

        Self {
            tracker,
            reconciler_status,
            archive_stats,
            intake,
            reconcile_cancel,
            archive_close,
            dispatcher,
            workers,
            reconciler,
            archive,
        }
    }

    pub fn tracker(&self) -> Arc<LivenessTracker> {
        self.tracker.clone()
    }

    pub fn reconciler_status(&self) -> watch::Receiver<ReconcilerStatus> {
        self.reconciler_status.clone()
    }

    pub fn archive_stats(&self) -> Arc<ArchiveStats> {
        self.archive_stats.clone()
    }

    /// Stop intake, let workers finish what is queued, stop the reconciler,
    /// then close the archive writer so its last partial batch is flushed.
    pub async fn shutdown(self) {
        self.intake.cancel();
        if let Err(e) = self.dispatcher.await {
            tracing::error!("Intake dispatcher task failed: {}", e);
        }

        self.workers.join().await;

        self.reconcile_cancel.cancel();
        if let Err(e) = self.reconciler.await {
            tracing::error!("Reconciler task failed: {}", e);
        }

        self.archive_close.cancel();
        if let Err(e) = self.archive.await {
            tracing::error!("Archive writer task failed: {}", e);
        }

        tracing::info!("Pipeline stopped");
    }
}
