use std::sync::Arc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use shared::types::Signal;
use crate::processor::SignalProcessor;

/// Fixed set of workers sharing one bounded queue
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Each worker exits once the queue is disconnected and empty.
    pub fn spawn(workers: usize, queue: flume::Receiver<Signal>, processor: Arc<SignalProcessor>) -> Self {
        let handles = (0..workers.max(1))
            .map(|id| tokio::spawn(work(id, queue.clone(), processor.clone())))
            .collect();
        tracing::info!("Started {} workers", workers.max(1));
        Self { handles }
    }

    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!("Worker task failed: {}", e);
            }
        }
        tracing::info!("All workers stopped");
    }
}

async fn work(id: usize, queue: flume::Receiver<Signal>, processor: Arc<SignalProcessor>) {
    while let Ok(signal) = queue.recv_async().await {
        let address = signal.address.clone();
        match processor.process(signal).await {
            Ok(outcome) => tracing::debug!(
                "Worker {} processed signal from {} (server {}, {:?}, document {})",
                id,
                address,
                outcome.record.id,
                outcome.resolution,
                outcome.document_id
            ),
            Err(e) => tracing::error!("Worker {} failed to process signal from {}: {}", id, address, e),
        }
    }
    tracing::debug!("Worker {} stopped", id);
}
