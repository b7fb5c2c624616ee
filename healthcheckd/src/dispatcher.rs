//! Intake: transport reads, decode, hand-off to the worker queue.
//!
//! The bounded queue is the pipeline's only flow control. When it is full
//! the dispatcher waits on the send, so no further transport reads happen
//! until a worker frees a slot.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use shared::types::Signal;
use crate::transport::{SignalSource, TransportError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: u64,
    pub malformed: u64,
    pub read_errors: u64,
}

pub struct IntakeDispatcher {
    source: Arc<dyn SignalSource>,
    queue: flume::Sender<Signal>,
}

impl IntakeDispatcher {
    pub fn new(source: Arc<dyn SignalSource>, queue: flume::Sender<Signal>) -> Self {
        Self { source, queue }
    }

    /// Run until `cancel` fires, the subscription closes or every worker is
    /// gone. The queue sender is dropped on return, which lets the workers
    /// drain what is left and exit.
    pub async fn run(self, cancel: CancellationToken) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.source.recv() => received,
            };

            let payload = match received {
                Ok(payload) => payload,
                Err(e) => {
                    if matches!(e, TransportError::Closed) {
                        tracing::info!("Signal subscription closed");
                        break;
                    }
                    summary.read_errors += 1;
                    tracing::error!("Failed to read signal, retrying: {}", e);
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            let signal = match Signal::decode(&payload) {
                Ok(signal) => signal,
                Err(e) => {
                    summary.malformed += 1;
                    tracing::warn!("Dropping malformed signal: {}", e);
                    continue;
                }
            };

            // A worker can take the signal out of a pending send, so a
            // completed send wins over cancellation
            let address = signal.address.clone();
            tokio::select! {
                biased;
                sent = self.queue.send_async(signal) => {
                    if sent.is_err() {
                        tracing::error!("Worker queue closed, stopping intake");
                        break;
                    }
                    summary.dispatched += 1;
                }
                _ = cancel.cancelled() => {
                    tracing::warn!("Shutdown while queueing signal from {}, dropping it", address);
                    break;
                }
            }
        }

        tracing::info!(
            "Intake dispatcher stopped: {} dispatched, {} malformed, {} read errors",
            summary.dispatched,
            summary.malformed,
            summary.read_errors
        );
        summary
    }
}
