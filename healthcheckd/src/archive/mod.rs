//! Best-effort archival of heartbeat documents.
//!
//! Nothing in here feeds back into server status: a lost document is
//! logged and counted, never retried.

pub mod elastic;
pub mod writer;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use shared::types::ArchiveDocument;

pub use elastic::ElasticIndex;
pub use writer::{ArchiveStats, ArchiveStatsSnapshot, ArchiveWriter, WriterConfig};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("index rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to encode bulk request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One document queued for insertion under a generated id
#[derive(Debug, Clone, Serialize)]
pub struct IndexItem {
    pub id: String,
    pub document: ArchiveDocument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Created { id: String },
    Failed { id: String, reason: String },
}

#[async_trait]
pub trait ArchiveIndex: Send + Sync {
    /// Insert a batch. An `Err` means the whole batch was lost; otherwise
    /// there is one outcome per item.
    async fn bulk_insert(&self, items: &[IndexItem]) -> Result<Vec<ItemOutcome>, IndexError>;
}

/// Accepts every document without storing it. Used when no index is configured.
pub struct NoopIndex;

#[async_trait]
impl ArchiveIndex for NoopIndex {
    async fn bulk_insert(&self, items: &[IndexItem]) -> Result<Vec<ItemOutcome>, IndexError> {
        Ok(items
            .iter()
            .map(|item| ItemOutcome::Created { id: item.id.clone() })
            .collect())
    }
}
