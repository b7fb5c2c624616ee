//! Durable server registry.
//!
//! The registry is the only authoritative copy of a server record. Creation
//! is guarded by the unique constraint on `address`; a losing concurrent
//! create surfaces as [`StoreError::Conflict`] so callers can re-fetch.

pub mod db;
pub mod handle;

use std::path::PathBuf;
use async_trait::async_trait;
use thiserror::Error;
use shared::types::{ServerRecord, ServerStatus};

pub use db::ServerDb;
pub use handle::StoreHandle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("server with address {address} already exists")]
    Conflict { address: String },

    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to create database directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store thread is not running")]
    Unavailable,
}

impl StoreError {
    pub(crate) fn database(context: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
        move |source| StoreError::Database { context, source }
    }
}

/// Which records a bulk status update applies to, relative to an address set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    In,
    NotIn,
}

#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Create a record. Fails with `Conflict` when the address is taken.
    async fn create(
        &self,
        name: &str,
        address: &str,
        status: ServerStatus,
    ) -> Result<ServerRecord, StoreError>;

    async fn find_by_address(&self, address: &str) -> Result<Option<ServerRecord>, StoreError>;

    /// Set `status` on every record whose address is (or is not) in
    /// `addresses`. Returns the number of records whose status changed.
    async fn set_status(
        &self,
        addresses: Vec<String>,
        membership: Membership,
        status: ServerStatus,
    ) -> Result<u64, StoreError>;

    async fn list(&self) -> Result<Vec<ServerRecord>, StoreError>;
}
