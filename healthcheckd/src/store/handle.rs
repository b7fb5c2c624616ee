use std::thread;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use shared::types::{ServerRecord, ServerStatus};
use super::{db::ServerDb, Membership, ServerStore, StoreError};

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// Commands sent to the store thread
pub enum StoreCommand {
    Create {
        name: String,
        address: String,
        status: ServerStatus,
        reply: Reply<ServerRecord>,
    },
    FindByAddress(String, Reply<Option<ServerRecord>>),
    SetStatus {
        addresses: Vec<String>,
        membership: Membership,
        status: ServerStatus,
        reply: Reply<u64>,
    },
    List(Reply<Vec<ServerRecord>>),
    Shutdown,
}

/// Handle to the thread that owns the SQLite connection
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn a new store thread with the given database
    pub fn spawn(db: ServerDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Create { name, address, status, reply } => {
                        let _ = reply.send(db.create_server(&name, &address, status));
                    }
                    StoreCommand::FindByAddress(address, reply) => {
                        let _ = reply.send(db.get_by_address(&address));
                    }
                    StoreCommand::SetStatus { addresses, membership, status, reply } => {
                        let _ = reply.send(db.set_status(&addresses, membership, status));
                    }
                    StoreCommand::List(reply) => {
                        let _ = reply.send(db.get_all_servers());
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> StoreCommand) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| StoreError::Unavailable)
    }
}

#[async_trait]
impl ServerStore for StoreHandle {
    async fn create(
        &self,
        name: &str,
        address: &str,
        status: ServerStatus,
    ) -> Result<ServerRecord, StoreError> {
        self.request(|reply| StoreCommand::Create {
            name: name.to_string(),
            address: address.to_string(),
            status,
            reply,
        })
        .await
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<ServerRecord>, StoreError> {
        self.request(|reply| StoreCommand::FindByAddress(address.to_string(), reply))
            .await
    }

    async fn set_status(
        &self,
        addresses: Vec<String>,
        membership: Membership,
        status: ServerStatus,
    ) -> Result<u64, StoreError> {
        self.request(|reply| StoreCommand::SetStatus {
            addresses,
            membership,
            status,
            reply,
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ServerRecord>, StoreError> {
        self.request(StoreCommand::List).await
    }
}
