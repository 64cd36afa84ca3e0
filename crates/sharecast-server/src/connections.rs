//! Connection index: maps connection ids to their outbound queues.

use std::collections::HashMap;
use std::sync::Arc;

use sharecast_common::{ConnectionId, ServerMessage};
use tokio::sync::{mpsc, RwLock};
use tokio::sync::mpsc::error::TrySendError;

/// Thread-safe map of live connections.
///
/// Delivery is best-effort: a message for a connection that is gone, or whose
/// queue is full, is dropped rather than failing the caller.
#[derive(Clone, Default)]
pub struct ConnectionIndex {
    senders: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<ServerMessage>>>>,
}

impl ConnectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection: ConnectionId, tx: mpsc::Sender<ServerMessage>) {
        self.senders.write().await.insert(connection, tx);
    }

    /// Returns true if the connection was registered.
    pub async fn unregister(&self, connection: &ConnectionId) -> bool {
        self.senders.write().await.remove(connection).is_some()
    }

    pub async fn is_live(&self, connection: &ConnectionId) -> bool {
        self.senders.read().await.contains_key(connection)
    }

    pub async fn count(&self) -> usize {
        self.senders.read().await.len()
    }

    /// Queue `msg` for one connection. Returns whether it was queued.
    pub async fn send(&self, connection: &ConnectionId, msg: ServerMessage) -> bool {
        let Some(tx) = self.senders.read().await.get(connection).cloned() else {
            tracing::debug!(connection = %connection, "Dropping message for unknown connection");
            return false;
        };
        deliver(connection, &tx, msg)
    }

    /// Queue `msg` for every live connection.
    pub async fn broadcast(&self, msg: &ServerMessage) -> usize {
        let targets: Vec<(ConnectionId, mpsc::Sender<ServerMessage>)> = self
            .senders
            .read()
            .await
            .iter()
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect();

        targets
            .iter()
            .filter(|(id, tx)| deliver(id, tx, msg.clone()))
            .count()
    }
}

fn deliver(connection: &ConnectionId, tx: &mpsc::Sender<ServerMessage>, msg: ServerMessage) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(connection = %connection, "Outbound queue full, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(connection = %connection, "Connection closed, dropping message");
            false
        }
    }
}
