//! Public handle for the signaling connection.

use std::sync::Arc;

use sharecast_common::ClientMessage;
use tokio::sync::{mpsc, RwLock};

use super::connection::connection_loop;
use super::types::{SignalingCommand, SignalingConfig, SignalingEvent};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle for talking to the signaling server.
///
/// All methods are non-blocking and send commands to the background
/// connection task, which reconnects with backoff until [`disconnect`] is
/// called.
///
/// [`disconnect`]: SignalingClient::disconnect
pub struct SignalingClient {
    command_tx: mpsc::Sender<SignalingCommand>,
    connected: Arc<RwLock<bool>>,
}

impl SignalingClient {
    /// Create a new client and start the background connection.
    /// Returns `(client, event_receiver)`.
    pub fn connect(config: SignalingConfig) -> (Self, mpsc::Receiver<SignalingEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(256);
        let connected = Arc::new(RwLock::new(false));

        let client = Self {
            command_tx,
            connected: Arc::clone(&connected),
        };

        tokio::spawn(connection_loop(config, connected, event_tx, command_rx));

        (client, event_rx)
    }

    /// Another handle onto the same connection.
    pub fn clone_sender(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            connected: Arc::clone(&self.connected),
        }
    }

    /// Queue a message. Messages queued while disconnected are dropped.
    pub async fn send(&self, msg: ClientMessage) {
        let _ = self.command_tx.send(SignalingCommand::Send(msg)).await;
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Close the connection and stop reconnecting. Messages queued before
    /// this call are written first.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(SignalingCommand::Disconnect).await;
    }
}
