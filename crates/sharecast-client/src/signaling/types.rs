//! Configuration and event/command enums for the signaling client.

use sharecast_common::{ClientMessage, ServerMessage};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to a sharecast signaling server.
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// WebSocket URL, e.g. `ws://127.0.0.1:8080`.
    pub url: String,
    /// Connect timeout in seconds (default: 15).
    pub connect_timeout_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            connect_timeout_secs: 15,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}

impl SignalingConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Next backoff delay after `current`, capped at the maximum.
    pub(crate) fn next_delay(&self, current: u64) -> u64 {
        current
            .saturating_mul(2)
            .max(1)
            .min(self.max_reconnect_delay_secs)
    }
}

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Events emitted by the signaling client.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// WebSocket connection established. The server's `welcome` follows.
    Connected,
    /// A decoded server message.
    Message(ServerMessage),
    /// WebSocket connection lost.
    Disconnected,
    /// Connect attempt failed.
    Error(String),
}

#[derive(Debug)]
pub(crate) enum SignalingCommand {
    Send(ClientMessage),
    Disconnect,
}
