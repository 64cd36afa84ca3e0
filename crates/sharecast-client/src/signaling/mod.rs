//! WebSocket client for the sharecast signaling server.
//!
//! Decodes server frames into [`SignalingEvent`]s, writes queued client
//! messages, answers pings and reconnects with exponential backoff.

mod client;
mod connection;
mod types;

pub use client::SignalingClient;
pub use types::{SignalingConfig, SignalingEvent};
