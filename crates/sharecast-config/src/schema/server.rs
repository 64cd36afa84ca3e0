use serde::{Deserialize, Serialize};

/// WebSocket signaling endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub bind: String,
    pub port: u16,
    /// Outbound queue depth per connection.
    pub channel_capacity: u32,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 4000,
            channel_capacity: 256,
        }
    }
}

/// HTTP room-discovery endpoint (`GET /rooms`, `GET /room/:id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub port: u16,
    /// Origin allowed by CORS. Empty allows any origin.
    pub cors_origin: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 4001,
            cors_origin: "http://localhost:8080".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `SHARECAST_LOG`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "sharecast_server=info".into(),
        }
    }
}
