//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod media;
mod server;

pub use media::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root configuration for the sharecast server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    pub signaling: SignalingConfig,
    pub http: HttpConfig,
    pub media: MediaConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}
