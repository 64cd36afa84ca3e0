//! Media engine settings: transport port range and router codecs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub listen_ip: String,
    /// Public address advertised in ICE candidates, if different.
    pub announced_ip: Option<String>,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub codecs: Vec<CodecConfig>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".into(),
            announced_ip: None,
            rtc_min_port: 10000,
            rtc_max_port: 10100,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            codecs: vec![
                CodecConfig {
                    kind: "audio".into(),
                    mime_type: "audio/opus".into(),
                    clock_rate: 48000,
                    channels: Some(2),
                },
                CodecConfig {
                    kind: "video".into(),
                    mime_type: "video/VP8".into(),
                    clock_rate: 90000,
                    channels: None,
                },
            ],
        }
    }
}

/// One codec the router accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    pub kind: String,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between the engine dying and the process exiting.
    pub death_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            death_grace_ms: 2000,
        }
    }
}
