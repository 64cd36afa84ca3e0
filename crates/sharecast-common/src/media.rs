//! Media-engine parameter types carried through signaling.
//!
//! ICE, DTLS and RTP parameter blobs are owned by the media engine; this layer
//! only stores and forwards them, so they stay opaque JSON values.

use serde::{Deserialize, Serialize};

/// Kind of media a producer sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// MIME type prefix used in codec descriptions (`audio/opus`, `video/VP8`).
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            Self::Audio => "audio/",
            Self::Video => "video/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub serde_json::Value);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub serde_json::Value);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub serde_json::Value);

impl RtpCapabilities {
    /// MIME types of every codec listed under `codecs[].mimeType`.
    pub fn codec_mime_types(&self) -> Vec<String> {
        self.0
            .get("codecs")
            .and_then(|c| c.as_array())
            .map(|codecs| {
                codecs
                    .iter()
                    .filter_map(|c| c.get("mimeType").and_then(|m| m.as_str()))
                    .map(|m| m.to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Connection parameters of a freshly allocated WebRTC transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: String,
    pub ice_parameters: serde_json::Value,
    pub ice_candidates: serde_json::Value,
    pub dtls_parameters: serde_json::Value,
}

/// Everything a client needs to receive a consumer's media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
}
