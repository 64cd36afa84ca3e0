//! Native peer-connection seam.
//!
//! The negotiation layer drives a [`PeerConnection`] per remote peer and
//! listens for [`PeerEvent`]s the native side raises (gathered candidates,
//! transport state, renegotiation requests).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sharecast_common::MediaKind;
use tokio::sync::mpsc;

/// Failure reported by the native peer connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("peer connection error: {0}")]
pub struct RtcError(pub String);

impl RtcError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

// ---------------------------------------------------------------------------
// Negotiation payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// `{"type": "offer", "sdp": "..."}` as browsers exchange it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Local media
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
}

/// A captured stream ready to be attached to peer connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    /// Screen capture: one video track, optionally with system audio.
    pub fn screen(stream_id: impl Into<String>, with_audio: bool) -> Self {
        let stream_id = stream_id.into();
        let mut tracks = vec![LocalTrack {
            id: format!("{stream_id}-video"),
            kind: MediaKind::Video,
        }];
        if with_audio {
            tracks.push(LocalTrack {
                id: format!("{stream_id}-audio"),
                kind: MediaKind::Audio,
            });
        }
        Self { stream_id, tracks }
    }
}

// ---------------------------------------------------------------------------
// Native events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEventKind {
    /// A local ICE candidate was gathered and should be sent to the peer.
    LocalCandidate(IceCandidate),
    NegotiationNeeded,
    Transport(TransportSignal),
    RemoteTrack { track_id: String, kind: MediaKind },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerEvent {
    pub peer_id: String,
    pub kind: PeerEventKind,
}

impl PeerEvent {
    pub fn new(peer_id: impl Into<String>, kind: PeerEventKind) -> Self {
        Self {
            peer_id: peer_id.into(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_media(&self, media: &LocalMedia) -> Result<(), RtcError>;
    async fn create_offer(&self) -> Result<SessionDescription, RtcError>;
    async fn create_answer(&self) -> Result<SessionDescription, RtcError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RtcError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RtcError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError>;
    async fn close(&self);
}

/// Creates one native connection per remote peer. Native callbacks for that
/// peer are reported on `events`.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        peer_id: &str,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, RtcError>;
}
