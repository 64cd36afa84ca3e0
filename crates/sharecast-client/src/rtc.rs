//! [`PeerConnection`] adapter over webrtc-rs.
//!
//! Screen media is published as a VP8 video track (plus Opus when system
//! audio is captured). Writing encoded samples into the tracks is left to
//! the capture pipeline via [`WebRtcPeer::local_tracks`].

use std::sync::Arc;

use async_trait::async_trait;
use sharecast_common::MediaKind;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::peer::{
    IceCandidate, LocalMedia, PeerConnection, PeerConnectionFactory, PeerEvent, PeerEventKind,
    RtcError, SdpType, SessionDescription, TransportSignal,
};

impl From<webrtc::Error> for RtcError {
    fn from(e: webrtc::Error) -> Self {
        RtcError(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Creates webrtc-rs peer connections sharing one codec registry.
pub struct WebRtcFactory {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcFactory {
    /// `ice_servers` are STUN/TURN URLs, e.g. `stun:stun.l.google.com:19302`.
    pub fn new(ice_servers: Vec<String>) -> Result<Self, RtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let api = APIBuilder::new().with_media_engine(media_engine).build();
        Ok(Self { api, ice_servers })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcFactory {
    async fn create(
        &self,
        peer_id: &str,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, RtcError> {
        let pc = Arc::new(self.api.new_peer_connection(self.configuration()).await?);
        wire_callbacks(&pc, peer_id, events);
        debug!(peer = %peer_id, "webrtc peer connection created");
        Ok(Arc::new(WebRtcPeer {
            peer_id: peer_id.to_string(),
            pc,
            tracks: Mutex::new(Vec::new()),
        }))
    }
}

/// Route native callbacks to the negotiation layer as [`PeerEvent`]s.
fn wire_callbacks(pc: &RTCPeerConnection, peer_id: &str, events: mpsc::Sender<PeerEvent>) {
    let (tx, peer) = (events.clone(), peer_id.to_string());
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let (tx, peer) = (tx.clone(), peer.clone());
        Box::pin(async move {
            // `None` marks the end of gathering.
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let kind = PeerEventKind::LocalCandidate(from_native_candidate(init));
                    let _ = tx.send(PeerEvent::new(peer, kind)).await;
                }
                Err(e) => warn!(peer = %peer, error = %e, "Unserializable local candidate"),
            }
        })
    }));

    let (tx, peer) = (events.clone(), peer_id.to_string());
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let (tx, peer) = (tx.clone(), peer.clone());
        Box::pin(async move {
            debug!(peer = %peer, %state, "Peer connection state changed");
            let signal = match state {
                RTCPeerConnectionState::Connected => TransportSignal::Connected,
                RTCPeerConnectionState::Disconnected => TransportSignal::Disconnected,
                RTCPeerConnectionState::Failed => TransportSignal::Failed,
                RTCPeerConnectionState::Closed => TransportSignal::Closed,
                _ => return,
            };
            let _ = tx
                .send(PeerEvent::new(peer, PeerEventKind::Transport(signal)))
                .await;
        })
    }));

    let (tx, peer) = (events.clone(), peer_id.to_string());
    pc.on_negotiation_needed(Box::new(move || {
        let (tx, peer) = (tx.clone(), peer.clone());
        Box::pin(async move {
            let _ = tx
                .send(PeerEvent::new(peer, PeerEventKind::NegotiationNeeded))
                .await;
        })
    }));

    let (tx, peer) = (events, peer_id.to_string());
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let (tx, peer) = (tx.clone(), peer.clone());
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    RTPCodecType::Video => MediaKind::Video,
                    _ => return,
                };
                let event = PeerEventKind::RemoteTrack {
                    track_id: track.id(),
                    kind,
                };
                let _ = tx.send(PeerEvent::new(peer, event)).await;
            })
        },
    ));
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

pub struct WebRtcPeer {
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
    tracks: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
}

impl WebRtcPeer {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Tracks the capture pipeline writes encoded samples into.
    pub async fn local_tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.tracks.lock().await.clone()
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_local_media(&self, media: &LocalMedia) -> Result<(), RtcError> {
        let mut tracks = self.tracks.lock().await;
        for local in &media.tracks {
            let mime_type = match local.kind {
                MediaKind::Video => MIME_TYPE_VP8,
                MediaKind::Audio => MIME_TYPE_OPUS,
            };
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                local.id.clone(),
                media.stream_id.clone(),
            ));
            self.pc
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            tracks.push(track);
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, RtcError> {
        let offer = self.pc.create_offer(None).await?;
        Ok(from_native_description(offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, RtcError> {
        let answer = self.pc.create_answer(None).await?;
        Ok(from_native_description(answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RtcError> {
        self.pc
            .set_local_description(to_native_description(desc)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RtcError> {
        self.pc
            .set_remote_description(to_native_description(desc)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError> {
        self.pc
            .add_ice_candidate(to_native_candidate(candidate))
            .await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(peer = %self.peer_id, error = %e, "Error closing peer connection");
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn to_native_description(desc: SessionDescription) -> Result<RTCSessionDescription, RtcError> {
    let native = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => return Err(RtcError::new("rollback is not supported")),
    };
    Ok(native)
}

fn from_native_description(desc: RTCSessionDescription) -> SessionDescription {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => SdpType::Offer,
    };
    SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    }
}

fn to_native_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_native_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
