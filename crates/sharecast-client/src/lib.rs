//! Client side of sharecast.
//!
//! A [`ShareSession`] joins one room over the signaling WebSocket and keeps
//! a mesh of peer connections in step with the room: the sharer offers its
//! screen to every other member, viewers answer. Native connections sit
//! behind [`PeerConnection`]; enable the `webrtc` feature for the webrtc-rs
//! adapter.

pub mod negotiation;
pub mod peer;
#[cfg(feature = "webrtc")]
pub mod rtc;
pub mod session;
pub mod signaling;

pub use negotiation::{NegotiationManager, NegotiationState, PeerLink};
pub use peer::{
    IceCandidate, LocalMedia, PeerConnection, PeerConnectionFactory, PeerEvent, PeerEventKind,
    RtcError, SessionDescription,
};
#[cfg(feature = "webrtc")]
pub use rtc::{WebRtcFactory, WebRtcPeer};
pub use session::{SessionSnapshot, ShareCommand, ShareSession};
pub use signaling::{SignalingClient, SignalingConfig, SignalingEvent};
