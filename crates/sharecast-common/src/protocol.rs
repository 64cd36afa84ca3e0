//! Signaling wire protocol.
//!
//! Every WebSocket text frame carries exactly one message, keyed by its event
//! name: `{"join-room": {"room_id": "r1", "user_id": "a"}}`. The set of events
//! is closed; anything else is rejected at the boundary with a
//! [`ProtocolError`]. SDP and ICE payloads are kept as raw JSON so they are
//! relayed byte-for-byte.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::id::ConnectionId;
use crate::media::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters};

/// Opaque negotiation payload (SDP or ICE candidate), forwarded untouched.
pub type Payload = Box<RawValue>;

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Messages a client sends to the signaling server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom {
        room_id: String,
        user_id: String,
    },
    StartSharing {
        room_id: String,
        user_id: String,
    },
    StopSharing {
        room_id: String,
        user_id: String,
    },
    LeaveRoom {
        room_id: String,
        user_id: String,
    },
    Offer {
        room_id: String,
        to: String,
        sdp: Payload,
    },
    Answer {
        room_id: String,
        to: String,
        sdp: Payload,
    },
    IceCandidate {
        room_id: String,
        to: String,
        candidate: Payload,
    },
    CreateProducerTransport {
        request_id: u64,
        room_id: String,
        user_id: String,
    },
    ConnectProducerTransport {
        request_id: u64,
        room_id: String,
        user_id: String,
        dtls_parameters: DtlsParameters,
    },
    Produce {
        request_id: u64,
        room_id: String,
        user_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
    CreateConsumerTransport {
        request_id: u64,
        room_id: String,
        user_id: String,
    },
    ConnectConsumerTransport {
        request_id: u64,
        room_id: String,
        user_id: String,
        dtls_parameters: DtlsParameters,
    },
    Consume {
        request_id: u64,
        room_id: String,
        user_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
    },
}

impl ClientMessage {
    /// Parse and validate one inbound frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let msg: Self =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        msg.validate()?;
        Ok(msg)
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Event name as it appears on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::StartSharing { .. } => "start-sharing",
            Self::StopSharing { .. } => "stop-sharing",
            Self::LeaveRoom { .. } => "leave-room",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::CreateProducerTransport { .. } => "create-producer-transport",
            Self::ConnectProducerTransport { .. } => "connect-producer-transport",
            Self::Produce { .. } => "produce",
            Self::CreateConsumerTransport { .. } => "create-consumer-transport",
            Self::ConnectConsumerTransport { .. } => "connect-consumer-transport",
            Self::Consume { .. } => "consume",
        }
    }

    /// Request id of SFU request/response messages.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::CreateProducerTransport { request_id, .. }
            | Self::ConnectProducerTransport { request_id, .. }
            | Self::Produce { request_id, .. }
            | Self::CreateConsumerTransport { request_id, .. }
            | Self::ConnectConsumerTransport { request_id, .. }
            | Self::Consume { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let (room_id, other, field) = match self {
            Self::JoinRoom { room_id, user_id }
            | Self::StartSharing { room_id, user_id }
            | Self::StopSharing { room_id, user_id }
            | Self::LeaveRoom { room_id, user_id }
            | Self::CreateProducerTransport { room_id, user_id, .. }
            | Self::ConnectProducerTransport { room_id, user_id, .. }
            | Self::Produce { room_id, user_id, .. }
            | Self::CreateConsumerTransport { room_id, user_id, .. }
            | Self::ConnectConsumerTransport { room_id, user_id, .. }
            | Self::Consume { room_id, user_id, .. } => (room_id, user_id, "user_id"),
            Self::Offer { room_id, to, .. }
            | Self::Answer { room_id, to, .. }
            | Self::IceCandidate { room_id, to, .. } => (room_id, to, "to"),
        };
        if room_id.trim().is_empty() {
            return Err(ProtocolError::EmptyField("room_id"));
        }
        if other.trim().is_empty() {
            return Err(ProtocolError::EmptyField(field));
        }
        if let Self::Consume { producer_id, .. } = self {
            if producer_id.trim().is_empty() {
                return Err(ProtocolError::EmptyField("producer_id"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Messages the signaling server sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame on every connection.
    Welcome { connection_id: ConnectionId },
    RoomCreated { room_id: String },
    OtherUsers { users: Vec<String> },
    NewUser { user_id: String },
    StartSharing { sharer_id: String },
    StopSharing {},
    Offer {
        from: ConnectionId,
        to: String,
        sdp: Payload,
    },
    Answer { from: ConnectionId, sdp: Payload },
    IceCandidate {
        from: ConnectionId,
        candidate: Payload,
    },
    UserLeft { user_id: String },
    Error { message: String },
    /// Reply to an SFU request. Exactly one of `params`, `id` or `error` is
    /// set, except for plain acknowledgements which carry none.
    Response {
        request_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ServerMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn with_params(request_id: u64, params: serde_json::Value) -> Self {
        Self::Response {
            request_id,
            params: Some(params),
            id: None,
            error: None,
        }
    }

    pub fn with_id(request_id: u64, id: String) -> Self {
        Self::Response {
            request_id,
            params: None,
            id: Some(id),
            error: None,
        }
    }

    pub fn ack(request_id: u64) -> Self {
        Self::Response {
            request_id,
            params: None,
            id: None,
            error: None,
        }
    }

    pub fn failed(request_id: u64, error: impl Into<String>) -> Self {
        Self::Response {
            request_id,
            params: None,
            id: None,
            error: Some(error.into()),
        }
    }
}

/// Rejection of an inbound frame at the protocol boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),
}
