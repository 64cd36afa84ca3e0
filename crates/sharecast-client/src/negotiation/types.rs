//! Negotiation states and errors.

use crate::peer::RtcError;

/// Per-peer negotiation state.
///
/// `New -> OfferSent -> Connected -> Closed` when we offer,
/// `New -> AnswerSent -> Connected -> Closed` when the peer does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    New,
    OfferSent,
    AnswerSent,
    Connected,
    Closed,
}

/// Where a remote ICE candidate ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Held until the remote description is applied.
    Buffered,
    Applied,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Out-of-order or duplicate signaling message. Dropped, non-fatal.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("peer link is closed")]
    Closed,

    #[error(transparent)]
    Rtc(#[from] RtcError),
}
