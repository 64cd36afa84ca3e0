//! Negotiation state machine for one remote peer.

use std::sync::Arc;

use tracing::{debug, warn};

use super::types::{CandidateOutcome, LinkError, NegotiationState};
use crate::peer::{IceCandidate, LocalMedia, PeerConnection, SdpType, SessionDescription};

/// Negotiation state with one remote peer plus its native connection.
///
/// Remote ICE candidates that arrive before the remote description are
/// buffered and applied once, in arrival order, as soon as the description
/// is set. A remote description is applied at most once per negotiation;
/// [`PeerLink::reset`] starts a new one.
pub struct PeerLink {
    peer_id: String,
    state: NegotiationState,
    connection: Arc<dyn PeerConnection>,
    pending: Vec<IceCandidate>,
    has_remote_description: bool,
    has_local_media: bool,
    ready: bool,
}

impl PeerLink {
    pub fn new(peer_id: impl Into<String>, connection: Arc<dyn PeerConnection>) -> Self {
        Self {
            peer_id: peer_id.into(),
            state: NegotiationState::New,
            connection,
            pending: Vec::new(),
            has_remote_description: false,
            has_local_media: false,
            ready: false,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn has_local_media(&self) -> bool {
        self.has_local_media
    }

    /// Allow this link to generate offers.
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub async fn attach_media(&mut self, media: &LocalMedia) -> Result<(), LinkError> {
        self.ensure_open()?;
        if self.has_local_media {
            return Ok(());
        }
        self.connection.add_local_media(media).await?;
        self.has_local_media = true;
        Ok(())
    }

    /// Create and apply a local offer.
    ///
    /// Returns `None` while the link has no local media, is not ready, or has
    /// already left `New`.
    pub async fn create_offer(&mut self) -> Result<Option<SessionDescription>, LinkError> {
        self.ensure_open()?;
        if !self.has_local_media || !self.ready {
            debug!(peer = %self.peer_id, "Offer deferred: link not ready");
            return Ok(None);
        }
        if self.state != NegotiationState::New {
            debug!(peer = %self.peer_id, state = ?self.state, "Offer skipped");
            return Ok(None);
        }

        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(offer.clone()).await?;
        self.state = NegotiationState::OfferSent;
        Ok(Some(offer))
    }

    /// Apply a remote offer and produce the answer to send back.
    pub async fn accept_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, LinkError> {
        self.ensure_open()?;
        if offer.sdp_type != SdpType::Offer {
            return Err(LinkError::ProtocolViolation(format!(
                "expected offer, got {:?}",
                offer.sdp_type
            )));
        }
        if self.state != NegotiationState::New || self.has_remote_description {
            return Err(LinkError::ProtocolViolation(format!(
                "offer from {} in state {:?}",
                self.peer_id, self.state
            )));
        }

        self.apply_remote_description(offer).await?;
        let answer = self.connection.create_answer().await?;
        self.connection.set_local_description(answer.clone()).await?;
        self.state = NegotiationState::AnswerSent;
        Ok(answer)
    }

    /// Apply the remote answer to our offer.
    pub async fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), LinkError> {
        self.ensure_open()?;
        if answer.sdp_type != SdpType::Answer {
            return Err(LinkError::ProtocolViolation(format!(
                "expected answer, got {:?}",
                answer.sdp_type
            )));
        }
        if self.state != NegotiationState::OfferSent {
            return Err(LinkError::ProtocolViolation(format!(
                "answer from {} in state {:?}",
                self.peer_id, self.state
            )));
        }

        self.apply_remote_description(answer).await?;
        self.state = NegotiationState::Connected;
        Ok(())
    }

    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateOutcome, LinkError> {
        self.ensure_open()?;
        if !self.has_remote_description {
            self.pending.push(candidate);
            return Ok(CandidateOutcome::Buffered);
        }
        self.connection.add_ice_candidate(candidate).await?;
        Ok(CandidateOutcome::Applied)
    }

    /// The native transport reported connectivity. Completes the answering
    /// side; returns whether the state changed.
    pub fn on_transport_connected(&mut self) -> bool {
        if self.state == NegotiationState::AnswerSent {
            self.state = NegotiationState::Connected;
            return true;
        }
        false
    }

    pub async fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.state = NegotiationState::Closed;
        self.pending.clear();
        self.connection.close().await;
    }

    /// Swap in a fresh native connection and start over from `New`.
    pub async fn reset(&mut self, connection: Arc<dyn PeerConnection>) {
        if self.state != NegotiationState::Closed {
            self.connection.close().await;
        }
        self.connection = connection;
        self.state = NegotiationState::New;
        self.pending.clear();
        self.has_remote_description = false;
        self.has_local_media = false;
        self.ready = false;
    }

    async fn apply_remote_description(&mut self, desc: SessionDescription) -> Result<(), LinkError> {
        self.connection.set_remote_description(desc).await?;
        self.has_remote_description = true;

        for candidate in std::mem::take(&mut self.pending) {
            if let Err(e) = self.connection.add_ice_candidate(candidate).await {
                warn!(peer = %self.peer_id, error = %e, "Buffered ICE candidate rejected");
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), LinkError> {
        if self.state == NegotiationState::Closed {
            return Err(LinkError::Closed);
        }
        Ok(())
    }
}
