//! Client-side negotiation: one state machine per remote peer, and the
//! manager that routes signaling events to them.

pub mod link;
pub mod manager;
pub mod types;

pub use link::PeerLink;
pub use manager::NegotiationManager;
pub use types::{CandidateOutcome, LinkError, NegotiationState};

#[cfg(test)]
pub(crate) mod mock;
