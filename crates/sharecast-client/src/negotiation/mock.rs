//! Recording peer connection for negotiation tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::peer::{
    IceCandidate, LocalMedia, PeerConnection, PeerConnectionFactory, PeerEvent, RtcError,
    SdpType, SessionDescription,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddMedia,
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    Close,
}

#[derive(Default)]
pub struct MockPeer {
    calls: Mutex<Vec<Call>>,
    rejected: Mutex<HashSet<String>>,
    fail_remote: Mutex<bool>,
}

impl MockPeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reject_candidate(&self, candidate: &str) {
        self.rejected.lock().unwrap().insert(candidate.to_string());
    }

    pub fn fail_remote_description(&self) {
        *self.fail_remote.lock().unwrap() = true;
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_local_media(&self, _media: &LocalMedia) -> Result<(), RtcError> {
        self.record(Call::AddMedia);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, RtcError> {
        self.record(Call::CreateOffer);
        Ok(SessionDescription::offer("v=0 mock-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, RtcError> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription::answer("v=0 mock-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RtcError> {
        self.record(Call::SetLocal(desc.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RtcError> {
        if *self.fail_remote.lock().unwrap() {
            return Err(RtcError::new("bad sdp"));
        }
        self.record(Call::SetRemote(desc.sdp_type));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError> {
        if self.rejected.lock().unwrap().contains(&candidate.candidate) {
            return Err(RtcError::new("bad candidate"));
        }
        self.record(Call::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.record(Call::Close);
    }
}

/// Hands out a fresh [`MockPeer`] per `create` and remembers them by peer id.
#[derive(Default)]
pub struct MockFactory {
    peers: Mutex<HashMap<String, Vec<Arc<MockPeer>>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Most recent connection created for `peer_id`.
    pub fn peer(&self, peer_id: &str) -> Arc<MockPeer> {
        self.peers.lock().unwrap()[peer_id]
            .last()
            .cloned()
            .unwrap()
    }

    pub fn created(&self, peer_id: &str) -> usize {
        self.peers
            .lock()
            .unwrap()
            .get(peer_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl PeerConnectionFactory for MockFactory {
    async fn create(
        &self,
        peer_id: &str,
        _events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, RtcError> {
        let peer = MockPeer::new();
        self.peers
            .lock()
            .unwrap()
            .entry(peer_id.to_string())
            .or_default()
            .push(peer.clone());
        Ok(peer)
    }
}
