//! Negotiation manager: routes signaling events to per-peer links.
//!
//! The local client's connection id doubles as its user id, so every peer id
//! the server hands out (`other-users`, `new-user`, relay `from`) addresses
//! one link.
//!
//! Local sharing is optimistic: `start_sharing` offers right away and the
//! server never acknowledges it. If the server already granted the share to
//! someone else, its `start-sharing` for that user reaches us next; we then
//! drop the local stream and every link. Viewers only accept offers from the
//! sharer they know of, so offers from the losing side go nowhere.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sharecast_common::{ClientMessage, Payload, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::link::PeerLink;
use super::types::{LinkError, NegotiationState};
use crate::peer::{
    IceCandidate, LocalMedia, PeerConnectionFactory, PeerEvent, PeerEventKind, SessionDescription,
    TransportSignal,
};

// ---------------------------------------------------------------------------
// Negotiation Manager
// ---------------------------------------------------------------------------

pub struct NegotiationManager {
    room_id: String,
    local_id: Option<String>,
    factory: Arc<dyn PeerConnectionFactory>,
    links: HashMap<String, PeerLink>,
    /// Peers whose link was closed; their messages are ignored until the
    /// server re-admits them.
    closed: HashSet<String>,
    other_users: Vec<String>,
    sharing: bool,
    sharer_id: Option<String>,
    local_media: Option<LocalMedia>,
    outgoing: mpsc::Sender<ClientMessage>,
    peer_events: mpsc::Sender<PeerEvent>,
}

impl NegotiationManager {
    /// Returns the manager, the receiver of messages it wants sent to the
    /// server, and the receiver native peer events arrive on.
    pub fn new(
        room_id: impl Into<String>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> (Self, mpsc::Receiver<ClientMessage>, mpsc::Receiver<PeerEvent>) {
        let (outgoing, outgoing_rx) = mpsc::channel(256);
        let (peer_events, peer_events_rx) = mpsc::channel(256);
        let mgr = Self {
            room_id: room_id.into(),
            local_id: None,
            factory,
            links: HashMap::new(),
            closed: HashSet::new(),
            other_users: Vec::new(),
            sharing: false,
            sharer_id: None,
            local_media: None,
            outgoing,
            peer_events,
        };
        (mgr, outgoing_rx, peer_events_rx)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn is_sharing(&self) -> bool {
        self.sharing
    }

    pub fn sharer_id(&self) -> Option<&str> {
        self.sharer_id.as_deref()
    }

    pub fn other_users(&self) -> &[String] {
        &self.other_users
    }

    pub fn has_local_media(&self) -> bool {
        self.local_media.is_some()
    }

    pub fn link_state(&self, peer_id: &str) -> Option<NegotiationState> {
        self.links.get(peer_id).map(PeerLink::state)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link_states(&self) -> BTreeMap<String, NegotiationState> {
        self.links
            .iter()
            .map(|(peer, link)| (peer.clone(), link.state()))
            .collect()
    }

    pub fn is_closed(&self, peer_id: &str) -> bool {
        self.closed.contains(peer_id)
    }

    fn is_local_sharer(&self) -> bool {
        self.local_id.is_some() && self.sharer_id == self.local_id
    }

    // -----------------------------------------------------------------------
    // Local commands
    // -----------------------------------------------------------------------

    /// Announce a freshly captured stream and offer it to every known peer.
    /// Returns false if someone else is sharing or we have not joined yet.
    pub async fn start_sharing(&mut self, media: LocalMedia) -> bool {
        let Some(local_id) = self.local_id.clone() else {
            warn!("Cannot share before the server assigned an id");
            return false;
        };
        if self.sharing && self.sharer_id.as_deref() != Some(local_id.as_str()) {
            info!(sharer = ?self.sharer_id, "Someone else is already sharing");
            return false;
        }

        self.local_media = Some(media);
        self.sharing = true;
        self.sharer_id = Some(local_id.clone());
        self.send(ClientMessage::StartSharing {
            room_id: self.room_id.clone(),
            user_id: local_id,
        })
        .await;

        for peer in self.other_users.clone() {
            self.offer_to(&peer).await;
        }
        true
    }

    /// Stop our own share and tell the room.
    pub async fn stop_sharing(&mut self) {
        let Some(local_id) = self.local_id.clone() else {
            return;
        };
        self.local_media = None;
        self.sharing = false;
        self.sharer_id = None;
        self.close_all().await;
        self.send(ClientMessage::StopSharing {
            room_id: self.room_id.clone(),
            user_id: local_id,
        })
        .await;
    }

    /// The local capture ended or failed. Reverts local state; peers only
    /// learn about it through the normal stop-sharing path.
    pub async fn capture_failed(&mut self, reason: &str) {
        warn!(reason, "Local capture failed");
        if self.local_media.is_some() || self.is_local_sharer() {
            self.stop_sharing().await;
        }
    }

    pub async fn leave(&mut self) {
        self.close_all().await;
        self.local_media = None;
        self.sharing = false;
        self.sharer_id = None;
        self.other_users.clear();
        if let Some(local_id) = self.local_id.clone() {
            self.send(ClientMessage::LeaveRoom {
                room_id: self.room_id.clone(),
                user_id: local_id,
            })
            .await;
        }
    }

    /// Signaling connection dropped: nothing negotiated through it survives.
    pub async fn connection_lost(&mut self) {
        self.close_all().await;
        self.other_users.clear();
        self.local_id = None;
    }

    // -----------------------------------------------------------------------
    // Server events
    // -----------------------------------------------------------------------

    pub async fn handle_server_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Welcome { connection_id } => {
                self.on_connected(connection_id.to_string()).await
            }
            ServerMessage::RoomCreated { room_id } => debug!(room_id, "Room created"),
            ServerMessage::OtherUsers { users } => self.on_other_users(users).await,
            ServerMessage::NewUser { user_id } => self.on_new_user(user_id).await,
            ServerMessage::StartSharing { sharer_id } => self.on_start_sharing(sharer_id).await,
            ServerMessage::StopSharing {} => self.on_stop_sharing().await,
            ServerMessage::Offer { from, to, sdp } => {
                self.on_offer(from.to_string(), &to, &sdp).await
            }
            ServerMessage::Answer { from, sdp } => self.on_answer(from.as_str(), &sdp).await,
            ServerMessage::IceCandidate { from, candidate } => {
                self.on_candidate(from.as_str(), &candidate).await
            }
            ServerMessage::UserLeft { user_id } => self.on_user_left(&user_id).await,
            ServerMessage::Error { message } => warn!(message, "Server reported an error"),
            ServerMessage::Response { request_id, .. } => {
                debug!(request_id, "Ignoring SFU response")
            }
        }
    }

    async fn on_connected(&mut self, connection_id: String) {
        // Anything left from a previous connection is stale.
        self.close_all().await;
        self.closed.clear();
        self.other_users.clear();
        self.sharing = false;
        self.sharer_id = None;
        self.local_id = Some(connection_id.clone());

        info!(room = %self.room_id, id = %connection_id, "Joining room");
        self.send(ClientMessage::JoinRoom {
            room_id: self.room_id.clone(),
            user_id: connection_id.clone(),
        })
        .await;

        if self.local_media.is_some() {
            self.sharing = true;
            self.sharer_id = Some(connection_id.clone());
            self.send(ClientMessage::StartSharing {
                room_id: self.room_id.clone(),
                user_id: connection_id,
            })
            .await;
        }
    }

    async fn on_other_users(&mut self, users: Vec<String>) {
        let local = self.local_id.clone();
        self.other_users = users
            .into_iter()
            .filter(|u| Some(u) != local.as_ref())
            .collect();
        for user in &self.other_users {
            self.closed.remove(user);
        }
        if self.is_local_sharer() && self.local_media.is_some() {
            for peer in self.other_users.clone() {
                self.offer_to(&peer).await;
            }
        }
    }

    async fn on_new_user(&mut self, user_id: String) {
        if self.local_id.as_deref() == Some(user_id.as_str()) {
            return;
        }
        self.closed.remove(&user_id);
        if !self.other_users.contains(&user_id) {
            self.other_users.push(user_id.clone());
        }
        if self.is_local_sharer() && self.local_media.is_some() {
            self.offer_to(&user_id).await;
        }
    }

    async fn on_start_sharing(&mut self, sharer_id: String) {
        self.closed.remove(&sharer_id);
        if self.local_media.is_some() && self.local_id.as_deref() != Some(sharer_id.as_str()) {
            warn!(sharer = %sharer_id, "Another user holds the share, dropping local stream");
            self.local_media = None;
            self.close_all().await;
            self.closed.remove(&sharer_id);
        }
        self.sharing = true;
        self.sharer_id = Some(sharer_id);
    }

    async fn on_stop_sharing(&mut self) {
        info!(sharer = ?self.sharer_id, "Sharing stopped");
        self.sharing = false;
        self.sharer_id = None;
        self.local_media = None;
        self.close_all().await;
    }

    async fn on_offer(&mut self, from: String, to: &str, sdp: &Payload) {
        if let Some(local) = &self.local_id {
            if local != to {
                debug!(from = %from, to, "Offer addressed to another peer");
                return;
            }
        }
        if self.closed.contains(&from) {
            debug!(peer = %from, "Ignoring offer from closed peer");
            return;
        }
        if self.sharer_id.as_ref().is_some_and(|sharer| *sharer != from) {
            debug!(peer = %from, sharer = ?self.sharer_id, "Ignoring offer from non-sharer");
            return;
        }
        let Some(offer) = parse::<SessionDescription>(&from, "offer", sdp) else {
            return;
        };

        let result = match self.open_link(&from).await {
            Ok(link) => link.accept_offer(offer).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(answer) => {
                if let Some(sdp) = to_payload(&answer) {
                    self.send(ClientMessage::Answer {
                        room_id: self.room_id.clone(),
                        to: from,
                        sdp,
                    })
                    .await;
                }
            }
            Err(e) => self.link_failed(&from, e).await,
        }
    }

    async fn on_answer(&mut self, from: &str, sdp: &Payload) {
        if self.closed.contains(from) {
            debug!(peer = %from, "Ignoring answer from closed peer");
            return;
        }
        let Some(answer) = parse::<SessionDescription>(from, "answer", sdp) else {
            return;
        };
        let Some(link) = self.links.get_mut(from) else {
            warn!(peer = %from, "Answer without a pending offer");
            return;
        };
        let result = link.accept_answer(answer).await;
        match result {
            Ok(()) => info!(peer = %from, "Peer connected"),
            Err(e) => self.link_failed(from, e).await,
        }
    }

    async fn on_candidate(&mut self, from: &str, candidate: &Payload) {
        if self.closed.contains(from) {
            debug!(peer = %from, "Ignoring candidate from closed peer");
            return;
        }
        let Some(candidate) = parse::<IceCandidate>(from, "ice-candidate", candidate) else {
            return;
        };
        let result = match self.open_link(from).await {
            Ok(link) => link.add_remote_candidate(candidate).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.link_failed(from, e).await;
        }
    }

    async fn on_user_left(&mut self, user_id: &str) {
        self.close_link(user_id).await;
        self.other_users.retain(|u| u != user_id);
        if self.sharer_id.as_deref() == Some(user_id) {
            self.sharing = false;
            self.sharer_id = None;
        }
    }

    // -----------------------------------------------------------------------
    // Native events
    // -----------------------------------------------------------------------

    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        let peer = event.peer_id;
        if !self.links.contains_key(&peer) {
            debug!(peer = %peer, "Event for unknown or closed peer");
            return;
        }
        match event.kind {
            PeerEventKind::LocalCandidate(candidate) => {
                if let Some(candidate) = to_payload(&candidate) {
                    self.send(ClientMessage::IceCandidate {
                        room_id: self.room_id.clone(),
                        to: peer,
                        candidate,
                    })
                    .await;
                }
            }
            PeerEventKind::NegotiationNeeded => self.offer_to(&peer).await,
            PeerEventKind::Transport(TransportSignal::Connected) => {
                if let Some(link) = self.links.get_mut(&peer) {
                    if link.on_transport_connected() {
                        info!(peer = %peer, "Peer connected");
                    }
                }
            }
            PeerEventKind::Transport(TransportSignal::Disconnected) => {
                debug!(peer = %peer, "Peer transport interrupted");
            }
            PeerEventKind::Transport(signal) => {
                warn!(peer = %peer, ?signal, "Peer transport ended");
                self.close_link(&peer).await;
            }
            PeerEventKind::RemoteTrack { track_id, kind } => {
                info!(peer = %peer, track = %track_id, ?kind, "Remote track received");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    async fn open_link(&mut self, peer_id: &str) -> Result<&mut PeerLink, LinkError> {
        if !self.links.contains_key(peer_id) {
            let connection = self
                .factory
                .create(peer_id, self.peer_events.clone())
                .await?;
            debug!(peer = %peer_id, "Peer link opened");
            self.links
                .insert(peer_id.to_string(), PeerLink::new(peer_id, connection));
        }
        self.links.get_mut(peer_id).ok_or(LinkError::Closed)
    }

    /// Attach local media to the link for `peer_id` and offer it.
    async fn offer_to(&mut self, peer_id: &str) {
        let Some(media) = self.local_media.clone() else {
            return;
        };
        // Offering re-admits a peer whose previous link was closed.
        self.closed.remove(peer_id);
        let result = match self.open_link(peer_id).await {
            Ok(link) => {
                let attached = link.attach_media(&media).await;
                link.mark_ready();
                match attached {
                    Ok(()) => link.create_offer().await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(offer)) => {
                if let Some(sdp) = to_payload(&offer) {
                    self.send(ClientMessage::Offer {
                        room_id: self.room_id.clone(),
                        to: peer_id.to_string(),
                        sdp,
                    })
                    .await;
                }
            }
            Ok(None) => {}
            Err(e) => self.link_failed(peer_id, e).await,
        }
    }

    async fn link_failed(&mut self, peer_id: &str, error: LinkError) {
        match error {
            LinkError::ProtocolViolation(reason) => {
                warn!(peer = %peer_id, reason, "Dropped out-of-order signaling message");
            }
            LinkError::Closed => debug!(peer = %peer_id, "Message for closed link"),
            LinkError::Rtc(e) => {
                warn!(peer = %peer_id, error = %e, "Peer connection failed");
                self.close_link(peer_id).await;
            }
        }
    }

    async fn close_link(&mut self, peer_id: &str) {
        if let Some(mut link) = self.links.remove(peer_id) {
            link.close().await;
            debug!(peer = %peer_id, "Peer link closed");
        }
        self.closed.insert(peer_id.to_string());
    }

    async fn close_all(&mut self) {
        for (peer_id, mut link) in self.links.drain() {
            link.close().await;
            self.closed.insert(peer_id);
        }
    }

    async fn send(&self, msg: ClientMessage) {
        if self.outgoing.send(msg).await.is_err() {
            debug!("Signaling channel closed, message dropped");
        }
    }
}

fn parse<T: DeserializeOwned>(from: &str, event: &str, payload: &Payload) -> Option<T> {
    match serde_json::from_str(payload.get()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(peer = %from, event, error = %e, "Malformed negotiation payload");
            None
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> Option<Payload> {
    serde_json::value::to_raw_value(value).ok()
}
