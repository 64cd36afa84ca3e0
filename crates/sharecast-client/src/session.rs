//! A joined room: signaling connection plus negotiation manager, driven by
//! one background task.

use std::collections::BTreeMap;
use std::sync::Arc;

use sharecast_common::ClientMessage;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::negotiation::{NegotiationManager, NegotiationState};
use crate::peer::{LocalMedia, PeerConnectionFactory, PeerEvent};
use crate::signaling::{SignalingClient, SignalingConfig, SignalingEvent};

/// Local actions on a running session.
#[derive(Debug)]
pub enum ShareCommand {
    StartSharing(LocalMedia),
    StopSharing,
    /// Local capture ended or could not start.
    CaptureFailed(String),
    Leave,
}

/// Observable state of a session, republished after every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub connected: bool,
    pub local_id: Option<String>,
    pub is_sharing: bool,
    pub sharer_id: Option<String>,
    pub has_local_media: bool,
    pub other_users: Vec<String>,
    pub peers: BTreeMap<String, NegotiationState>,
}

impl SessionSnapshot {
    fn capture(mgr: &NegotiationManager, connected: bool) -> Self {
        Self {
            connected,
            local_id: mgr.local_id().map(str::to_string),
            is_sharing: mgr.is_sharing(),
            sharer_id: mgr.sharer_id().map(str::to_string),
            has_local_media: mgr.has_local_media(),
            other_users: mgr.other_users().to_vec(),
            peers: mgr.link_states(),
        }
    }
}

/// Handle to a running room session.
pub struct ShareSession {
    room_id: String,
    commands: mpsc::Sender<ShareCommand>,
    status: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl ShareSession {
    /// Connect to the signaling server and join `room_id` as soon as the
    /// server greets us. Rejoins automatically after a reconnect.
    pub fn start(
        config: SignalingConfig,
        room_id: impl Into<String>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        let room_id = room_id.into();
        let (mgr, outgoing, peer_events) = NegotiationManager::new(room_id.clone(), factory);
        let (signaling, events) = SignalingClient::connect(config);
        let (commands, command_rx) = mpsc::channel(64);
        let (status_tx, status) = watch::channel(SessionSnapshot::default());

        let driver = Driver {
            mgr,
            signaling,
            connected: false,
            status: status_tx,
        };
        let task = tokio::spawn(driver.run(events, outgoing, peer_events, command_rx));

        Self {
            room_id,
            commands,
            status,
            task,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub async fn start_sharing(&self, media: LocalMedia) {
        self.command(ShareCommand::StartSharing(media)).await;
    }

    pub async fn stop_sharing(&self) {
        self.command(ShareCommand::StopSharing).await;
    }

    pub async fn capture_failed(&self, reason: impl Into<String>) {
        self.command(ShareCommand::CaptureFailed(reason.into())).await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.status.borrow().clone()
    }

    /// Watch the session state; use `wait_for` to block on a condition.
    pub fn status(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.clone()
    }

    /// Leave the room, close every peer link and the signaling connection.
    pub async fn leave(self) {
        self.command(ShareCommand::Leave).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Session task ended abnormally");
        }
    }

    async fn command(&self, cmd: ShareCommand) {
        if self.commands.send(cmd).await.is_err() {
            debug!(room = %self.room_id, "Session already ended");
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct Driver {
    mgr: NegotiationManager,
    signaling: SignalingClient,
    connected: bool,
    status: watch::Sender<SessionSnapshot>,
}

impl Driver {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<SignalingEvent>,
        mut outgoing: mpsc::Receiver<ClientMessage>,
        mut peer_events: mpsc::Receiver<PeerEvent>,
        mut commands: mpsc::Receiver<ShareCommand>,
    ) {
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.on_signaling(event).await,

                Some(msg) = outgoing.recv() => self.signaling.send(msg).await,

                Some(event) = peer_events.recv() => self.mgr.handle_peer_event(event).await,

                cmd = commands.recv() => match cmd {
                    Some(ShareCommand::StartSharing(media)) => {
                        if !self.mgr.start_sharing(media).await {
                            info!(room = %self.mgr.room_id(), "Share request refused");
                        }
                    }
                    Some(ShareCommand::StopSharing) => self.mgr.stop_sharing().await,
                    Some(ShareCommand::CaptureFailed(reason)) => {
                        self.mgr.capture_failed(&reason).await
                    }
                    Some(ShareCommand::Leave) | None => {
                        self.mgr.leave().await;
                        while let Ok(msg) = outgoing.try_recv() {
                            self.signaling.send(msg).await;
                        }
                        self.signaling.disconnect().await;
                        self.connected = false;
                        self.publish();
                        info!(room = %self.mgr.room_id(), "Left room");
                        return;
                    }
                },

                else => return,
            }
            self.publish();
        }
    }

    async fn on_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => {
                self.connected = true;
                debug!("Signaling connected, waiting for welcome");
            }
            SignalingEvent::Message(msg) => self.mgr.handle_server_message(msg).await,
            SignalingEvent::Disconnected => {
                self.connected = false;
                warn!(room = %self.mgr.room_id(), "Signaling connection lost");
                self.mgr.connection_lost().await;
            }
            SignalingEvent::Error(message) => {
                warn!(error = %message, "Signaling connection failed");
            }
        }
    }

    fn publish(&self) {
        self.status
            .send_replace(SessionSnapshot::capture(&self.mgr, self.connected));
    }
}
