//! Session coordinator: join, leave, sharer arbitration and signaling relay.
//!
//! Each connection task feeds its decoded frames through [`SessionCoordinator::handle`]
//! one at a time. Registry mutations happen under a single write guard; the
//! resulting notifications are collected into an outbox and delivered once the
//! guard is gone.

use std::sync::Arc;

use sharecast_common::{ClientMessage, ConnectionId, Payload, ServerMessage, SignalError};
use tracing::{debug, info, warn};

use crate::connections::ConnectionIndex;
use crate::registry::{Room, SharedRegistry};
use crate::transport::{MediaEngine, TransportResourceManager};

type Outbox = Vec<(ConnectionId, ServerMessage)>;

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SessionCoordinator {
    registry: SharedRegistry,
    connections: ConnectionIndex,
    transports: TransportResourceManager,
}

impl SessionCoordinator {
    pub fn new(
        registry: SharedRegistry,
        connections: ConnectionIndex,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        let transports = TransportResourceManager::new(registry.clone(), engine);
        Self {
            registry,
            connections,
            transports,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &ConnectionIndex {
        &self.connections
    }

    pub fn transports(&self) -> &TransportResourceManager {
        &self.transports
    }

    /// Decode one text frame and handle it. Malformed frames are answered
    /// with an `error` to the sender only.
    pub async fn handle_frame(&self, conn: &ConnectionId, text: &str) {
        match ClientMessage::decode(text) {
            Ok(msg) => self.handle(conn, msg).await,
            Err(e) => {
                debug!(connection = %conn, error = %e, "Rejected frame");
                self.connections
                    .send(conn, ServerMessage::error(e.to_string()))
                    .await;
            }
        }
    }

    pub async fn handle(&self, conn: &ConnectionId, msg: ClientMessage) {
        debug!(connection = %conn, event = msg.event_name(), "Handling event");
        match msg {
            ClientMessage::JoinRoom { room_id, user_id } => {
                self.join(conn, &room_id, &user_id).await
            }
            ClientMessage::StartSharing { room_id, user_id } => {
                self.start_sharing(conn, &room_id, &user_id).await
            }
            ClientMessage::StopSharing { room_id, user_id } => {
                self.stop_sharing(conn, &room_id, &user_id).await
            }
            ClientMessage::LeaveRoom { room_id, user_id } => {
                self.leave(&room_id, &user_id).await
            }
            ClientMessage::Offer { room_id, to, sdp } => {
                self.relay_offer(conn, &room_id, to, sdp).await
            }
            ClientMessage::Answer { room_id, to, sdp } => {
                let msg = ServerMessage::Answer {
                    from: conn.clone(),
                    sdp,
                };
                self.relay_direct(conn, &room_id, &to, msg).await
            }
            ClientMessage::IceCandidate {
                room_id,
                to,
                candidate,
            } => {
                let msg = ServerMessage::IceCandidate {
                    from: conn.clone(),
                    candidate,
                };
                self.relay_direct(conn, &room_id, &to, msg).await
            }
            sfu => self.handle_sfu(conn, sfu).await,
        }
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    pub async fn join(&self, conn: &ConnectionId, room_id: &str, user_id: &str) {
        let mut outbox = Outbox::new();
        let created = {
            let mut registry = self.registry.write().await;
            let (_, created) = registry.get_or_create(room_id);
            let added = registry.add_user(room_id, user_id, conn);
            let Some(room) = registry.room(room_id) else {
                return;
            };

            let others: Vec<String> = room
                .member_ids()
                .into_iter()
                .filter(|id| id != user_id)
                .collect();
            outbox.push((conn.clone(), ServerMessage::OtherUsers { users: others }));

            if added {
                announce_joiner(room, conn, user_id, &mut outbox);
            } else {
                debug!(room_id, user_id, "Already a member, not re-announcing");
            }
            created
        };

        if created {
            info!(room_id, "Room created");
            self.connections
                .broadcast(&ServerMessage::RoomCreated {
                    room_id: room_id.to_string(),
                })
                .await;
        }
        info!(room_id, user_id, connection = %conn, "User joined");
        self.deliver(outbox).await;
    }

    pub async fn start_sharing(&self, conn: &ConnectionId, room_id: &str, user_id: &str) {
        let recipients = {
            let mut registry = self.registry.write().await;
            let Some(room) = registry.room_mut(room_id) else {
                debug!(room_id, user_id, "start-sharing for unknown room");
                return;
            };
            if !room.start_sharing(user_id) {
                debug!(
                    room_id,
                    user_id,
                    sharer = ?room.sharer_id(),
                    "start-sharing ignored"
                );
                return;
            }
            room.connections_except(Some(conn))
        };

        info!(room_id, user_id, "Sharing started");
        let msg = ServerMessage::StartSharing {
            sharer_id: user_id.to_string(),
        };
        self.deliver(recipients.into_iter().map(|c| (c, msg.clone())).collect())
            .await;
    }

    /// Any caller may stop the room's share; the broadcast goes out even if
    /// the room was already idle.
    pub async fn stop_sharing(&self, conn: &ConnectionId, room_id: &str, user_id: &str) {
        let (previous, recipients) = {
            let mut registry = self.registry.write().await;
            let Some(room) = registry.room_mut(room_id) else {
                debug!(room_id, user_id, "stop-sharing for unknown room");
                return;
            };
            (room.stop_sharing(), room.connections_except(Some(conn)))
        };

        info!(room_id, user_id, previous = ?previous, "Sharing stopped");
        self.deliver(
            recipients
                .into_iter()
                .map(|c| (c, ServerMessage::StopSharing {}))
                .collect(),
        )
        .await;
    }

    pub async fn leave(&self, room_id: &str, user_id: &str) {
        let removal = self.registry.write().await.remove_user(room_id, user_id);
        let Some(removal) = removal else {
            debug!(room_id, user_id, "leave for non-member");
            return;
        };

        let mut outbox = Outbox::new();
        if removal.was_sharer {
            outbox.extend(
                removal
                    .remaining
                    .iter()
                    .map(|c| (c.clone(), ServerMessage::StopSharing {})),
            );
        }
        outbox.extend(removal.remaining.iter().map(|c| {
            (
                c.clone(),
                ServerMessage::UserLeft {
                    user_id: user_id.to_string(),
                },
            )
        }));

        info!(
            room_id,
            user_id,
            was_sharer = removal.was_sharer,
            room_closed = removal.room_closed,
            "User left"
        );
        self.deliver(outbox).await;
        self.transports.release(&removal.session).await;
    }

    /// Transport-level disconnect: leave every room the connection is in.
    pub async fn disconnect(&self, conn: &ConnectionId) {
        self.connections.unregister(conn).await;
        let owned = self.registry.read().await.sessions_for_connection(conn);
        for (room_id, user_id) in owned {
            self.leave(&room_id, &user_id).await;
        }
        debug!(connection = %conn, "Connection cleaned up");
    }

    // -----------------------------------------------------------------------
    // Relay
    // -----------------------------------------------------------------------

    async fn relay_offer(&self, conn: &ConnectionId, room_id: &str, to: String, sdp: Payload) {
        let recipients = match self.registry.read().await.room(room_id) {
            Some(room) if has_connection(room, conn) => room.connections_except(Some(conn)),
            _ => {
                debug!(room_id, connection = %conn, "Offer for unknown room or from non-member dropped");
                return;
            }
        };
        let msg = ServerMessage::Offer {
            from: conn.clone(),
            to,
            sdp,
        };
        self.deliver(recipients.into_iter().map(|c| (c, msg.clone())).collect())
            .await;
    }

    /// Deliver to the member of `room_id` addressed by `to`, which may be a
    /// connection id or a user id. The sender must be a member too.
    async fn relay_direct(
        &self,
        conn: &ConnectionId,
        room_id: &str,
        to: &str,
        msg: ServerMessage,
    ) {
        let target = self
            .registry
            .read()
            .await
            .room(room_id)
            .filter(|room| has_connection(room, conn))
            .and_then(|room| resolve_target(room, to));
        match target {
            Some(target) => {
                if !self.connections.send(&target, msg).await {
                    debug!(room_id, to, "Relay target gone");
                }
            }
            None => {
                debug!(room_id, to, connection = %conn, "Relay outside the sender's rooms dropped")
            }
        }
    }

    // -----------------------------------------------------------------------
    // SFU requests
    // -----------------------------------------------------------------------

    async fn handle_sfu(&self, conn: &ConnectionId, msg: ClientMessage) {
        let event = msg.event_name();
        let Some(request_id) = msg.request_id() else {
            return;
        };
        let result = match msg {
            ClientMessage::CreateProducerTransport { room_id, user_id, .. } => self
                .transports
                .create_producer_transport(&room_id, &user_id)
                .await
                .map(|p| ServerMessage::with_params(request_id, to_value(&p))),
            ClientMessage::CreateConsumerTransport { room_id, user_id, .. } => self
                .transports
                .create_consumer_transport(&room_id, &user_id)
                .await
                .map(|p| ServerMessage::with_params(request_id, to_value(&p))),
            ClientMessage::ConnectProducerTransport {
                room_id,
                user_id,
                dtls_parameters,
                ..
            } => self
                .transports
                .connect_producer_transport(&room_id, &user_id, &dtls_parameters)
                .await
                .map(|()| ServerMessage::ack(request_id)),
            ClientMessage::ConnectConsumerTransport {
                room_id,
                user_id,
                dtls_parameters,
                ..
            } => self
                .transports
                .connect_consumer_transport(&room_id, &user_id, &dtls_parameters)
                .await
                .map(|()| ServerMessage::ack(request_id)),
            ClientMessage::Produce {
                room_id,
                user_id,
                kind,
                rtp_parameters,
                ..
            } => self
                .transports
                .produce(&room_id, &user_id, kind, &rtp_parameters)
                .await
                .map(|id| ServerMessage::with_id(request_id, id)),
            ClientMessage::Consume {
                room_id,
                user_id,
                producer_id,
                rtp_capabilities,
                ..
            } => self
                .transports
                .consume(&room_id, &user_id, &producer_id, &rtp_capabilities)
                .await
                .map(|p| ServerMessage::with_params(request_id, to_value(&p))),
            _ => return,
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                log_signal_error(conn, event, &e);
                ServerMessage::failed(request_id, e.to_string())
            }
        };
        self.connections.send(conn, reply).await;
    }

    async fn deliver(&self, outbox: Outbox) {
        for (target, msg) in outbox {
            self.connections.send(&target, msg).await;
        }
    }
}

/// Queue the notifications a newly added member triggers.
fn announce_joiner(room: &Room, conn: &ConnectionId, user_id: &str, outbox: &mut Outbox) {
    let new_user = ServerMessage::NewUser {
        user_id: user_id.to_string(),
    };
    match room.sharer_id() {
        Some(sharer_id) => {
            outbox.push((
                conn.clone(),
                ServerMessage::StartSharing {
                    sharer_id: sharer_id.to_string(),
                },
            ));
            if let Some(sharer) = room.user(sharer_id) {
                outbox.push((sharer.connection.clone(), new_user));
            }
        }
        None => {
            for other in room.connections_except(Some(conn)) {
                outbox.push((other, new_user.clone()));
            }
        }
    }
}

fn has_connection(room: &Room, conn: &ConnectionId) -> bool {
    room.users().iter().any(|u| &u.connection == conn)
}

fn resolve_target(room: &Room, to: &str) -> Option<ConnectionId> {
    room.user(to)
        .or_else(|| room.users().iter().find(|u| u.connection.as_str() == to))
        .map(|u| u.connection.clone())
}

fn to_value<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

fn log_signal_error(conn: &ConnectionId, event: &str, error: &SignalError) {
    match error {
        SignalError::Engine(e) => warn!(connection = %conn, event, error = %e, "Media engine call failed"),
        SignalError::ProtocolViolation(_) => warn!(connection = %conn, event, error = %error, "Protocol violation"),
        _ => debug!(connection = %conn, event, error = %error, "Request failed"),
    }
}

#[cfg(test)]
mod tests;
