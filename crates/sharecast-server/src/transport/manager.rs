//! Transport resource manager: per-session SFU transports, producers and
//! consumers.
//!
//! Every engine call happens with the registry lock released. When the call
//! returns, the session is looked up again and its generation compared with
//! the one read before the call. A mismatch means the user left (or left and
//! re-joined) in the meantime; the freshly created resource is then released
//! on the spot instead of being recorded.

use std::sync::Arc;

use sharecast_common::{
    ConsumerParams, DtlsParameters, MediaKind, RtpCapabilities, RtpParameters, SignalError,
    TransportParams,
};

use super::engine::MediaEngine;
use crate::registry::{SharedRegistry, TransportHandle, TransportSide, UserSession};

#[derive(Clone)]
pub struct TransportResourceManager {
    registry: SharedRegistry,
    engine: Arc<dyn MediaEngine>,
}

impl TransportResourceManager {
    pub fn new(registry: SharedRegistry, engine: Arc<dyn MediaEngine>) -> Self {
        Self { registry, engine }
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    pub async fn create_producer_transport(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<TransportParams, SignalError> {
        self.create_transport(room_id, user_id, TransportSide::Producer)
            .await
    }

    pub async fn create_consumer_transport(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<TransportParams, SignalError> {
        self.create_transport(room_id, user_id, TransportSide::Consumer)
            .await
    }

    pub async fn connect_producer_transport(
        &self,
        room_id: &str,
        user_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), SignalError> {
        self.connect_transport(room_id, user_id, TransportSide::Producer, dtls_parameters)
            .await
    }

    pub async fn connect_consumer_transport(
        &self,
        room_id: &str,
        user_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), SignalError> {
        self.connect_transport(room_id, user_id, TransportSide::Consumer, dtls_parameters)
            .await
    }

    async fn create_transport(
        &self,
        room_id: &str,
        user_id: &str,
        side: TransportSide,
    ) -> Result<TransportParams, SignalError> {
        let generation = {
            let registry = self.registry.read().await;
            let session = registry
                .session(room_id, user_id)
                .ok_or_else(|| not_a_member(room_id, user_id))?;
            if session.transport(side).is_some() {
                return Err(SignalError::ProtocolViolation(format!(
                    "{} already exists",
                    side.label()
                )));
            }
            session.generation
        };

        let params = self.engine.create_webrtc_transport().await?;

        let mut registry = self.registry.write().await;
        let outcome = match registry.session_mut(room_id, user_id) {
            Some(session) if session.generation == generation => {
                let slot = session.transport_mut(side);
                if slot.is_some() {
                    Err(SignalError::ProtocolViolation(format!(
                        "{} already exists",
                        side.label()
                    )))
                } else {
                    *slot = Some(TransportHandle::new(params.id.clone()));
                    Ok(())
                }
            }
            _ => Err(not_a_member(room_id, user_id)),
        };
        drop(registry);

        match outcome {
            Ok(()) => {
                tracing::debug!(room = %room_id, user = %user_id, transport = %params.id, "{} created", side.label());
                Ok(params)
            }
            Err(e) => {
                tracing::info!(room = %room_id, user = %user_id, transport = %params.id, "Releasing orphaned {}", side.label());
                self.engine.close_transport(&params.id).await;
                Err(e)
            }
        }
    }

    async fn connect_transport(
        &self,
        room_id: &str,
        user_id: &str,
        side: TransportSide,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), SignalError> {
        let (generation, transport_id) = {
            let registry = self.registry.read().await;
            let session = registry
                .session(room_id, user_id)
                .ok_or_else(|| SignalError::TransportNotFound(side.label().to_string()))?;
            let transport = session
                .transport(side)
                .ok_or_else(|| SignalError::TransportNotFound(side.label().to_string()))?;
            if transport.connected {
                return Err(SignalError::ProtocolViolation(format!(
                    "{} already connected",
                    side.label()
                )));
            }
            (session.generation, transport.id.clone())
        };

        self.engine
            .connect_transport(&transport_id, dtls_parameters)
            .await?;

        let mut registry = self.registry.write().await;
        match registry
            .session_mut(room_id, user_id)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.transport_mut(side).as_mut())
            .filter(|t| t.id == transport_id)
        {
            Some(transport) => {
                transport.connected = true;
                Ok(())
            }
            None => Err(SignalError::TransportNotFound(side.label().to_string())),
        }
    }

    /// Start producing on the user's connected producer transport.
    pub async fn produce(
        &self,
        room_id: &str,
        user_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<String, SignalError> {
        let (generation, transport_id) =
            self.connected_transport(room_id, user_id, TransportSide::Producer)
                .await?;

        let producer_id = self
            .engine
            .produce(&transport_id, kind, rtp_parameters)
            .await?;

        let mut registry = self.registry.write().await;
        match owned_session(&mut registry, room_id, user_id, generation, TransportSide::Producer, &transport_id) {
            Some(session) => {
                session.producers.insert(producer_id.clone());
                Ok(producer_id)
            }
            None => {
                drop(registry);
                tracing::info!(room = %room_id, user = %user_id, producer = %producer_id, "Releasing orphaned producer");
                self.engine.close_producer(&producer_id).await;
                Err(SignalError::TransportNotFound(
                    TransportSide::Producer.label().to_string(),
                ))
            }
        }
    }

    /// Consume `producer_id` on the user's connected consumer transport.
    /// Consumers always start paused.
    pub async fn consume(
        &self,
        room_id: &str,
        user_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerParams, SignalError> {
        let (generation, transport_id) =
            self.connected_transport(room_id, user_id, TransportSide::Consumer)
                .await?;

        if !self.engine.can_consume(producer_id, rtp_capabilities).await {
            return Err(SignalError::IncompatibleCapabilities(
                producer_id.to_string(),
            ));
        }

        let params = self
            .engine
            .consume(&transport_id, producer_id, rtp_capabilities, true)
            .await?;

        let mut registry = self.registry.write().await;
        match owned_session(&mut registry, room_id, user_id, generation, TransportSide::Consumer, &transport_id) {
            Some(session) => {
                session.consumers.insert(params.id.clone());
                Ok(params)
            }
            None => {
                drop(registry);
                tracing::info!(room = %room_id, user = %user_id, consumer = %params.id, "Releasing orphaned consumer");
                self.engine.close_consumer(&params.id).await;
                Err(SignalError::TransportNotFound(
                    TransportSide::Consumer.label().to_string(),
                ))
            }
        }
    }

    /// Release every engine resource a removed session owned.
    pub async fn release(&self, session: &UserSession) {
        for consumer in &session.consumers {
            self.engine.close_consumer(consumer).await;
        }
        for producer in &session.producers {
            self.engine.close_producer(producer).await;
        }
        for side in [TransportSide::Consumer, TransportSide::Producer] {
            if let Some(transport) = session.transport(side) {
                self.engine.close_transport(&transport.id).await;
            }
        }
        tracing::debug!(
            user = %session.user_id,
            producers = session.producers.len(),
            consumers = session.consumers.len(),
            "Released session media"
        );
    }

    async fn connected_transport(
        &self,
        room_id: &str,
        user_id: &str,
        side: TransportSide,
    ) -> Result<(u64, String), SignalError> {
        let registry = self.registry.read().await;
        let session = registry
            .session(room_id, user_id)
            .ok_or_else(|| SignalError::TransportNotFound(side.label().to_string()))?;
        match session.transport(side) {
            Some(t) if t.connected => Ok((session.generation, t.id.clone())),
            Some(_) => Err(SignalError::ProtocolViolation(format!(
                "{} not connected",
                side.label()
            ))),
            None => Err(SignalError::TransportNotFound(side.label().to_string())),
        }
    }
}

/// The session if it is still the same one and still owns `transport_id`.
fn owned_session<'a>(
    registry: &'a mut crate::registry::RoomRegistry,
    room_id: &str,
    user_id: &str,
    generation: u64,
    side: TransportSide,
    transport_id: &str,
) -> Option<&'a mut UserSession> {
    registry
        .session_mut(room_id, user_id)
        .filter(|s| s.generation == generation)
        .filter(|s| s.transport(side).is_some_and(|t| t.id == transport_id))
}

fn not_a_member(room_id: &str, user_id: &str) -> SignalError {
    SignalError::NotFound(format!("user {user_id} in room {room_id}"))
}
