//! Media engine boundary.
//!
//! The SFU media plane (transports, producers, consumers) lives behind this
//! trait. The signaling side only ever holds the string handles it returns.

use async_trait::async_trait;
use sharecast_common::{
    ConsumerParams, DtlsParameters, EngineError, MediaKind, RtpCapabilities, RtpParameters,
    TransportParams,
};
use tokio::sync::watch;

/// Liveness of the engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineHealth {
    Running,
    /// The engine is gone and will not come back. Carries the reason.
    Died(String),
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Allocate a WebRTC transport on the router.
    async fn create_webrtc_transport(&self) -> Result<TransportParams, EngineError>;

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), EngineError>;

    /// Start producing on a connected transport. Returns the producer id.
    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<String, EngineError>;

    /// Whether a consumer with `rtp_capabilities` can receive `producer_id`.
    async fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool;

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<ConsumerParams, EngineError>;

    // Release calls are idempotent; unknown handles are ignored.
    async fn close_transport(&self, transport_id: &str);
    async fn close_producer(&self, producer_id: &str);
    async fn close_consumer(&self, consumer_id: &str);

    /// Subscribe to engine liveness changes.
    fn health(&self) -> watch::Receiver<EngineHealth>;
}

/// Wait until the engine reports it died and return the reason.
///
/// A dropped health sender counts as a death.
pub async fn wait_for_death(mut health: watch::Receiver<EngineHealth>) -> String {
    loop {
        if let EngineHealth::Died(reason) = &*health.borrow_and_update() {
            return reason.clone();
        }
        if health.changed().await.is_err() {
            return "engine health channel closed".to_string();
        }
    }
}
