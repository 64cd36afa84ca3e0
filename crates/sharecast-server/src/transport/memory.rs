//! In-process media engine.
//!
//! Models the router's bookkeeping (port allocation, codec matching, handle
//! lifetimes) without moving any RTP. It is what the server runs with by
//! default and what the tests assert resource accounting against.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use sharecast_common::{
    new_id, ConsumerParams, DtlsParameters, EngineError, MediaKind, RtpCapabilities,
    RtpParameters, TransportParams,
};
use sharecast_config::{CodecConfig, MediaConfig};
use tokio::sync::{watch, Mutex};

use super::engine::{EngineHealth, MediaEngine};

struct TransportRecord {
    port: u16,
    connected: bool,
}

struct ProducerRecord {
    transport_id: String,
    kind: MediaKind,
    codec: CodecConfig,
}

struct ConsumerRecord {
    transport_id: String,
}

#[derive(Default)]
struct EngineState {
    transports: HashMap<String, TransportRecord>,
    producers: HashMap<String, ProducerRecord>,
    consumers: HashMap<String, ConsumerRecord>,
    allocations: u64,
}

/// Engine that keeps all media state in memory.
pub struct InMemoryEngine {
    announced_ip: String,
    port_range: (u16, u16),
    protocols: Vec<&'static str>,
    codecs: Vec<CodecConfig>,
    state: Mutex<EngineState>,
    health: watch::Sender<EngineHealth>,
}

impl InMemoryEngine {
    pub fn from_config(config: &MediaConfig) -> Self {
        let mut protocols = Vec::new();
        if config.enable_udp {
            protocols.push("udp");
        }
        if config.enable_tcp {
            protocols.push("tcp");
        }
        if !config.prefer_udp {
            protocols.reverse();
        }

        let (health, _) = watch::channel(EngineHealth::Running);
        Self {
            announced_ip: config
                .announced_ip
                .clone()
                .unwrap_or_else(|| config.listen_ip.clone()),
            port_range: (config.rtc_min_port, config.rtc_max_port),
            protocols,
            codecs: config.codecs.clone(),
            state: Mutex::new(EngineState::default()),
            health,
        }
    }

    /// Mark the engine dead. Every later call fails with `EngineError::Dead`.
    pub fn kill(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(reason = %reason, "Media engine died");
        self.health.send_replace(EngineHealth::Died(reason));
    }

    pub fn is_alive(&self) -> bool {
        *self.health.borrow() == EngineHealth::Running
    }

    /// Router RTP capabilities advertised to clients.
    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        let codecs: Vec<serde_json::Value> = self.codecs.iter().map(codec_json).collect();
        RtpCapabilities(json!({ "codecs": codecs }))
    }

    pub async fn live_transports(&self) -> usize {
        self.state.lock().await.transports.len()
    }

    pub async fn live_producers(&self) -> usize {
        self.state.lock().await.producers.len()
    }

    pub async fn live_consumers(&self) -> usize {
        self.state.lock().await.consumers.len()
    }

    /// Total transports ever allocated, including released ones.
    pub async fn total_allocations(&self) -> u64 {
        self.state.lock().await.allocations
    }

    fn ensure_alive(&self) -> Result<(), EngineError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(EngineError::Dead)
        }
    }

    fn codec_for(&self, kind: MediaKind, rtp_parameters: &RtpParameters) -> Result<CodecConfig, EngineError> {
        let requested: Vec<String> = rtp_parameters
            .0
            .get("codecs")
            .and_then(|c| c.as_array())
            .map(|codecs| {
                codecs
                    .iter()
                    .filter_map(|c| c.get("mimeType").and_then(|m| m.as_str()))
                    .map(|m| m.to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        let mut supported = self
            .codecs
            .iter()
            .filter(|c| c.mime_type.to_ascii_lowercase().starts_with(kind.mime_prefix()));

        if requested.is_empty() {
            return supported
                .next()
                .cloned()
                .ok_or_else(|| EngineError::Call(format!("router has no {kind:?} codec")));
        }
        supported
            .find(|c| requested.contains(&c.mime_type.to_ascii_lowercase()))
            .cloned()
            .ok_or_else(|| EngineError::Call(format!("unsupported codecs {requested:?}")))
    }
}

fn codec_json(codec: &CodecConfig) -> serde_json::Value {
    let mut value = json!({
        "kind": codec.kind,
        "mimeType": codec.mime_type,
        "clockRate": codec.clock_rate,
    });
    if let Some(channels) = codec.channels {
        value["channels"] = json!(channels);
    }
    value
}

#[async_trait]
impl MediaEngine for InMemoryEngine {
    async fn create_webrtc_transport(&self) -> Result<TransportParams, EngineError> {
        self.ensure_alive()?;
        let mut state = self.state.lock().await;

        let (min, max) = self.port_range;
        let port = (min..=max)
            .find(|p| !state.transports.values().any(|t| t.port == *p))
            .ok_or_else(|| EngineError::Allocation(format!("no free port in {min}-{max}")))?;

        let id = new_id();
        let candidates: Vec<serde_json::Value> = self
            .protocols
            .iter()
            .enumerate()
            .map(|(i, protocol)| {
                json!({
                    "foundation": format!("{protocol}candidate"),
                    "ip": self.announced_ip,
                    "port": port,
                    "priority": 1_076_302_079u32 - i as u32,
                    "protocol": protocol,
                    "type": "host",
                })
            })
            .collect();

        let params = TransportParams {
            id: id.clone(),
            ice_parameters: json!({
                "usernameFragment": new_id().replace('-', "")[..16].to_string(),
                "password": new_id().replace('-', ""),
                "iceLite": true,
            }),
            ice_candidates: json!(candidates),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{
                    "algorithm": "sha-256",
                    "value": fingerprint(&id),
                }],
            }),
        };

        state.transports.insert(
            id.clone(),
            TransportRecord {
                port,
                connected: false,
            },
        );
        state.allocations += 1;
        tracing::debug!(transport = %id, port, "Transport allocated");
        Ok(params)
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), EngineError> {
        self.ensure_alive()?;
        if dtls_parameters.0.get("fingerprints").is_none() {
            return Err(EngineError::Call("dtls parameters lack fingerprints".into()));
        }
        let mut state = self.state.lock().await;
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| EngineError::UnknownHandle(transport_id.to_string()))?;
        if transport.connected {
            return Err(EngineError::Call(format!(
                "transport {transport_id} already connected"
            )));
        }
        transport.connected = true;
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<String, EngineError> {
        self.ensure_alive()?;
        let codec = self.codec_for(kind, rtp_parameters)?;
        let mut state = self.state.lock().await;
        match state.transports.get(transport_id) {
            Some(t) if t.connected => {}
            Some(_) => {
                return Err(EngineError::Call(format!(
                    "transport {transport_id} not connected"
                )))
            }
            None => return Err(EngineError::UnknownHandle(transport_id.to_string())),
        }

        let id = new_id();
        state.producers.insert(
            id.clone(),
            ProducerRecord {
                transport_id: transport_id.to_string(),
                kind,
                codec,
            },
        );
        Ok(id)
    }

    async fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        if !self.is_alive() {
            return false;
        }
        let state = self.state.lock().await;
        let Some(producer) = state.producers.get(producer_id) else {
            return false;
        };
        rtp_capabilities
            .codec_mime_types()
            .contains(&producer.codec.mime_type.to_ascii_lowercase())
    }

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<ConsumerParams, EngineError> {
        self.ensure_alive()?;
        let mut state = self.state.lock().await;
        if !state.transports.contains_key(transport_id) {
            return Err(EngineError::UnknownHandle(transport_id.to_string()));
        }
        let producer = state
            .producers
            .get(producer_id)
            .ok_or_else(|| EngineError::UnknownHandle(producer_id.to_string()))?;
        let mime = producer.codec.mime_type.to_ascii_lowercase();
        if !rtp_capabilities.codec_mime_types().contains(&mime) {
            return Err(EngineError::Call(format!("cannot consume {producer_id}")));
        }

        let kind = producer.kind;
        let rtp_parameters = RtpParameters(json!({
            "codecs": [codec_json(&producer.codec)],
            "encodings": [{ "ssrc": ssrc(producer_id) }],
        }));

        let id = new_id();
        state.consumers.insert(
            id.clone(),
            ConsumerRecord {
                transport_id: transport_id.to_string(),
            },
        );
        Ok(ConsumerParams {
            id,
            producer_id: producer_id.to_string(),
            kind,
            rtp_parameters,
            paused,
        })
    }

    async fn close_transport(&self, transport_id: &str) {
        let mut state = self.state.lock().await;
        if state.transports.remove(transport_id).is_none() {
            return;
        }
        // Closing a transport takes its producers and consumers with it.
        state.producers.retain(|_, p| p.transport_id != transport_id);
        state.consumers.retain(|_, c| c.transport_id != transport_id);
        tracing::debug!(transport = %transport_id, "Transport closed");
    }

    async fn close_producer(&self, producer_id: &str) {
        self.state.lock().await.producers.remove(producer_id);
    }

    async fn close_consumer(&self, consumer_id: &str) {
        self.state.lock().await.consumers.remove(consumer_id);
    }

    fn health(&self) -> watch::Receiver<EngineHealth> {
        self.health.subscribe()
    }
}

fn fingerprint(seed: &str) -> String {
    seed.bytes()
        .filter(|b| b.is_ascii_hexdigit())
        .take(32)
        .collect::<Vec<u8>>()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(":")
}

fn ssrc(producer_id: &str) -> u32 {
    producer_id
        .bytes()
        .fold(2_166_136_261u32, |h, b| (h ^ b as u32).wrapping_mul(16_777_619))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> InMemoryEngine {
        InMemoryEngine::from_config(&MediaConfig::default())
    }

    fn dtls() -> DtlsParameters {
        DtlsParameters(json!({ "role": "client", "fingerprints": [] }))
    }

    fn vp8_caps() -> RtpCapabilities {
        RtpCapabilities(json!({ "codecs": [{ "kind": "video", "mimeType": "video/VP8" }] }))
    }

    async fn connected_transport(engine: &InMemoryEngine) -> String {
        let params = engine.create_webrtc_transport().await.unwrap();
        engine.connect_transport(&params.id, &dtls()).await.unwrap();
        params.id
    }

    #[tokio::test]
    async fn transport_params_use_configured_range_and_ip() {
        let mut config = MediaConfig::default();
        config.announced_ip = Some("203.0.113.7".into());
        let engine = InMemoryEngine::from_config(&config);

        let params = engine.create_webrtc_transport().await.unwrap();
        let candidate = &params.ice_candidates[0];
        assert_eq!(candidate["ip"], "203.0.113.7");
        assert_eq!(candidate["port"], 10000);
        assert_eq!(candidate["protocol"], "udp");
        assert_eq!(params.dtls_parameters["role"], "auto");
    }

    #[tokio::test]
    async fn allocation_fails_when_port_range_is_exhausted() {
        let mut config = MediaConfig::default();
        config.rtc_min_port = 20000;
        config.rtc_max_port = 20001;
        let engine = InMemoryEngine::from_config(&config);

        let first = engine.create_webrtc_transport().await.unwrap();
        engine.create_webrtc_transport().await.unwrap();
        let err = engine.create_webrtc_transport().await.unwrap_err();
        assert!(matches!(err, EngineError::Allocation(_)));

        engine.close_transport(&first.id).await;
        assert!(engine.create_webrtc_transport().await.is_ok());
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let engine = engine();
        let id = connected_transport(&engine).await;
        assert!(engine.connect_transport(&id, &dtls()).await.is_err());
    }

    #[tokio::test]
    async fn produce_requires_connected_transport() {
        let engine = engine();
        let params = engine.create_webrtc_transport().await.unwrap();
        let rtp = RtpParameters(json!({}));
        assert!(engine.produce(&params.id, MediaKind::Video, &rtp).await.is_err());

        engine.connect_transport(&params.id, &dtls()).await.unwrap();
        assert!(engine.produce(&params.id, MediaKind::Video, &rtp).await.is_ok());
    }

    #[tokio::test]
    async fn produce_rejects_codec_the_router_lacks() {
        let engine = engine();
        let id = connected_transport(&engine).await;
        let rtp = RtpParameters(json!({ "codecs": [{ "mimeType": "video/H265" }] }));
        let err = engine.produce(&id, MediaKind::Video, &rtp).await.unwrap_err();
        assert!(matches!(err, EngineError::Call(_)));
    }

    #[tokio::test]
    async fn can_consume_matches_producer_codec() {
        let engine = engine();
        let id = connected_transport(&engine).await;
        let producer = engine
            .produce(&id, MediaKind::Video, &RtpParameters(json!({})))
            .await
            .unwrap();

        assert!(engine.can_consume(&producer, &vp8_caps()).await);
        let opus_only =
            RtpCapabilities(json!({ "codecs": [{ "kind": "audio", "mimeType": "audio/opus" }] }));
        assert!(!engine.can_consume(&producer, &opus_only).await);
        assert!(!engine.can_consume("missing", &vp8_caps()).await);
    }

    #[tokio::test]
    async fn consume_reports_paused_and_kind() {
        let engine = engine();
        let send = connected_transport(&engine).await;
        let recv = connected_transport(&engine).await;
        let producer = engine
            .produce(&send, MediaKind::Video, &RtpParameters(json!({})))
            .await
            .unwrap();

        let consumer = engine.consume(&recv, &producer, &vp8_caps(), true).await.unwrap();
        assert!(consumer.paused);
        assert_eq!(consumer.kind, MediaKind::Video);
        assert_eq!(consumer.producer_id, producer);
        assert_eq!(consumer.rtp_parameters.0["codecs"][0]["mimeType"], "video/VP8");
        assert_eq!(engine.live_consumers().await, 1);
    }

    #[tokio::test]
    async fn closing_transport_cascades() {
        let engine = engine();
        let send = connected_transport(&engine).await;
        engine
            .produce(&send, MediaKind::Video, &RtpParameters(json!({})))
            .await
            .unwrap();
        assert_eq!(engine.live_producers().await, 1);

        engine.close_transport(&send).await;
        engine.close_transport(&send).await;
        assert_eq!(engine.live_transports().await, 0);
        assert_eq!(engine.live_producers().await, 0);
    }

    #[tokio::test]
    async fn dead_engine_rejects_calls_and_notifies() {
        let engine = engine();
        let mut health = engine.health();
        engine.kill("worker exited");

        assert!(health.has_changed().unwrap());
        assert_eq!(
            *health.borrow_and_update(),
            EngineHealth::Died("worker exited".into())
        );
        assert_eq!(
            engine.create_webrtc_transport().await.unwrap_err(),
            EngineError::Dead
        );
    }

    #[test]
    fn rtp_capabilities_list_configured_codecs() {
        let caps = engine().rtp_capabilities();
        assert_eq!(caps.codec_mime_types(), vec!["audio/opus", "video/vp8"]);
        assert_eq!(caps.0["codecs"][0]["channels"], 2);
    }
}
