//! In-process media engine.
//!
//! [`LoopbackEngine`] moves no media. It hands out identifiers, synthesizes
//! ICE/DTLS metadata that looks like a real worker's, and tracks producers
//! per router so [`Router::can_consume`] answers the way a real engine
//! would. It also carries the hooks tests need: artificial latency,
//! failure injection, counters and a way to kill the worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use huddle_protocol::{
    ConsumerId, DtlsParameters, IceCandidates, IceParameters, MediaKind,
    ProducerId, RtpCapabilities, RtpParameters, TransportId, TransportParams,
};
use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::{
    Consumer, EngineError, MediaEngine, Producer, Router, RouterConfig,
    RtpCodecCapability, TransportOptions, WebRtcTransport,
};

/// First payload type handed out to router codecs.
const FIRST_PAYLOAD_TYPE: usize = 100;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// An in-process [`MediaEngine`].
///
/// Cloning is cheap; clones share counters and the worker.
///
/// ```rust
/// use huddle_engine::{LoopbackEngine, MediaEngine, Router, RouterConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let engine = LoopbackEngine::new();
/// let router = engine.create_router(&RouterConfig::default()).await.unwrap();
/// assert!(router.rtp_capabilities().0["codecs"].is_array());
/// assert_eq!(engine.stats().routers_created, 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LoopbackEngine {
    inner: Arc<EngineInner>,
    latency: Duration,
}

#[derive(Debug)]
struct EngineInner {
    counters: Counters,
    fail_transports: AtomicBool,
    /// `true` once the worker is dead.
    worker: watch::Sender<bool>,
}

impl EngineInner {
    fn worker_alive(&self) -> bool {
        !*self.worker.borrow()
    }
}

#[derive(Debug, Default)]
struct Counters {
    routers_created: AtomicUsize,
    routers_closed: AtomicUsize,
    transports_created: AtomicUsize,
    transports_closed: AtomicUsize,
    producers_created: AtomicUsize,
    producers_closed: AtomicUsize,
    consumers_created: AtomicUsize,
    consumers_closed: AtomicUsize,
    consumer_resumes: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// A snapshot of a [`LoopbackEngine`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub routers_created: usize,
    pub routers_closed: usize,
    pub transports_created: usize,
    pub transports_closed: usize,
    pub producers_created: usize,
    pub producers_closed: usize,
    pub consumers_created: usize,
    pub consumers_closed: usize,
    /// Resumes that actually reached the engine.
    pub consumer_resumes: usize,
}

impl LoopbackEngine {
    /// Creates an engine with a live worker and no latency.
    pub fn new() -> Self {
        let (worker, _) = watch::channel(false);
        Self {
            inner: Arc::new(EngineInner {
                counters: Counters::default(),
                fail_transports: AtomicBool::new(false),
                worker,
            }),
            latency: Duration::ZERO,
        }
    }

    /// Delays every async engine call by `latency`.
    ///
    /// Applies to routers and transports created through the returned
    /// engine.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes every following `create_webrtc_transport` fail (or succeed
    /// again).
    pub fn fail_transports(&self, fail: bool) {
        self.inner.fail_transports.store(fail, Ordering::Relaxed);
    }

    /// Kills the worker. `worker_died` resolves and every following
    /// router or transport creation fails with `WorkerDied`.
    pub fn kill_worker(&self) {
        tracing::warn!("loopback worker killed");
        self.inner.worker.send_replace(true);
    }

    /// Returns `true` until [`kill_worker`](Self::kill_worker) is called.
    pub fn is_worker_alive(&self) -> bool {
        self.inner.worker_alive()
    }

    /// Reads the counters.
    pub fn stats(&self) -> LoopbackStats {
        let c = &self.inner.counters;
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        LoopbackStats {
            routers_created: load(&c.routers_created),
            routers_closed: load(&c.routers_closed),
            transports_created: load(&c.transports_created),
            transports_closed: load(&c.transports_closed),
            producers_created: load(&c.producers_created),
            producers_closed: load(&c.producers_closed),
            consumers_created: load(&c.consumers_created),
            consumers_closed: load(&c.consumers_closed),
            consumer_resumes: load(&c.consumer_resumes),
        }
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for LoopbackEngine {
    type Router = LoopbackRouter;

    async fn create_router(
        &self,
        config: &RouterConfig,
    ) -> Result<LoopbackRouter, EngineError> {
        let codecs = config.media_codecs.clone();
        pause(self.latency).await;

        if !self.inner.worker_alive() {
            return Err(EngineError::WorkerDied);
        }
        if codecs.is_empty() {
            return Err(EngineError::Rejected(
                "router needs at least one media codec".into(),
            ));
        }

        let router = LoopbackRouter {
            inner: Arc::new(RouterInner {
                id: random_hex(16),
                codecs,
                producers: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                engine: Arc::clone(&self.inner),
                latency: self.latency,
            }),
        };
        bump(&self.inner.counters.routers_created);
        tracing::debug!(router_id = %router.inner.id, "router created");
        Ok(router)
    }

    async fn worker_died(&self) {
        let mut rx = self.inner.worker.subscribe();
        loop {
            let dead = *rx.borrow_and_update();
            if dead {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone; the worker can no longer die.
                std::future::pending::<()>().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// A [`LoopbackEngine`] router.
#[derive(Debug, Clone)]
pub struct LoopbackRouter {
    inner: Arc<RouterInner>,
}

#[derive(Debug)]
struct RouterInner {
    id: String,
    codecs: Vec<RtpCodecCapability>,
    /// Live producers and their kinds, for `can_consume`.
    producers: Mutex<HashMap<ProducerId, MediaKind>>,
    closed: AtomicBool,
    engine: Arc<EngineInner>,
    latency: Duration,
}

impl RouterInner {
    fn producers(&self) -> MutexGuard<'_, HashMap<ProducerId, MediaKind>> {
        self.producers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn producer_kind(&self, producer_id: &ProducerId) -> Option<MediaKind> {
        self.producers().get(producer_id).copied()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Router codecs as RTP codec JSON, each with its payload type.
    fn codecs_json(&self, kind: Option<MediaKind>) -> Vec<Value> {
        self.codecs
            .iter()
            .enumerate()
            .filter(|(_, codec)| kind.is_none_or(|k| codec.kind == k))
            .map(|(i, codec)| {
                let mut value = json!({
                    "kind": codec.kind,
                    "mimeType": codec.mime_type,
                    "clockRate": codec.clock_rate,
                    "preferredPayloadType": FIRST_PAYLOAD_TYPE + i,
                });
                if let Some(channels) = codec.channels {
                    value["channels"] = json!(channels);
                }
                value
            })
            .collect()
    }
}

impl LoopbackRouter {
    /// Returns `true` once [`Router::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of live producers on this router.
    pub fn producer_count(&self) -> usize {
        self.inner.producers().len()
    }
}

impl Router for LoopbackRouter {
    type Transport = LoopbackTransport;

    fn id(&self) -> &str {
        &self.inner.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        RtpCapabilities(json!({
            "codecs": self.inner.codecs_json(None),
            "headerExtensions": [],
        }))
    }

    async fn create_webrtc_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<LoopbackTransport, EngineError> {
        let options = options.clone();
        pause(self.inner.latency).await;

        let engine = &self.inner.engine;
        if !engine.worker_alive() {
            return Err(EngineError::WorkerDied);
        }
        if self.inner.is_closed() {
            return Err(EngineError::Closed(format!("router {}", self.inner.id)));
        }
        if engine.fail_transports.load(Ordering::Relaxed) {
            return Err(EngineError::Rejected(
                "transport creation failed".into(),
            ));
        }

        let params = synthesize_transport_params(&options);
        bump(&engine.counters.transports_created);
        tracing::debug!(
            router_id = %self.inner.id,
            transport_id = %params.id,
            "transport created"
        );

        Ok(LoopbackTransport {
            inner: Arc::new(TransportInner {
                params,
                router: Arc::clone(&self.inner),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn can_consume(
        &self,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> bool {
        self.inner
            .producer_kind(producer_id)
            .is_some_and(|kind| capabilities_have_kind(rtp_capabilities, kind))
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.producers().clear();
        bump(&self.inner.engine.counters.routers_closed);
        tracing::debug!(router_id = %self.inner.id, "router closed");
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A [`LoopbackEngine`] WebRTC transport.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    inner: Arc<TransportInner>,
}

#[derive(Debug)]
struct TransportInner {
    params: TransportParams,
    router: Arc<RouterInner>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackTransport {
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() || self.inner.router.is_closed() {
            return Err(EngineError::Closed(format!(
                "transport {}",
                self.inner.params.id
            )));
        }
        Ok(())
    }
}

impl WebRtcTransport for LoopbackTransport {
    type Producer = LoopbackProducer;
    type Consumer = LoopbackConsumer;

    fn id(&self) -> &TransportId {
        &self.inner.params.id
    }

    fn connection_params(&self) -> TransportParams {
        self.inner.params.clone()
    }

    async fn connect(
        &self,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), EngineError> {
        pause(self.inner.router.latency).await;
        self.ensure_open()?;

        if !dtls_parameters.0.is_object() {
            return Err(EngineError::Rejected(
                "dtls parameters must be an object".into(),
            ));
        }
        if self.inner.connected.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Rejected(format!(
                "transport {} already connected",
                self.inner.params.id
            )));
        }
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<LoopbackProducer, EngineError> {
        pause(self.inner.router.latency).await;
        self.ensure_open()?;

        if !rtp_parameters.0.is_object() {
            return Err(EngineError::Rejected(
                "rtp parameters must be an object".into(),
            ));
        }

        let router = &self.inner.router;
        let id = ProducerId(random_hex(16));
        router.producers().insert(id.clone(), kind);
        bump(&router.engine.counters.producers_created);

        Ok(LoopbackProducer {
            inner: Arc::new(ProducerInner {
                id,
                kind,
                router: Arc::clone(router),
                closed: AtomicBool::new(false),
            }),
        })
    }

    async fn consume(
        &self,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> Result<LoopbackConsumer, EngineError> {
        pause(self.inner.router.latency).await;
        self.ensure_open()?;

        let router = &self.inner.router;
        let Some(kind) = router.producer_kind(&producer_id) else {
            return Err(EngineError::Rejected(format!(
                "producer {producer_id} not found"
            )));
        };
        if !capabilities_have_kind(&rtp_capabilities, kind) {
            return Err(EngineError::Rejected(format!(
                "cannot consume producer {producer_id} with these capabilities"
            )));
        }

        let rtp_parameters = RtpParameters(json!({
            "codecs": router.codecs_json(Some(kind)),
            "encodings": [{ "ssrc": random_ssrc() }],
            "headerExtensions": [],
        }));
        bump(&router.engine.counters.consumers_created);

        Ok(LoopbackConsumer {
            inner: Arc::new(ConsumerInner {
                id: ConsumerId(random_hex(16)),
                producer_id,
                kind,
                rtp_parameters,
                paused: AtomicBool::new(paused),
                closed: AtomicBool::new(false),
                router: Arc::clone(router),
            }),
        })
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        bump(&self.inner.router.engine.counters.transports_closed);
    }
}

// ---------------------------------------------------------------------------
// Producer / Consumer
// ---------------------------------------------------------------------------

/// A [`LoopbackEngine`] producer.
#[derive(Debug, Clone)]
pub struct LoopbackProducer {
    inner: Arc<ProducerInner>,
}

#[derive(Debug)]
struct ProducerInner {
    id: ProducerId,
    kind: MediaKind,
    router: Arc<RouterInner>,
    closed: AtomicBool,
}

impl LoopbackProducer {
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Producer for LoopbackProducer {
    fn id(&self) -> &ProducerId {
        &self.inner.id
    }

    fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.router.producers().remove(&self.inner.id);
        bump(&self.inner.router.engine.counters.producers_closed);
    }
}

/// A [`LoopbackEngine`] consumer.
#[derive(Debug, Clone)]
pub struct LoopbackConsumer {
    inner: Arc<ConsumerInner>,
}

#[derive(Debug)]
struct ConsumerInner {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    closed: AtomicBool,
    router: Arc<RouterInner>,
}

impl LoopbackConsumer {
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Consumer for LoopbackConsumer {
    fn id(&self) -> &ConsumerId {
        &self.inner.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.inner.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.inner.rtp_parameters.clone()
    }

    async fn resume(&self) -> Result<(), EngineError> {
        pause(self.inner.router.latency).await;
        if self.is_closed() {
            return Err(EngineError::Closed(format!("consumer {}", self.inner.id)));
        }
        self.inner.paused.store(false, Ordering::Release);
        bump(&self.inner.router.engine.counters.consumer_resumes);
        Ok(())
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        bump(&self.inner.router.engine.counters.consumers_closed);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

/// Returns `true` if the capabilities list a codec of `kind`.
fn capabilities_have_kind(caps: &RtpCapabilities, kind: MediaKind) -> bool {
    caps.0
        .get("codecs")
        .and_then(Value::as_array)
        .is_some_and(|codecs| codecs.iter().any(|c| codec_has_kind(c, kind)))
}

/// Returns `true` if a client codec entry is of `kind`, judged by its
/// `kind` field or its mime type prefix.
fn codec_has_kind(codec: &Value, kind: MediaKind) -> bool {
    let kind = kind.to_string();
    if codec.get("kind").and_then(Value::as_str) == Some(kind.as_str()) {
        return true;
    }
    codec
        .get("mimeType")
        .and_then(Value::as_str)
        .and_then(|mime| mime.split_once('/'))
        .is_some_and(|(prefix, _)| prefix.eq_ignore_ascii_case(&kind))
}

/// `bytes` random bytes as lowercase hex.
fn random_hex(bytes: usize) -> String {
    let mut rng = rand::rng();
    (0..bytes).map(|_| format!("{:02x}", rng.random::<u8>())).collect()
}

fn random_ssrc() -> u32 {
    rand::rng().random_range(100_000_000..=999_999_999)
}

fn synthesize_transport_params(options: &TransportOptions) -> TransportParams {
    let mut rng = rand::rng();
    let address = options
        .announced_ip
        .clone()
        .unwrap_or_else(|| options.listen_ip.to_string());
    let port: u16 = rng.random_range(40_000..50_000);

    let mut candidates = Vec::new();
    for (protocol, enabled, preferred) in [
        ("udp", options.enable_udp, options.prefer_udp),
        ("tcp", options.enable_tcp, !options.prefer_udp),
    ] {
        if !enabled {
            continue;
        }
        let priority: u32 = if preferred { 1_076_302_079 } else { 1_076_276_479 };
        candidates.push(json!({
            "foundation": format!("{protocol}candidate"),
            "priority": priority,
            "ip": address,
            "protocol": protocol,
            "port": port,
            "type": "host",
        }));
    }

    let fingerprint = (0..32)
        .map(|_| format!("{:02X}", rng.random::<u8>()))
        .collect::<Vec<_>>()
        .join(":");

    TransportParams {
        id: TransportId(random_hex(16)),
        ice_parameters: IceParameters(json!({
            "usernameFragment": random_hex(8),
            "password": random_hex(16),
            "iceLite": true,
        })),
        ice_candidates: IceCandidates(Value::Array(candidates)),
        dtls_parameters: DtlsParameters(json!({
            "role": "auto",
            "fingerprints": [{ "algorithm": "sha-256", "value": fingerprint }],
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_length_and_charset() {
        let id = random_hex(16);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(random_hex(16), random_hex(16));
    }

    #[test]
    fn test_codec_has_kind_by_field_or_mime_type() {
        assert!(codec_has_kind(&json!({ "kind": "audio" }), MediaKind::Audio));
        assert!(codec_has_kind(
            &json!({ "mimeType": "video/VP8" }),
            MediaKind::Video
        ));
        assert!(!codec_has_kind(
            &json!({ "mimeType": "audio/opus" }),
            MediaKind::Video
        ));
        assert!(!codec_has_kind(&json!({}), MediaKind::Audio));
    }

    #[test]
    fn test_synthesized_candidates_follow_options() {
        let options = TransportOptions {
            announced_ip: Some("203.0.113.7".into()),
            enable_tcp: false,
            ..TransportOptions::default()
        };
        let params = synthesize_transport_params(&options);
        let candidates = params.ice_candidates.0.as_array().unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0]["protocol"], "udp");
        assert_eq!(candidates[0]["ip"], "203.0.113.7");
        assert_eq!(params.dtls_parameters.0["role"], "auto");
    }
}
