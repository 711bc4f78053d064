//! Media engine facade for Huddle.
//!
//! The signaling core never touches media bytes. Everything that does
//! (codec negotiation, ICE, DTLS, SRTP, RTP forwarding) lives behind the
//! traits in this crate:
//!
//! ```text
//! MediaEngine ──create_router──→ Router ──create_webrtc_transport──→ WebRtcTransport
//!                                                                     │
//!                                             produce ──→ Producer ←──┤
//!                                             consume ──→ Consumer ←──┘
//! ```
//!
//! Handles are cheap to clone and may be moved between tasks. `close()`
//! is synchronous so the room actor can release engine objects without
//! awaiting anything; every other operation that may talk to a media
//! worker is async.
//!
//! # Feature Flags
//!
//! - `loopback` (default): [`LoopbackEngine`], an in-process engine that
//!   negotiates nothing but keeps enough bookkeeping to behave like a
//!   real one. Used by the tests and the demo server.

mod config;
mod error;
#[cfg(feature = "loopback")]
mod loopback;

pub use config::{RouterConfig, RtpCodecCapability, TransportOptions};
pub use error::EngineError;
#[cfg(feature = "loopback")]
pub use loopback::{
    LoopbackConsumer, LoopbackEngine, LoopbackProducer, LoopbackRouter,
    LoopbackStats, LoopbackTransport,
};

use std::future::Future;

use huddle_protocol::{
    ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities,
    RtpParameters, TransportId, TransportParams,
};

/// Entry point to a media engine (one or more media workers).
pub trait MediaEngine: Clone + Send + Sync + 'static {
    /// The router type this engine creates.
    type Router: Router;

    /// Creates a router, the per-room media routing context.
    ///
    /// # Errors
    /// Returns [`EngineError::WorkerDied`] if the worker is gone, or
    /// [`EngineError::Rejected`] if the codec list is unusable.
    fn create_router(
        &self,
        config: &RouterConfig,
    ) -> impl Future<Output = Result<Self::Router, EngineError>> + Send;

    /// Resolves once the media worker has died.
    ///
    /// A dead worker takes every router with it, so the server treats
    /// this as fatal.
    fn worker_died(&self) -> impl Future<Output = ()> + Send;
}

/// A media routing context. Each room owns exactly one.
pub trait Router: Clone + Send + Sync + 'static {
    /// The transport type this router creates.
    type Transport: WebRtcTransport;

    /// Engine-assigned identifier, for logging.
    fn id(&self) -> &str;

    /// Codecs and header extensions clients must negotiate against.
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Creates a WebRTC transport listening per `options`.
    fn create_webrtc_transport(
        &self,
        options: &TransportOptions,
    ) -> impl Future<Output = Result<Self::Transport, EngineError>> + Send;

    /// Whether a client with `rtp_capabilities` can receive `producer_id`.
    fn can_consume(
        &self,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> bool;

    /// Closes the router. Idempotent.
    fn close(&self);
}

/// A negotiated media channel.
pub trait WebRtcTransport: Clone + Send + Sync + 'static {
    type Producer: Producer;
    type Consumer: Consumer;

    fn id(&self) -> &TransportId;

    /// ICE and DTLS metadata the client needs to connect.
    fn connection_params(&self) -> TransportParams;

    /// Completes the DTLS handshake with the client's parameters.
    fn connect(
        &self,
        dtls_parameters: DtlsParameters,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Starts receiving a media stream from the client.
    fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> impl Future<Output = Result<Self::Producer, EngineError>> + Send;

    /// Starts sending `producer_id` to the client.
    fn consume(
        &self,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> impl Future<Output = Result<Self::Consumer, EngineError>> + Send;

    /// Closes the transport. Idempotent.
    fn close(&self);
}

/// One outbound media stream of a client.
pub trait Producer: Clone + Send + Sync + 'static {
    fn id(&self) -> &ProducerId;
    fn kind(&self) -> MediaKind;
    fn close(&self);
}

/// One inbound media stream of a client, fed by a remote producer.
pub trait Consumer: Clone + Send + Sync + 'static {
    fn id(&self) -> &ConsumerId;
    fn producer_id(&self) -> &ProducerId;
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> RtpParameters;

    /// Starts forwarding media. Consumers are created paused.
    fn resume(&self) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn close(&self);
}

/// The router type of engine `E`.
pub type RouterOf<E> = <E as MediaEngine>::Router;
/// The transport type of engine `E`.
pub type TransportOf<E> = <RouterOf<E> as Router>::Transport;
/// The producer type of engine `E`.
pub type ProducerOf<E> = <TransportOf<E> as WebRtcTransport>::Producer;
/// The consumer type of engine `E`.
pub type ConsumerOf<E> = <TransportOf<E> as WebRtcTransport>::Consumer;
