//! Signaling wire protocol for Huddle.
//!
//! This crate defines what clients and the server say to each other:
//!
//! - **Identifiers** ([`RoomId`], [`PeerId`], [`TransportId`],
//!   [`ProducerId`], [`ConsumerId`]).
//! - **Negotiation metadata** ([`RtpCapabilities`], [`RtpParameters`],
//!   [`DtlsParameters`], ...). These are opaque JSON to everything above
//!   the media engine.
//! - **Messages** ([`RequestEnvelope`], [`Request`], [`Reply`],
//!   [`Notification`], [`ServerMessage`]).
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (RequestEnvelope / ServerMessage) → Session
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ConsumerId, ConsumerParams, DtlsParameters, ErrorKind, IceCandidates,
    IceParameters, MediaKind, Notification, PeerId, PeerSummary, ProducerId,
    ProducerSummary, Recipient, Reply, Request, RequestEnvelope, RoomId,
    RtpCapabilities, RtpParameters, ServerMessage, TransportDirection,
    TransportId, TransportParams,
};
