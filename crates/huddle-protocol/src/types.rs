//! Core protocol types: identifiers, negotiation metadata, and the
//! signaling messages that travel on the wire.
//!
//! Field names on the wire are camelCase and message types are kebab-case,
//! matching what browser SFU clients send.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identity of one connected participant.
///
/// Derived from the signaling connection, so it is only stable for the
/// lifetime of that connection. Serializes as a plain number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Declares a string-backed identifier newtype.
///
/// All of these serialize as the bare string and display as-is.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Caller-supplied room key. Any string names a room; the room is
    /// created on first join.
    RoomId
);
string_id!(
    /// Identifier of a media transport, unique within its peer.
    TransportId
);
string_id!(
    /// Identifier of a producer (an outbound media stream).
    ProducerId
);
string_id!(
    /// Identifier of a consumer (an inbound media stream).
    ConsumerId
);

// ---------------------------------------------------------------------------
// Media vocabulary
// ---------------------------------------------------------------------------

/// The kind of a media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// The direction media flows over a transport, from the client's view.
///
/// Recorded when the transport is created; nothing downstream enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    /// The client sends media (produces) over this transport.
    Send,
    /// The client receives media (consumes) over this transport.
    Recv,
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Recv => f.write_str("recv"),
        }
    }
}

// ---------------------------------------------------------------------------
// Opaque negotiation metadata
// ---------------------------------------------------------------------------

/// Codecs and header extensions a router or a client can handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub serde_json::Value);

/// RTP send/receive parameters of a producer or consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub serde_json::Value);

/// DTLS role and fingerprints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub serde_json::Value);

/// ICE username fragment and password.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceParameters(pub serde_json::Value);

/// The list of ICE candidates a transport listens on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceCandidates(pub serde_json::Value);

// ---------------------------------------------------------------------------
// Summaries and parameter bundles
// ---------------------------------------------------------------------------

/// A roster entry. Never carries anything about the peer's media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: PeerId,
    pub username: String,
}

/// A producer as seen by the other peers of the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSummary {
    pub peer_id: PeerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
}

/// What a client needs to set up its side of a new transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: IceCandidates,
    pub dtls_parameters: DtlsParameters,
}

/// What a client needs to set up its side of a new consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who inside a room should receive a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every peer currently in the room.
    All,
    /// Every peer in the room except the given one (usually the actor
    /// that caused the change).
    AllExcept(PeerId),
}

impl Recipient {
    /// Returns `true` if `peer` is covered by this recipient set.
    pub fn includes(&self, peer: PeerId) -> bool {
        match self {
            Self::All => true,
            Self::AllExcept(excluded) => *excluded != peer,
        }
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// A request frame. `id` is the correlation token echoed in the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub request: Request,
}

/// Every request a client can make.
///
/// All of them name the room they act on. Only `join-room` may name a room
/// the sender is not already in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    JoinRoom {
        room_id: RoomId,
        username: String,
    },
    CreateTransport {
        room_id: RoomId,
        direction: TransportDirection,
    },
    ConnectTransport {
        room_id: RoomId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },
    Produce {
        room_id: RoomId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
    Consume {
        room_id: RoomId,
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    },
    ResumeConsumer {
        room_id: RoomId,
        consumer_id: ConsumerId,
    },
    GetProducers {
        room_id: RoomId,
    },
    CloseTransport {
        room_id: RoomId,
        transport_id: TransportId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
}

impl Request {
    /// The room this request targets.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::JoinRoom { room_id, .. }
            | Self::CreateTransport { room_id, .. }
            | Self::ConnectTransport { room_id, .. }
            | Self::Produce { room_id, .. }
            | Self::Consume { room_id, .. }
            | Self::ResumeConsumer { room_id, .. }
            | Self::GetProducers { room_id }
            | Self::CloseTransport { room_id, .. }
            | Self::LeaveRoom { room_id } => room_id,
        }
    }

    /// The wire name of the request, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::CreateTransport { .. } => "create-transport",
            Self::ConnectTransport { .. } => "connect-transport",
            Self::Produce { .. } => "produce",
            Self::Consume { .. } => "consume",
            Self::ResumeConsumer { .. } => "resume-consumer",
            Self::GetProducers { .. } => "get-producers",
            Self::CloseTransport { .. } => "close-transport",
            Self::LeaveRoom { .. } => "leave-room",
        }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Success payload of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Reply {
    /// `join-room`: the router's capabilities and who is already here.
    Joined {
        capabilities: RtpCapabilities,
        peers: Vec<PeerSummary>,
    },
    /// `create-transport`.
    TransportCreated(TransportParams),
    /// Requests with nothing to return.
    Success { success: bool },
    /// `produce`.
    Produced { id: ProducerId },
    /// `consume`.
    Consumed(ConsumerParams),
    /// `get-producers`.
    Producers { producers: Vec<ProducerSummary> },
}

impl Reply {
    /// The `{ success: true }` reply.
    pub fn success() -> Self {
        Self::Success { success: true }
    }
}

/// Server-initiated events about other peers of the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Notification {
    UserJoined {
        peer_id: PeerId,
        username: String,
    },
    UserLeft {
        peer_id: PeerId,
        username: String,
    },
    NewProducer {
        peer_id: PeerId,
        producer_id: ProducerId,
        kind: MediaKind,
    },
    ProducerClosed {
        peer_id: PeerId,
        producer_id: ProducerId,
    },
}

/// Category of a failed request, so clients can branch without parsing
/// the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The room, peer, transport, producer or consumer does not exist
    /// (or belongs to someone else).
    NotFound,
    /// The request is out of sequence, e.g. `produce` before `join-room`.
    InvalidState,
    /// `join-room` on a connection that already joined.
    AlreadyJoined,
    /// The router refused to let these capabilities consume the producer.
    IncompatibleCapabilities,
    /// The media engine rejected the operation.
    EngineFailure,
    /// The frame could not be decoded.
    BadRequest,
}

/// Every frame the server sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Successful reply to request `id`.
    Response { id: u64, result: Reply },
    /// Failed reply to request `id`. Only the requester ever sees it.
    Error {
        id: u64,
        kind: ErrorKind,
        error: String,
    },
    /// An event about the room.
    Notification { event: Notification },
}

// =========================================================================
// Tests
// =========================================================================
