//! Error types for the room layer.

use huddle_engine::EngineError;
use huddle_protocol::{
    ConsumerId, ErrorKind, PeerId, ProducerId, RoomId, TransportId,
};

/// Errors that can occur during room operations.
///
/// The `*NotFound` variants are client errors: the id is unknown, or it
/// belongs to another peer.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist.
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    /// The peer is not in this room.
    #[error("peer {0} not found")]
    PeerNotFound(PeerId),

    #[error("transport {0} not found")]
    TransportNotFound(TransportId),

    #[error("producer {0} not found")]
    ProducerNotFound(ProducerId),

    #[error("consumer {0} not found")]
    ConsumerNotFound(ConsumerId),

    /// The peer is already in this room.
    #[error("peer {0} already in room {1}")]
    AlreadyInRoom(PeerId, RoomId),

    /// A store invariant would be broken, e.g. an id collision.
    #[error("invalid room state: {0}")]
    InvalidState(String),

    /// The room's command channel is closed: the room was torn down.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    /// The room's router could not be created.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RoomError {
    /// The wire error category for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RoomNotFound(_)
            | Self::PeerNotFound(_)
            | Self::TransportNotFound(_)
            | Self::ProducerNotFound(_)
            | Self::ConsumerNotFound(_)
            | Self::Unavailable(_) => ErrorKind::NotFound,
            Self::AlreadyInRoom(..) => ErrorKind::AlreadyJoined,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Engine(_) => ErrorKind::EngineFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_error_kind_mapping() {
        assert_eq!(
            RoomError::TransportNotFound(TransportId::from("t")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            RoomError::Unavailable(RoomId::from("r")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            RoomError::AlreadyInRoom(PeerId(1), RoomId::from("r")).kind(),
            ErrorKind::AlreadyJoined
        );
        assert_eq!(
            RoomError::Engine(EngineError::WorkerDied).kind(),
            ErrorKind::EngineFailure
        );
    }
}
