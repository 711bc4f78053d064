//! Error types for the session layer.

use huddle_engine::EngineError;
use huddle_protocol::{ErrorKind, ProducerId, RoomId};
use huddle_room::RoomError;

/// Errors a session operation can fail with.
///
/// A failed operation leaves the session as it was.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `join` on a session that already joined a room.
    #[error("already joined room {0}")]
    AlreadyJoined(RoomId),

    /// A room operation before `join`.
    #[error("not joined to a room")]
    NotJoined,

    /// Any operation after `disconnect`.
    #[error("session is disconnected")]
    Disconnected,

    /// The router refused to let these capabilities consume the producer.
    #[error("cannot consume producer {0} with the given capabilities")]
    IncompatibleCapabilities(ProducerId),

    /// The room rejected the operation (unknown ids, peer gone, ...).
    #[error(transparent)]
    Room(RoomError),

    /// The media engine rejected the operation.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<RoomError> for SessionError {
    fn from(err: RoomError) -> Self {
        match err {
            // A room that stopped answering is, to the caller, a room that
            // no longer exists.
            RoomError::Unavailable(room_id) => {
                Self::Room(RoomError::RoomNotFound(room_id))
            }
            other => Self::Room(other),
        }
    }
}

impl SessionError {
    /// The wire error category for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyJoined(_) => ErrorKind::AlreadyJoined,
            Self::NotJoined | Self::Disconnected => ErrorKind::InvalidState,
            Self::IncompatibleCapabilities(_) => {
                ErrorKind::IncompatibleCapabilities
            }
            Self::Room(err) => err.kind(),
            Self::Engine(_) => ErrorKind::EngineFailure,
        }
    }
}
