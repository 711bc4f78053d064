//! Unified error type for Huddle.

use huddle_engine::EngineError;
use huddle_protocol::ProtocolError;
use huddle_room::RoomError;
use huddle_session::SessionError;
use huddle_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The media engine's worker died. The server has shut down.
    #[error("media engine worker died")]
    EngineDied,

    /// A configuration value could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use huddle_protocol::RoomId;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let huddle_err: HuddleError = err.into();
        assert!(matches!(huddle_err, HuddleError::Transport(_)));
        assert!(huddle_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = serde_json::from_str::<u64>("bad").unwrap_err();
        let huddle_err: HuddleError = ProtocolError::Decode(err).into();
        assert!(matches!(huddle_err, HuddleError::Protocol(_)));
        assert!(huddle_err.to_string().starts_with("decode failed"));
    }

    #[test]
    fn test_from_session_error() {
        let huddle_err: HuddleError = SessionError::NotJoined.into();
        assert!(matches!(huddle_err, HuddleError::Session(_)));
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::RoomNotFound(RoomId::from("r1"));
        let huddle_err: HuddleError = err.into();
        assert!(matches!(huddle_err, HuddleError::Room(_)));
        assert!(huddle_err.to_string().contains("r1"));
    }

    #[test]
    fn test_from_engine_error() {
        let huddle_err: HuddleError = EngineError::WorkerDied.into();
        assert!(matches!(huddle_err, HuddleError::Engine(_)));
    }
}
