//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding signaling messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Deserialization failed: malformed JSON, unknown request type,
    /// missing or mistyped fields.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}
