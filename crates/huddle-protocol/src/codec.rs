//! Codec trait and the JSON implementation.
//!
//! The server is written against [`Codec`], so a binary encoding can be
//! swapped in without touching the handler. Browsers speak JSON, which is
//! what [`JsonCodec`] provides.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to frames and decodes frames back to values.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or don't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ```rust
/// use huddle_protocol::{Codec, JsonCodec, RequestEnvelope, Request};
///
/// let codec = JsonCodec;
/// let frame = br#"{"id":7,"request":{"type":"get-producers","roomId":"r1"}}"#;
///
/// let envelope: RequestEnvelope = codec.decode(frame).unwrap();
/// assert_eq!(envelope.id, 7);
/// assert!(matches!(envelope.request, Request::GetProducers { .. }));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
