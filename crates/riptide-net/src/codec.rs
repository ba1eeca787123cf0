//! Frame codecs.
//!
//! A [`Codec`] turns inbound frames into values and outbound values into
//! frames. Framing itself (delimiters, length prefixes) belongs to the
//! server implementation.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::NetError;

/// Converts between frames and typed values.
pub trait Codec<In, Out>: Send + Sync + fmt::Debug {
    /// Codec name, used in errors and logs.
    fn name(&self) -> &str;

    /// Decodes one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Codec`] if the frame is malformed.
    fn decode(&self, frame: &[u8]) -> Result<In, NetError>;

    /// Encodes one outbound value.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Codec`] if the value cannot be encoded.
    fn encode(&self, value: &Out) -> Result<Vec<u8>, NetError>;
}

/// UTF-8 text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec<String, String> for Utf8Codec {
    fn name(&self) -> &str {
        "utf8"
    }

    fn decode(&self, frame: &[u8]) -> Result<String, NetError> {
        String::from_utf8(frame.to_vec()).map_err(|e| NetError::Codec {
            codec: "utf8".to_string(),
            reason: e.to_string(),
        })
    }

    fn encode(&self, value: &String) -> Result<Vec<u8>, NetError> {
        Ok(value.as_bytes().to_vec())
    }
}

/// JSON documents, one per frame.
pub struct JsonCodec<In, Out> {
    _types: PhantomData<fn(Out) -> In>,
}

impl<In, Out> JsonCodec<In, Out> {
    /// Creates a JSON codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _types: PhantomData,
        }
    }
}

impl<In, Out> Default for JsonCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> fmt::Debug for JsonCodec<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<In, Out> Codec<In, Out> for JsonCodec<In, Out>
where
    In: DeserializeOwned,
    Out: Serialize,
{
    fn name(&self) -> &str {
        "json"
    }

    fn decode(&self, frame: &[u8]) -> Result<In, NetError> {
        serde_json::from_slice(frame).map_err(|e| NetError::Codec {
            codec: "json".to_string(),
            reason: e.to_string(),
        })
    }

    fn encode(&self, value: &Out) -> Result<Vec<u8>, NetError> {
        serde_json::to_vec(value).map_err(|e| NetError::Codec {
            codec: "json".to_string(),
            reason: e.to_string(),
        })
    }
}
