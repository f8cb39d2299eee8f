//! Encoding and decoding for the wire protocol.
//!
//! This module provides the codec boundary used by connections (encode) and
//! dispatchers (decode), plus the envelope check that validation relies on.

use crate::error::WireError;
use crate::transmission::Transmission;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::trace;

/// Largest raw transmission accepted by [`JsonCodec::decode`] (16 MiB)
pub const MAX_TRANSMISSION_SIZE: usize = 16 * 1024 * 1024;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Wire protocol error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    /// Transmission could not be encoded
    #[error("transmission encoding failed: {0}")]
    Encode(String),
    /// Raw text did not decode into a transmission
    #[error("transmission decoding failed: {0}")]
    Decode(String),
}

/// Converts transmissions to and from their wire text
pub trait TransmissionCodec: Send + Sync + fmt::Debug {
    /// Encode a transmission into a single wire string
    fn encode(&self, transmission: &Transmission) -> Result<String, CodecError>;

    /// Decode a wire string into a transmission
    fn decode(&self, raw: &str) -> Result<Transmission, CodecError>;
}

/// JSON text codec
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    max_size: usize,
}

impl JsonCodec {
    /// Create a codec with the default size limit
    pub fn new() -> Self {
        Self {
            max_size: MAX_TRANSMISSION_SIZE,
        }
    }

    /// Create a codec that rejects raw input above `max_size` bytes
    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TransmissionCodec for JsonCodec {
    fn encode(&self, transmission: &Transmission) -> Result<String, CodecError> {
        serde_json::to_string(transmission).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, raw: &str) -> Result<Transmission, CodecError> {
        if raw.len() > self.max_size {
            return Err(WireError::Size(raw.len()).into());
        }
        let transmission: Transmission =
            serde_json::from_str(raw).map_err(|e| CodecError::Decode(e.to_string()))?;
        trace!("Decoded transmission {}", transmission);
        Ok(transmission)
    }
}

/// Parse a message as a structured envelope.
///
/// An envelope is a JSON object or a JSON array (batch). Scalars parse as
/// JSON but are not envelopes.
pub fn parse_envelope(message: &str) -> Result<Value, WireError> {
    let value: Value =
        serde_json::from_str(message).map_err(|e| WireError::Malformed(e.to_string()))?;

    match value {
        Value::Object(_) | Value::Array(_) => Ok(value),
        Value::Null => Err(WireError::NotEnvelope("null")),
        Value::Bool(_) => Err(WireError::NotEnvelope("boolean")),
        Value::Number(_) => Err(WireError::NotEnvelope("number")),
        Value::String(_) => Err(WireError::NotEnvelope("string")),
    }
}
