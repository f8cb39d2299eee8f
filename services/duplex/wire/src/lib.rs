//! Transmission type, text codec, and structured envelope checks for duplex.
//!
//! Every message that crosses a duplex transport is a [`Transmission`]: a
//! protocol tag naming the consumer and an opaque message string. On the wire
//! a transmission is a single line of JSON text:
//!
//! ```text
//! {"protocol":"jsonrpc-2.0","message":"{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}"}
//! ```
//!
//! The `message` is itself a structured payload. This crate only checks that
//! it is a well-formed envelope (a JSON object or a batch array); the content
//! belongs to whichever receiver owns the protocol.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod transmission;

// Re-export main types
pub use codec::{parse_envelope, CodecError, JsonCodec, TransmissionCodec, MAX_TRANSMISSION_SIZE};
pub use error::WireError;
pub use transmission::Transmission;
