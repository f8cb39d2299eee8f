//! The protocol-tagged unit of duplex traffic.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A protocol-tagged message travelling over a duplex connection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transmission {
    /// Protocol tag used to pick the receiver
    #[serde(default, deserialize_with = "nullable_string")]
    pub protocol: String,
    /// Serialized structured payload
    #[serde(default, deserialize_with = "nullable_string")]
    pub message: String,
}

impl Transmission {
    /// Create a new transmission
    pub fn new(protocol: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Transmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{} bytes]", self.protocol, self.message.len())
    }
}

// Peers send `null` for absent fields; validation reports those as missing.
fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
