//! Structural and registration checks for inbound transmissions.

use crate::receiver::ReceiverRegistry;
use duplex_wire::{parse_envelope, Transmission, WireError};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// One failed check
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Protocol tag absent or empty
    #[error("transmission has no protocol")]
    MissingProtocol,
    /// Message absent or empty
    #[error("transmission has no message")]
    MissingMessage,
    /// No receiver is registered for the protocol
    #[error("no receiver registered for protocol {0}")]
    UnregisteredProtocol(String),
    /// Message is not a structured envelope
    #[error("malformed payload: {0}")]
    MalformedPayload(WireError),
}

/// Every check a transmission failed, in check order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    /// Failed checks
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    /// Whether `error` is among the failures
    pub fn contains(&self, error: &ValidationError) -> bool {
        self.0.contains(error)
    }

    /// Number of failed checks
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; an empty set is never constructed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Take the failures
    pub fn into_vec(self) -> Vec<ValidationError> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transmission: ")?;
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// A set of protocols that have receivers
pub trait ProtocolSet {
    /// Whether `protocol` is registered
    fn contains_protocol(&self, protocol: &str) -> bool;
}

impl ProtocolSet for ReceiverRegistry {
    fn contains_protocol(&self, protocol: &str) -> bool {
        self.contains(protocol)
    }
}

impl ProtocolSet for HashSet<String> {
    fn contains_protocol(&self, protocol: &str) -> bool {
        self.contains(protocol)
    }
}

/// Run every check on `transmission`.
///
/// A missing protocol and a missing message are both reported. The
/// registration check needs a protocol and the envelope check needs a
/// message, so each is skipped only when its own field is missing.
pub fn validate(transmission: &Transmission, protocols: &dyn ProtocolSet) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    let has_protocol = !transmission.protocol.is_empty();
    let has_message = !transmission.message.is_empty();

    if !has_protocol {
        errors.push(ValidationError::MissingProtocol);
    }
    if !has_message {
        errors.push(ValidationError::MissingMessage);
    }
    if has_protocol && !protocols.contains_protocol(&transmission.protocol) {
        errors.push(ValidationError::UnregisteredProtocol(transmission.protocol.clone()));
    }
    if has_message {
        if let Err(e) = parse_envelope(&transmission.message) {
            errors.push(ValidationError::MalformedPayload(e));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// Validates transmissions against a receiver registry
#[derive(Debug, Clone)]
pub struct TransmissionValidator {
    receivers: Arc<ReceiverRegistry>,
}

impl TransmissionValidator {
    /// Create a validator over `receivers`
    pub fn new(receivers: Arc<ReceiverRegistry>) -> Self {
        Self { receivers }
    }

    /// Run every check on `transmission`
    pub fn validate(&self, transmission: &Transmission) -> Result<(), ValidationErrors> {
        validate(transmission, self.receivers.as_ref())
    }
}
