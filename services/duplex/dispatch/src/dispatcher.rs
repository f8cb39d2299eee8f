//! Protocol-multiplexed dispatch of inbound frames.

use crate::receiver::ReceiverRegistry;
use crate::validator::{TransmissionValidator, ValidationErrors};
use duplex_session::InboundSink;
use duplex_wire::{CodecError, TransmissionCodec};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Raw frame did not decode into a transmission
    #[error("decode failed: {0}")]
    Decode(#[from] CodecError),
    /// Decoded transmission failed validation
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
}

/// Decodes, validates and routes inbound frames to protocol receivers
#[derive(Debug, Clone)]
pub struct TransmissionDispatcher {
    codec: Arc<dyn TransmissionCodec>,
    receivers: Arc<ReceiverRegistry>,
    validator: TransmissionValidator,
}

impl TransmissionDispatcher {
    /// Create a dispatcher reading receivers from `receivers`
    pub fn new(codec: Arc<dyn TransmissionCodec>, receivers: Arc<ReceiverRegistry>) -> Self {
        Self {
            codec,
            validator: TransmissionValidator::new(receivers.clone()),
            receivers,
        }
    }

    /// Receivers this dispatcher routes to
    pub fn receivers(&self) -> &Arc<ReceiverRegistry> {
        &self.receivers
    }

    /// Decode, validate and route one raw frame.
    ///
    /// Returns whether a receiver was invoked. A receiver that disappears
    /// between validation and lookup is not an error.
    pub fn dispatch(&self, raw: &str) -> Result<bool, DispatchError> {
        let transmission = self.codec.decode(raw)?;
        self.validator.validate(&transmission)?;

        match self.receivers.get(&transmission.protocol) {
            Some(receiver) => {
                debug!("Dispatching {}", transmission);
                receiver.receive(&transmission.message);
                Ok(true)
            }
            None => {
                debug!("Receiver for {} vanished before dispatch", transmission.protocol);
                Ok(false)
            }
        }
    }
}

impl InboundSink for TransmissionDispatcher {
    fn deliver(&self, address: &str, raw: &str) {
        if let Err(e) = self.dispatch(raw) {
            warn!("Dropping transmission from {}: {}", address, e);
        }
    }
}
