//! Queue-aware outbound sending.

use crate::error::{SessionError, TransportError};
use crate::initializer::SessionContext;
use duplex_wire::Transmission;
use tracing::debug;

/// What happened to an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the open transport
    Sent,
    /// Buffered until the connection opens again
    Queued,
}

/// Sends when the connection is open with nothing buffered, and buffers otherwise
#[derive(Debug, Clone)]
pub struct MessageTransmitter {
    context: SessionContext,
}

impl MessageTransmitter {
    /// Create a transmitter over the shared registries
    pub fn new(context: &SessionContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Send a transmission to the session `id`
    pub fn transmit(&self, id: &str, transmission: Transmission) -> Result<Delivery, SessionError> {
        let address = self
            .context
            .identities
            .address_of(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        let connection = self
            .context
            .registry
            .connection(&address)
            .ok_or(SessionError::UnknownAddress(address))?;

        // Queue behind anything still buffered so delivery stays FIFO
        if connection.is_open() && self.context.queue.pending(&connection) == 0 {
            match connection.send(&transmission) {
                Ok(()) => return Ok(Delivery::Sent),
                // Closed between the check and the write
                Err(SessionError::Transport(TransportError::NotOpen)) => {}
                Err(e) => return Err(e),
            }
        }
        debug!("Session {} not ready, queueing {}", id, transmission);
        self.context.queue.add(&connection, transmission);
        Ok(Delivery::Queued)
    }

    /// Send raw text to `address`
    pub fn transmit_raw(&self, address: &str, message: impl Into<String>) -> Result<Delivery, SessionError> {
        let message = message.into();
        if self.context.registry.connection(address).is_none() {
            return Err(SessionError::UnknownAddress(address.to_string()));
        }

        if self.context.registry.is_connection_open(address)
            && self.context.legacy_queue.pending(address) == 0
        {
            match self.context.registry.send_raw(address, &message) {
                Ok(()) => return Ok(Delivery::Sent),
                Err(SessionError::Transport(TransportError::NotOpen)) => {}
                Err(e) => return Err(e),
            }
        }
        debug!("{} not ready, queueing raw message", address);
        self.context.legacy_queue.add(address, message);
        Ok(Delivery::Queued)
    }
}
