//! Registry of connections keyed by endpoint address.

use crate::connection::Connection;
use crate::error::SessionError;
use crate::transport::TransportFactory;
use dashmap::DashMap;
use duplex_wire::{Transmission, TransmissionCodec};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Routes connection operations to the connection registered for an address
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
    factory: Arc<dyn TransportFactory>,
    codec: Arc<dyn TransmissionCodec>,
}

impl ConnectionRegistry {
    /// Create a registry whose connections build transports with `factory`
    pub fn new(factory: Arc<dyn TransportFactory>, codec: Arc<dyn TransmissionCodec>) -> Self {
        Self {
            connections: DashMap::new(),
            factory,
            codec,
        }
    }

    /// Create and register a connection for `address`, replacing (and
    /// closing) any previous one
    pub fn initialize_connection(&self, address: &str) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(self.factory.clone(), self.codec.clone()));
        connection.initialize(address);
        if let Some(previous) = self.connections.insert(address.to_string(), connection.clone()) {
            debug!("Replacing connection {} for {}", previous.id(), address);
            previous.close();
        }
        connection
    }

    /// Open the connection for `address` now
    pub fn establish_connection(&self, address: &str) -> Result<(), SessionError> {
        self.lookup(address)?.open(Duration::ZERO)
    }

    /// Close the connection for `address`
    pub fn close_connection(&self, address: &str) -> Result<(), SessionError> {
        self.lookup(address)?.close();
        Ok(())
    }

    /// Send a transmission straight to the transport, bypassing any queue
    pub fn send_message(&self, address: &str, transmission: &Transmission) -> Result<(), SessionError> {
        self.lookup(address)?.send(transmission)
    }

    /// Send already-encoded text straight to the transport
    pub fn send_raw(&self, address: &str, text: &str) -> Result<(), SessionError> {
        self.lookup(address)?.send_raw(text)
    }

    /// Whether the connection for `address` is open (false if unknown)
    pub fn is_connection_open(&self, address: &str) -> bool {
        self.connection(address).is_some_and(|connection| connection.is_open())
    }

    /// Connection registered for `address`
    pub fn connection(&self, address: &str) -> Option<Arc<Connection>> {
        self.connections.get(address).map(|entry| entry.value().clone())
    }

    /// Registered endpoint addresses
    pub fn addresses(&self) -> Vec<String> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    fn lookup(&self, address: &str) -> Result<Arc<Connection>, SessionError> {
        self.connection(address).ok_or_else(|| {
            warn!("No connection registered for {}", address);
            SessionError::UnknownAddress(address.to_string())
        })
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .finish()
    }
}
