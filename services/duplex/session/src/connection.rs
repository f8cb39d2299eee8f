//! A logical connection owning at most one live transport.
//!
//! The connection records its endpoint address on `initialize`, and builds a
//! brand new transport through its factory on every `open`. Each open bumps
//! the connection generation; events from transports of older generations
//! are stale and are discarded by the session endpoint.

use crate::error::SessionError;
use crate::transport::{ConnectionEvent, Transport, TransportEvents, TransportFactory};
use duplex_wire::{Transmission, TransmissionCodec};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No address recorded
    Uninitialized,
    /// Address recorded, no transport built yet
    Initialized,
    /// Current transport reports open
    Open,
    /// Current transport exists but is not open
    Closed,
}

/// Owner of one transport bound to one endpoint address
pub struct Connection {
    id: ConnectionId,
    address: RwLock<Option<String>>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    generation: AtomicU64,
    factory: Arc<dyn TransportFactory>,
    codec: Arc<dyn TransmissionCodec>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
}

impl Connection {
    /// Create an uninitialized connection
    pub fn new(factory: Arc<dyn TransportFactory>, codec: Arc<dyn TransmissionCodec>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            id: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            address: RwLock::new(None),
            transport: Mutex::new(None),
            generation: AtomicU64::new(0),
            factory,
            codec,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Endpoint address, if initialized
    pub fn address(&self) -> Option<String> {
        self.address.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Record the endpoint address.
    ///
    /// An empty address leaves the connection unable to open. Once an address
    /// is bound it does not change; re-initializing with the same address is a
    /// no-op and a different one is ignored with a warning.
    pub fn initialize(&self, address: &str) {
        let mut current = self.address.write().unwrap_or_else(|e| e.into_inner());
        match current.as_deref() {
            Some(bound) if bound == address => {}
            Some(bound) => {
                warn!(
                    "Connection {} already bound to {}, ignoring {}",
                    self.id, bound, address
                );
            }
            None if address.is_empty() => {
                warn!("Connection {} initialized without an address", self.id);
            }
            None => {
                debug!("Connection {} bound to {}", self.id, address);
                *current = Some(address.to_string());
            }
        }
    }

    /// Build a fresh transport and start opening it after `delay`.
    ///
    /// Fails with [`SessionError::NotInitialized`] when no address was
    /// recorded. Any previous transport is closed under the old generation so
    /// its late events are recognised as stale.
    pub fn open(&self, delay: Duration) -> Result<(), SessionError> {
        let address = match self.address() {
            Some(address) => address,
            None => {
                error!("open() called on connection {} before initialize()", self.id);
                return Err(SessionError::NotInitialized(self.id.0));
            }
        };

        let mut transport = self.transport.lock().unwrap_or_else(|e| e.into_inner());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = transport.take() {
            debug!("Connection {} superseding transport before generation {}", self.id, generation);
            previous.close();
        }

        info!(
            "Opening connection {} to {} (generation {}, delay {:?})",
            self.id, address, generation, delay
        );
        let events = TransportEvents::new(generation, self.event_tx.clone());
        let fresh = self.factory.create(&address, delay, events);
        fresh.open();
        *transport = Some(fresh);
        Ok(())
    }

    /// Close the current transport, if any
    pub fn close(&self) {
        let transport = self.transport.lock().unwrap_or_else(|e| e.into_inner());
        match transport.as_ref() {
            Some(transport) => {
                debug!("Closing connection {}", self.id);
                transport.close();
            }
            None => debug!("Connection {} has no transport to close", self.id),
        }
    }

    /// Encode and send a transmission. Callers check [`is_open`](Self::is_open) first.
    pub fn send(&self, transmission: &Transmission) -> Result<(), SessionError> {
        let text = self.codec.encode(transmission)?;
        self.send_raw(&text)
    }

    /// Send already-encoded text. Callers check [`is_open`](Self::is_open) first.
    pub fn send_raw(&self, text: &str) -> Result<(), SessionError> {
        let transport = self.transport.lock().unwrap_or_else(|e| e.into_inner());
        match transport.as_ref() {
            Some(transport) => {
                transport.send(text)?;
                debug!("Connection {} sent {} bytes", self.id, text.len());
                Ok(())
            }
            None => Err(crate::error::TransportError::NotOpen.into()),
        }
    }

    /// Whether the current transport is open
    pub fn is_open(&self) -> bool {
        self.transport
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|transport| transport.is_open())
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        if self.address().is_none() {
            return ConnectionState::Uninitialized;
        }
        let transport = self.transport.lock().unwrap_or_else(|e| e.into_inner());
        match transport.as_ref() {
            None => ConnectionState::Initialized,
            Some(transport) if transport.is_open() => ConnectionState::Open,
            Some(_) => ConnectionState::Closed,
        }
    }

    /// Generation of the current transport (0 before the first open)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether an event tagged `generation` belongs to the current transport
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation()
    }

    /// Take the receiver for this connection's transport events. Only the
    /// first call returns `Some`.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.event_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address())
            .field("generation", &self.generation())
            .finish()
    }
}
