//! Connections, reconnect sustainer, pending queues, and session lifecycle for duplex.
//!
//! This crate keeps a logical client session alive over one unreliable
//! transport. It owns the connection for each endpoint address, reopens it
//! with bounded backoff when it drops, buffers outbound traffic while it is
//! down, and forwards inbound frames to an [`InboundSink`].
//!
//! ## Features
//!
//! - **Connections**: one transport per connection, rebuilt on every open
//! - **Stale-event filtering**: transport events carry a generation tag
//! - **Reconnect sustainer**: bounded attempts, reset on successful open
//! - **Pending queues**: FIFO flush that stops at the first undeliverable item
//! - **Session lifecycle**: initialize/terminate with ordered teardown
//!
//! ## Example
//!
//! ```rust,no_run
//! use duplex_session::{
//!     InboundSink, MessageTransmitter, ReconnectPolicy, SessionContext, SessionInitializer,
//!     TcpTransportFactory,
//! };
//! use duplex_wire::{JsonCodec, Transmission};
//! use std::sync::Arc;
//!
//! struct Print;
//!
//! impl InboundSink for Print {
//!     fn deliver(&self, address: &str, raw: &str) {
//!         println!("{}: {}", address, raw);
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let context = SessionContext::new(Arc::new(TcpTransportFactory::new()), Arc::new(JsonCodec::new()));
//! let sessions = SessionInitializer::new(context.clone(), Arc::new(Print), ReconnectPolicy::default());
//! sessions.initialize("sess1", "tcp://127.0.0.1:9000")?;
//!
//! let transmitter = MessageTransmitter::new(&context);
//! transmitter.transmit("sess1", Transmission::new("jsonrpc-2.0", r#"{"method":"ping"}"#))?;
//!
//! sessions.terminate("sess1")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod initializer;
pub mod observer;
pub mod pending;
pub mod properties;
pub mod registry;
pub mod sustainer;
pub mod transmitter;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use endpoint::{InboundSink, SessionEndpoint};
pub use error::{SessionError, TransportError};
pub use identity::SessionIdentityMap;
pub use initializer::{SessionContext, SessionInitializer};
pub use observer::SessionObserver;
pub use pending::{LegacyPendingQueue, PendingMessageQueue, ResendReport};
pub use properties::{SessionProperties, SessionPropertyStore};
pub use registry::ConnectionRegistry;
pub use sustainer::{ReconnectPolicy, ReconnectSustainer, SustainOutcome};
pub use transmitter::{Delivery, MessageTransmitter};
pub use transport::{
    check_frame, ConnectionEvent, TcpOptions, TcpTransport, TcpTransportFactory, Transport,
    TransportEvent, TransportEvents, TransportFactory, DEFAULT_HEARTBEAT_INTERVAL,
};
