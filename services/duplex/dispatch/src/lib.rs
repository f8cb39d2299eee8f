//! Transmission validation and protocol-multiplexed dispatch for duplex.
//!
//! Inbound frames arrive as raw text. The [`TransmissionDispatcher`] decodes
//! each one into a [`Transmission`](duplex_wire::Transmission), validates it
//! and hands its message to the receiver registered for its protocol. Frames
//! that fail are logged and dropped; receivers only ever see valid traffic.
//!
//! Where one physical transport has a single logical consumer, the
//! [`LegacyDispatcher`] skips multiplexing and forwards the raw frame together
//! with the session id bound to the transport's address.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatcher;
pub mod legacy;
pub mod receiver;
pub mod validator;

// Re-export main types
pub use dispatcher::{DispatchError, TransmissionDispatcher};
pub use legacy::LegacyDispatcher;
pub use receiver::{LegacyReceiver, ReceiverRegistry, TransmissionReceiver};
pub use validator::{validate, ProtocolSet, TransmissionValidator, ValidationError, ValidationErrors};
