//! Session and transport error types.

use duplex_wire::CodecError;
use thiserror::Error;

/// Errors raised by a transport handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport has no live connection
    #[error("transport is not open")]
    NotOpen,
    /// The underlying writer went away
    #[error("transport send failed: {0}")]
    Send(String),
    /// The text cannot be carried as a single frame
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Session layer errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// `open()` was called on a connection that has no address
    #[error("connection {0} has no address; initialize() must precede open()")]
    NotInitialized(u64),
    /// No connection is registered for the endpoint address
    #[error("no connection registered for {0}")]
    UnknownAddress(String),
    /// No session is registered under the id
    #[error("no session registered with id {0}")]
    UnknownSession(String),
    /// The session id is already bound
    #[error("session {0} is already active")]
    AlreadyActive(String),
    /// The endpoint address is bound to another session
    #[error("address {0} is already used by session {1}")]
    AddressInUse(String, String),
    /// A session cannot be initialized without an endpoint address
    #[error("session {0} has an empty endpoint address")]
    EmptyAddress(String),
    /// The connection event receiver was handed out earlier
    #[error("event stream of connection {0} already taken")]
    EventsTaken(u64),
    /// Session setup needs a tokio runtime to drive transport events
    #[error("no tokio runtime available")]
    NoRuntime,
    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Codec error
    #[error(transparent)]
    Codec(#[from] CodecError),
}
