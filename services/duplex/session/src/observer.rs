//! Session lifecycle notifications.

use std::fmt;

/// Trait for observing session state changes.
///
/// All methods default to no-ops so observers only implement what they need.
pub trait SessionObserver: Send + Sync + fmt::Debug {
    /// The transport of `address` opened
    fn session_opened(&self, _address: &str) {}

    /// The transport of `address` closed
    fn session_closed(&self, _address: &str) {}

    /// The transport of `address` reported a failure
    fn session_error(&self, _address: &str, _reason: &str) {}

    /// The sustainer of `address` gave up after `attempts` reconnects
    fn session_unsustainable(&self, _address: &str, _attempts: u32) {}
}
