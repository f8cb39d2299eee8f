//! Receivers of dispatched messages.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Consumer of messages for one protocol
pub trait TransmissionReceiver: Send + Sync {
    /// Handle one validated message
    fn receive(&self, message: &str);
}

impl<F> TransmissionReceiver for F
where
    F: Fn(&str) + Send + Sync,
{
    fn receive(&self, message: &str) {
        self(message)
    }
}

/// Single consumer of raw frames, addressed by session id
pub trait LegacyReceiver: Send + Sync {
    /// Handle one raw frame of session `id`
    fn receive(&self, id: &str, message: &str);
}

impl<F> LegacyReceiver for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn receive(&self, id: &str, message: &str) {
        self(id, message)
    }
}

/// Receivers keyed by protocol tag.
///
/// Consumers register before traffic flows; dispatchers only read.
#[derive(Default)]
pub struct ReceiverRegistry {
    receivers: DashMap<String, Arc<dyn TransmissionReceiver>>,
}

impl ReceiverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `receiver` for `protocol`, returning the receiver it replaced
    pub fn register(
        &self,
        protocol: impl Into<String>,
        receiver: Arc<dyn TransmissionReceiver>,
    ) -> Option<Arc<dyn TransmissionReceiver>> {
        let protocol = protocol.into();
        debug!("Registering receiver for protocol {}", protocol);
        self.receivers.insert(protocol, receiver)
    }

    /// Remove the receiver of `protocol`
    pub fn unregister(&self, protocol: &str) -> Option<Arc<dyn TransmissionReceiver>> {
        self.receivers.remove(protocol).map(|(_, receiver)| receiver)
    }

    /// Receiver registered for `protocol`
    pub fn get(&self, protocol: &str) -> Option<Arc<dyn TransmissionReceiver>> {
        self.receivers.get(protocol).map(|entry| entry.value().clone())
    }

    /// Whether `protocol` has a receiver
    pub fn contains(&self, protocol: &str) -> bool {
        self.receivers.contains_key(protocol)
    }

    /// Registered protocols, sorted
    pub fn protocols(&self) -> Vec<String> {
        let mut protocols: Vec<String> = self.receivers.iter().map(|e| e.key().clone()).collect();
        protocols.sort();
        protocols
    }

    /// Number of registered protocols
    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }
}

impl fmt::Debug for ReceiverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}
