//! Outbound buffers for traffic produced while a connection is down.
//!
//! Two variants share one buffer implementation:
//!
//! - [`PendingMessageQueue`] holds [`Transmission`]s keyed by connection.
//! - [`LegacyPendingQueue`] holds raw text keyed by endpoint address and
//!   flushes through the [`ConnectionRegistry`].
//!
//! A resend walks the buffer from the head and stops at the first item it
//! cannot deliver, so the buffer always holds exactly the unsent suffix in
//! original order. An item only leaves the buffer once its send succeeded.
//! Items added during a resend land at the tail and are picked up by the
//! same pass if the connection stays open. Items that can never be sent
//! (encode failures, [`TransportError::InvalidFrame`]) are dropped with a
//! warning.

use crate::connection::{Connection, ConnectionId};
use crate::error::{SessionError, TransportError};
use crate::registry::ConnectionRegistry;
use duplex_wire::Transmission;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Outcome of one resend pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResendReport {
    /// Items delivered and removed
    pub sent: usize,
    /// Items still buffered
    pub remaining: usize,
}

#[derive(Debug)]
struct PendingBuffer<K, T> {
    entries: Mutex<HashMap<K, VecDeque<T>>>,
}

impl<K, T> Default for PendingBuffer<K, T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Hash + Eq + Clone, T> PendingBuffer<K, T> {
    fn add(&self, key: K, item: T) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.entry(key).or_default().push_back(item);
    }

    fn len(&self, key: &K) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map_or(0, VecDeque::len)
    }

    fn discard(&self, key: &K) -> Vec<T> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .remove(key)
            .map(|items| items.into_iter().collect())
            .unwrap_or_default()
    }

    fn pop_front(&self, key: &K) -> Option<T> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let queue = entries.get_mut(key)?;
        let item = queue.pop_front();
        if queue.is_empty() {
            entries.remove(key);
        }
        item
    }
}

impl<K: Hash + Eq + Clone, T: Clone> PendingBuffer<K, T> {
    fn front(&self, key: &K) -> Option<T> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).and_then(|queue| queue.front().cloned())
    }

    /// Deliver items from the head while `is_open` holds.
    ///
    /// The head stays buffered until its send succeeds, so a concurrent
    /// sender checking [`len`](Self::len) never overtakes it. The buffer lock
    /// is not held while `send` runs. Items the transport can never carry are
    /// dropped instead of blocking the queue.
    fn resend(
        &self,
        key: &K,
        is_open: impl Fn() -> bool,
        mut send: impl FnMut(&T) -> Result<(), SessionError>,
    ) -> ResendReport {
        let mut report = ResendReport::default();
        while self.len(key) > 0 && is_open() {
            let Some(item) = self.front(key) else {
                break;
            };
            match send(&item) {
                Ok(()) => {
                    self.pop_front(key);
                    report.sent += 1;
                }
                Err(e @ SessionError::Transport(TransportError::InvalidFrame(_)))
                | Err(e @ SessionError::Codec(_)) => {
                    warn!("Dropping pending item that cannot be sent: {}", e);
                    self.pop_front(key);
                }
                Err(e) => {
                    warn!("Resend interrupted: {}", e);
                    break;
                }
            }
        }
        report.remaining = self.len(key);
        report
    }
}

/// Transmissions buffered per connection
#[derive(Debug, Default)]
pub struct PendingMessageQueue {
    buffer: PendingBuffer<ConnectionId, Transmission>,
}

impl PendingMessageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transmission for `connection`; duplicates are kept
    pub fn add(&self, connection: &Connection, transmission: Transmission) {
        debug!("Buffering {} for {}", transmission, connection.id());
        self.buffer.add(connection.id(), transmission);
    }

    /// Flush buffered transmissions in FIFO order while `connection` is open
    pub fn resend(&self, connection: &Connection) -> ResendReport {
        let report = self.buffer.resend(
            &connection.id(),
            || connection.is_open(),
            |transmission| connection.send(transmission),
        );
        if report.sent > 0 || report.remaining > 0 {
            debug!(
                "Resent {} transmissions on {} ({} still pending)",
                report.sent,
                connection.id(),
                report.remaining
            );
        }
        report
    }

    /// Number of transmissions buffered for `connection`
    pub fn pending(&self, connection: &Connection) -> usize {
        self.buffer.len(&connection.id())
    }

    /// Drop and return everything buffered for `connection`
    pub fn discard(&self, connection: &Connection) -> Vec<Transmission> {
        self.buffer.discard(&connection.id())
    }
}

/// Raw messages buffered per endpoint address
#[derive(Debug)]
pub struct LegacyPendingQueue {
    buffer: PendingBuffer<String, String>,
    registry: Arc<ConnectionRegistry>,
}

impl LegacyPendingQueue {
    /// Create an empty queue that flushes through `registry`
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            buffer: PendingBuffer::default(),
            registry,
        }
    }

    /// Append a raw message for `address`; duplicates are kept
    pub fn add(&self, address: &str, message: impl Into<String>) {
        self.buffer.add(address.to_string(), message.into());
    }

    /// Flush buffered messages in FIFO order while `address` is open
    pub fn resend(&self, address: &str) -> ResendReport {
        let key = address.to_string();
        let report = self.buffer.resend(
            &key,
            || self.registry.is_connection_open(address),
            |message| self.registry.send_raw(address, message),
        );
        if report.sent > 0 || report.remaining > 0 {
            debug!(
                "Resent {} raw messages to {} ({} still pending)",
                report.sent, address, report.remaining
            );
        }
        report
    }

    /// Number of messages buffered for `address`
    pub fn pending(&self, address: &str) -> usize {
        self.buffer.len(&address.to_string())
    }

    /// Drop and return everything buffered for `address`
    pub fn discard(&self, address: &str) -> Vec<String> {
        self.buffer.discard(&address.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransportFactory;
    use duplex_wire::{JsonCodec, TransmissionCodec};
    use std::time::Duration;

    fn open_connection(factory: &Arc<MockTransportFactory>) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(factory.clone(), Arc::new(JsonCodec::new())));
        connection.initialize("wss://host/ep");
        connection.open(Duration::ZERO).unwrap();
        connection
    }

    fn encoded(protocol: &str, message: &str) -> String {
        JsonCodec::new()
            .encode(&Transmission::new(protocol, message))
            .unwrap()
    }

    #[test]
    fn test_resend_in_order() {
        let factory = Arc::new(MockTransportFactory::new());
        let connection = open_connection(&factory);
        let queue = PendingMessageQueue::new();

        queue.add(&connection, Transmission::new("p", "m1"));
        queue.add(&connection, Transmission::new("p", "m2"));
        queue.add(&connection, Transmission::new("p", "m3"));

        // Closed: nothing moves
        assert_eq!(queue.resend(&connection), ResendReport { sent: 0, remaining: 3 });

        factory.transport(0).unwrap().set_open(true);
        assert_eq!(queue.resend(&connection), ResendReport { sent: 3, remaining: 0 });
        assert_eq!(
            factory.transport(0).unwrap().sent(),
            vec![encoded("p", "m1"), encoded("p", "m2"), encoded("p", "m3")]
        );
        assert_eq!(queue.pending(&connection), 0);

        // Already flushed
        assert_eq!(queue.resend(&connection), ResendReport::default());
        assert_eq!(factory.transport(0).unwrap().sent().len(), 3);
    }

    #[test]
    fn test_partial_resend_keeps_suffix() {
        let factory = Arc::new(MockTransportFactory::new());
        let connection = open_connection(&factory);
        let transport = factory.transport(0).unwrap();
        let queue = PendingMessageQueue::new();

        for m in ["m1", "m2", "m3"] {
            queue.add(&connection, Transmission::new("p", m));
        }

        transport.set_open(true);
        transport.script_open_checks(2);
        assert_eq!(queue.resend(&connection), ResendReport { sent: 2, remaining: 1 });
        assert_eq!(transport.sent(), vec![encoded("p", "m1"), encoded("p", "m2")]);

        transport.script_open_checks(1);
        assert_eq!(queue.resend(&connection), ResendReport { sent: 1, remaining: 0 });
        assert_eq!(transport.sent().last(), Some(&encoded("p", "m3")));
    }

    #[test]
    fn test_failed_send_is_not_lost() {
        let factory = Arc::new(MockTransportFactory::new());
        let connection = open_connection(&factory);
        let transport = factory.transport(0).unwrap();
        let queue = PendingMessageQueue::new();

        queue.add(&connection, Transmission::new("p", "m1"));
        queue.add(&connection, Transmission::new("p", "m2"));

        // is_open answers true but the transport itself refuses the write
        transport.script_open_checks(5);
        assert_eq!(queue.resend(&connection), ResendReport { sent: 0, remaining: 2 });
        assert_eq!(
            queue.discard(&connection),
            vec![Transmission::new("p", "m1"), Transmission::new("p", "m2")]
        );
    }

    #[test]
    fn test_duplicates_are_preserved() {
        let factory = Arc::new(MockTransportFactory::new());
        let connection = open_connection(&factory);
        let queue = PendingMessageQueue::new();

        queue.add(&connection, Transmission::new("p", "same"));
        queue.add(&connection, Transmission::new("p", "same"));
        assert_eq!(queue.pending(&connection), 2);
    }

    #[test]
    fn test_legacy_queue_flushes_through_registry() {
        let factory = Arc::new(MockTransportFactory::new());
        let registry = Arc::new(ConnectionRegistry::new(factory.clone(), Arc::new(JsonCodec::new())));
        registry.initialize_connection("wss://a");
        registry.initialize_connection("wss://b");
        registry.establish_connection("wss://a").unwrap();
        let queue = LegacyPendingQueue::new(registry.clone());

        queue.add("wss://a", "one");
        queue.add("wss://a", "two");
        queue.add("wss://b", "other");

        assert_eq!(queue.resend("wss://a"), ResendReport { sent: 0, remaining: 2 });

        factory.transport(0).unwrap().set_open(true);
        assert_eq!(queue.resend("wss://a"), ResendReport { sent: 2, remaining: 0 });
        assert_eq!(factory.transport(0).unwrap().sent(), vec!["one".to_string(), "two".to_string()]);

        // Unopened endpoint keeps its messages
        assert_eq!(queue.resend("wss://b"), ResendReport { sent: 0, remaining: 1 });
        assert_eq!(queue.pending("wss://b"), 1);
    }

    #[test]
    fn test_unframeable_message_is_dropped_not_blocking() {
        let factory = Arc::new(MockTransportFactory::new());
        let registry = Arc::new(ConnectionRegistry::new(factory.clone(), Arc::new(JsonCodec::new())));
        registry.initialize_connection("wss://a");
        registry.establish_connection("wss://a").unwrap();
        let queue = LegacyPendingQueue::new(registry.clone());

        queue.add("wss://a", "one");
        queue.add("wss://a", "two\nlines");
        queue.add("wss://a", "three");

        factory.transport(0).unwrap().set_open(true);
        assert_eq!(queue.resend("wss://a"), ResendReport { sent: 2, remaining: 0 });
        assert_eq!(
            factory.transport(0).unwrap().sent(),
            vec!["one".to_string(), "three".to_string()]
        );
    }
}
