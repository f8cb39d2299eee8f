//! Glue between one connection's transport events and the session layer.

use crate::connection::Connection;
use crate::observer::SessionObserver;
use crate::pending::{LegacyPendingQueue, PendingMessageQueue};
use crate::sustainer::{ReconnectSustainer, SustainOutcome};
use crate::transport::{ConnectionEvent, TransportEvent};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Consumer of raw inbound frames
pub trait InboundSink: Send + Sync {
    /// Handle one raw frame received from `address`
    fn deliver(&self, address: &str, raw: &str);
}

/// Binds transport lifecycle events of one connection to its sustainer,
/// pending queues and inbound sink
pub struct SessionEndpoint {
    address: String,
    connection: Arc<Connection>,
    sustainer: ReconnectSustainer,
    queue: Arc<PendingMessageQueue>,
    legacy_queue: Option<Arc<LegacyPendingQueue>>,
    sink: Arc<dyn InboundSink>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl SessionEndpoint {
    /// Create an endpoint for the connection the sustainer serves
    pub fn new(
        connection: Arc<Connection>,
        sustainer: ReconnectSustainer,
        queue: Arc<PendingMessageQueue>,
        sink: Arc<dyn InboundSink>,
    ) -> Self {
        Self {
            address: sustainer.address().to_string(),
            connection,
            sustainer,
            queue,
            legacy_queue: None,
            sink,
            observer: None,
        }
    }

    /// Also flush the per-address raw queue on open
    pub fn with_legacy_queue(mut self, queue: Arc<LegacyPendingQueue>) -> Self {
        self.legacy_queue = Some(queue);
        self
    }

    /// Notify `observer` of lifecycle changes
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Endpoint address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The connection this endpoint serves
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The reconnect sustainer of this endpoint
    pub fn sustainer(&self) -> &ReconnectSustainer {
        &self.sustainer
    }

    /// Transport opened: refresh the reconnect budget, then flush whatever
    /// was buffered while down
    pub fn on_open(&self) {
        info!("Session endpoint {} open", self.address);
        self.sustainer.reset();

        let report = self.queue.resend(&self.connection);
        if report.remaining > 0 {
            warn!(
                "{} transmissions for {} still pending after open",
                report.remaining, self.address
            );
        }
        if let Some(legacy) = &self.legacy_queue {
            legacy.resend(&self.address);
        }

        if let Some(observer) = &self.observer {
            observer.session_opened(&self.address);
        }
    }

    /// Transport closed: try a bounded reconnect
    pub fn on_close(&self) {
        info!("Session endpoint {} closed", self.address);
        if let Some(observer) = &self.observer {
            observer.session_closed(&self.address);
        }

        match self.sustainer.sustain() {
            Ok(SustainOutcome::Reconnecting { attempt, delay }) => {
                debug!("Reconnect {} to {} scheduled in {:?}", attempt, self.address, delay);
            }
            Ok(SustainOutcome::Exhausted { .. }) | Ok(SustainOutcome::Idle) => {}
            Err(e) => error!("Reconnect to {} failed: {}", self.address, e),
        }
    }

    /// Transport failure; the close event that follows drives reconnection
    pub fn on_error(&self, reason: &str) {
        warn!("Session endpoint {} transport error: {}", self.address, reason);
        if let Some(observer) = &self.observer {
            observer.session_error(&self.address, reason);
        }
    }

    /// Inbound frame
    pub fn on_message(&self, raw: &str) {
        self.sink.deliver(&self.address, raw);
    }

    /// Route one transport event. Events from superseded transports are
    /// dropped; returns whether the event was handled.
    pub fn handle(&self, event: ConnectionEvent) -> bool {
        if !self.connection.is_current(event.generation) {
            debug!(
                "Dropping stale {:?} for {} (generation {}, current {})",
                event.event,
                self.address,
                event.generation,
                self.connection.generation()
            );
            return false;
        }

        match event.event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Closed => self.on_close(),
            TransportEvent::Error(reason) => self.on_error(&reason),
            TransportEvent::Message(raw) => self.on_message(&raw),
        }
        true
    }

    /// Pump transport events until the connection's event channel closes
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        debug!("Event pump for {} started", self.address);
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!("Event pump for {} stopped", self.address);
    }
}

impl fmt::Debug for SessionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEndpoint")
            .field("address", &self.address)
            .field("connection", &self.connection)
            .finish()
    }
}
