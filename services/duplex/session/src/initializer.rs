//! Session setup and teardown.
//!
//! [`SessionContext`] bundles the shared registries a session subsystem
//! needs. It is built once at startup and handed by reference to the
//! initializer and transmitter, so tests can use a fresh one each.

use crate::endpoint::{InboundSink, SessionEndpoint};
use crate::error::SessionError;
use crate::identity::SessionIdentityMap;
use crate::observer::SessionObserver;
use crate::pending::{LegacyPendingQueue, PendingMessageQueue};
use crate::properties::SessionPropertyStore;
use crate::registry::ConnectionRegistry;
use crate::sustainer::{ReconnectPolicy, ReconnectSustainer};
use crate::transport::TransportFactory;
use dashmap::DashMap;
use duplex_wire::TransmissionCodec;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared registries of one session subsystem
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Session id to address mapping
    pub identities: Arc<SessionIdentityMap>,
    /// Connections by address
    pub registry: Arc<ConnectionRegistry>,
    /// Per-address session properties
    pub properties: Arc<SessionPropertyStore>,
    /// Transmissions buffered per connection
    pub queue: Arc<PendingMessageQueue>,
    /// Raw messages buffered per address
    pub legacy_queue: Arc<LegacyPendingQueue>,
}

impl SessionContext {
    /// Create empty registries whose connections use `factory` and `codec`
    pub fn new(factory: Arc<dyn TransportFactory>, codec: Arc<dyn TransmissionCodec>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(factory, codec));
        Self {
            identities: Arc::new(SessionIdentityMap::new()),
            legacy_queue: Arc::new(LegacyPendingQueue::new(registry.clone())),
            registry,
            properties: Arc::new(SessionPropertyStore::new()),
            queue: Arc::new(PendingMessageQueue::new()),
        }
    }
}

struct ActiveSession {
    endpoint: Arc<SessionEndpoint>,
    pump: JoinHandle<()>,
}

/// Orchestrates session initialization and termination
pub struct SessionInitializer {
    context: SessionContext,
    sink: Arc<dyn InboundSink>,
    policy: ReconnectPolicy,
    observer: Option<Arc<dyn SessionObserver>>,
    sessions: DashMap<String, ActiveSession>,
}

impl SessionInitializer {
    /// Create an initializer delivering inbound frames to `sink`
    pub fn new(context: SessionContext, sink: Arc<dyn InboundSink>, policy: ReconnectPolicy) -> Self {
        Self {
            context,
            sink,
            policy,
            observer: None,
            sessions: DashMap::new(),
        }
    }

    /// Notify `observer` of lifecycle changes of every session
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Shared registries
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Bring a session up.
    ///
    /// Records the identity mapping, registers a connection and default
    /// properties for `address`, arms the sustainer, starts the event pump on
    /// the current tokio runtime and finally opens the connection.
    ///
    /// Nothing is registered when the address is empty or already bound to
    /// another session. If a later step fails, everything recorded so far is
    /// undone, so the same id can be initialized again.
    pub fn initialize(&self, id: &str, address: &str) -> Result<Arc<SessionEndpoint>, SessionError> {
        if self.context.identities.contains_id(id) {
            return Err(SessionError::AlreadyActive(id.to_string()));
        }
        if address.is_empty() {
            return Err(SessionError::EmptyAddress(id.to_string()));
        }
        if let Some(owner) = self.context.identities.id_of(address) {
            warn!("Session {} cannot use {}, it belongs to session {}", id, address, owner);
            return Err(SessionError::AddressInUse(address.to_string(), owner));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        self.context.identities.register(id, address);
        match self.start(address, &runtime) {
            Ok(endpoint) => {
                info!("Session {} initialized for {}", id, address);
                Ok(endpoint)
            }
            Err(e) => {
                warn!("Session {} failed to start on {}: {}", id, address, e);
                self.rollback(id, address);
                Err(e)
            }
        }
    }

    fn start(
        &self,
        address: &str,
        runtime: &tokio::runtime::Handle,
    ) -> Result<Arc<SessionEndpoint>, SessionError> {
        let connection = self.context.registry.initialize_connection(address);
        self.context.properties.initialize_connection(address);

        let mut sustainer = ReconnectSustainer::new(
            address,
            &connection,
            self.context.properties.clone(),
            self.policy.clone(),
        );
        if let Some(observer) = &self.observer {
            sustainer = sustainer.with_observer(observer.clone());
        }
        sustainer.enable();

        let events = connection
            .take_events()
            .ok_or(SessionError::EventsTaken(connection.id().0))?;

        let mut endpoint = SessionEndpoint::new(
            connection,
            sustainer,
            self.context.queue.clone(),
            self.sink.clone(),
        )
        .with_legacy_queue(self.context.legacy_queue.clone());
        if let Some(observer) = &self.observer {
            endpoint = endpoint.with_observer(observer.clone());
        }
        let endpoint = Arc::new(endpoint);

        let pump = runtime.spawn(endpoint.clone().run(events));
        if let Some(previous) = self.sessions.insert(
            address.to_string(),
            ActiveSession {
                endpoint: endpoint.clone(),
                pump,
            },
        ) {
            previous.pump.abort();
        }

        self.context.registry.establish_connection(address)?;
        Ok(endpoint)
    }

    /// Undo a partial [`initialize`](Self::initialize)
    fn rollback(&self, id: &str, address: &str) {
        self.context.identities.remove_by_id(id);
        self.context.properties.set_sustainer_enabled(address, false);
        if let Some((_, session)) = self.sessions.remove(address) {
            session.pump.abort();
            self.context.queue.discard(session.endpoint.connection());
        }
        if let Err(e) = self.context.registry.close_connection(address) {
            debug!("Rolling back session {}: {}", id, e);
        }
        self.context.legacy_queue.discard(address);
        self.context.properties.remove(address);
    }

    /// Tear a session down.
    ///
    /// The identity mapping goes first so racing inbound traffic cannot
    /// resolve to a half-torn-down session. The sustainer is disabled before
    /// the connection closes so the close event cannot schedule a reconnect.
    pub fn terminate(&self, id: &str) -> Result<(), SessionError> {
        let address = self
            .context
            .identities
            .remove_by_id(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;

        let session = self.sessions.remove(&address).map(|(_, session)| session);
        match &session {
            Some(session) => session.endpoint.sustainer().disable(),
            None => {
                self.context.properties.set_sustainer_enabled(&address, false);
            }
        }

        if let Err(e) = self.context.registry.close_connection(&address) {
            warn!("Terminating session {}: {}", id, e);
        }

        if let Some(session) = session {
            session.pump.abort();
            let dropped = self.context.queue.discard(session.endpoint.connection());
            if !dropped.is_empty() {
                debug!("Dropped {} pending transmissions of session {}", dropped.len(), id);
            }
        }
        self.context.legacy_queue.discard(&address);
        self.context.properties.remove(&address);

        info!("Session {} terminated", id);
        Ok(())
    }

    /// Stop reconnecting a session without tearing it down
    pub fn cancel_reconnection(&self, id: &str) -> Result<(), SessionError> {
        let address = self
            .context
            .identities
            .address_of(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        self.context.properties.set_sustainer_enabled(&address, false);
        info!("Reconnection cancelled for session {}", id);
        Ok(())
    }

    /// Endpoint of an active session
    pub fn endpoint(&self, id: &str) -> Option<Arc<SessionEndpoint>> {
        let address = self.context.identities.address_of(id)?;
        self.sessions
            .get(&address)
            .map(|session| session.endpoint.clone())
    }

    /// Whether a session id is active
    pub fn is_active(&self, id: &str) -> bool {
        self.endpoint(id).is_some()
    }
}

impl Drop for SessionInitializer {
    fn drop(&mut self) {
        for session in self.sessions.iter() {
            session.pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::SessionProperties;
    use crate::testing::MockTransportFactory;
    use duplex_wire::JsonCodec;
    use std::sync::Mutex;
    use std::time::Duration;

    const ID: &str = "sess1";
    const ADDR: &str = "wss://host/ep";

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<String>>);

    impl InboundSink for RecordingSink {
        fn deliver(&self, _address: &str, raw: &str) {
            self.0.lock().unwrap().push(raw.to_string());
        }
    }

    fn initializer() -> (Arc<MockTransportFactory>, Arc<RecordingSink>, SessionInitializer) {
        let factory = Arc::new(MockTransportFactory::new());
        let context = SessionContext::new(factory.clone(), Arc::new(JsonCodec::new()));
        let sink = Arc::new(RecordingSink::default());
        let initializer = SessionInitializer::new(context, sink.clone(), ReconnectPolicy::default());
        (factory, sink, initializer)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_initialize_sets_everything_up() {
        let (factory, _, initializer) = initializer();
        let endpoint = initializer.initialize(ID, ADDR).unwrap();
        let context = initializer.context();

        assert_eq!(context.identities.id_of(ADDR).as_deref(), Some(ID));
        assert!(context.registry.connection(ADDR).is_some());
        assert_eq!(factory.created_count(), 1);
        assert_eq!(factory.address(0).as_deref(), Some(ADDR));
        assert_eq!(context.properties.get(ADDR), Some(SessionProperties::new(ADDR)));
        assert!(endpoint.sustainer().is_enabled());
        assert!(initializer.is_active(ID));

        assert!(matches!(
            initializer.initialize(ID, ADDR),
            Err(SessionError::AlreadyActive(_))
        ));
    }

    #[test]
    fn test_initialize_needs_runtime() {
        let (factory, _, initializer) = initializer();
        assert!(matches!(initializer.initialize(ID, ADDR), Err(SessionError::NoRuntime)));
        assert!(initializer.context().identities.is_empty());
        assert_eq!(factory.created_count(), 0);
    }

    #[tokio::test]
    async fn test_events_flow_through_pump() {
        let (factory, sink, initializer) = initializer();
        initializer.initialize(ID, ADDR).unwrap();

        factory.transport(0).unwrap().set_open(true);
        let events = factory.events(0).unwrap();
        events.opened();
        events.message("hello");
        settle().await;
        assert_eq!(sink.0.lock().unwrap().as_slice(), &["hello".to_string()]);

        // Remote close: pump drives the sustainer into a reconnect
        factory.transport(0).unwrap().set_open(false);
        events.closed();
        settle().await;
        assert_eq!(factory.created_count(), 2);
        assert_eq!(factory.delay(1), Some(Duration::from_millis(500)));
        assert_eq!(initializer.context().properties.reconnect_attempts(ADDR), 1);

        // Late frame from the first transport is stale
        events.message("late");
        settle().await;
        assert_eq!(sink.0.lock().unwrap().len(), 1);

        factory.events(1).unwrap().opened();
        settle().await;
        assert_eq!(initializer.context().properties.reconnect_attempts(ADDR), 0);
    }

    #[tokio::test]
    async fn test_terminate_then_stale_close_does_not_reconnect() {
        let (factory, _, initializer) = initializer();
        let endpoint = initializer.initialize(ID, ADDR).unwrap();
        let events = factory.events(0).unwrap();

        initializer.terminate(ID).unwrap();
        assert_eq!(factory.transport(0).unwrap().close_calls(), 1);
        assert!(initializer.context().identities.id_of(ADDR).is_none());
        assert!(!initializer.is_active(ID));

        events.closed();
        endpoint.on_close();
        settle().await;
        assert_eq!(factory.created_count(), 1);

        assert!(matches!(
            initializer.terminate(ID),
            Err(SessionError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_terminate_drops_pending_and_allows_reinitialize() {
        let (factory, _, initializer) = initializer();
        let endpoint = initializer.initialize(ID, ADDR).unwrap();
        let context = initializer.context().clone();
        context
            .queue
            .add(endpoint.connection(), duplex_wire::Transmission::new("p", "{}"));

        initializer.terminate(ID).unwrap();
        assert_eq!(context.queue.pending(endpoint.connection()), 0);
        assert!(context.properties.get(ADDR).is_none());

        initializer.initialize(ID, ADDR).unwrap();
        assert_eq!(factory.created_count(), 2);
        assert!(context.properties.is_sustainer_enabled(ADDR));
    }

    #[tokio::test]
    async fn test_cancel_reconnection() {
        let (factory, _, initializer) = initializer();
        let endpoint = initializer.initialize(ID, ADDR).unwrap();

        initializer.cancel_reconnection(ID).unwrap();
        endpoint.on_close();
        assert_eq!(factory.created_count(), 1);
        assert!(initializer.is_active(ID));
    }

    #[tokio::test]
    async fn test_empty_address_leaves_nothing_behind() {
        let (factory, _, initializer) = initializer();
        let context = initializer.context();

        assert!(matches!(
            initializer.initialize(ID, ""),
            Err(SessionError::EmptyAddress(_))
        ));
        assert!(!initializer.is_active(ID));
        assert!(context.identities.is_empty());
        assert!(context.registry.addresses().is_empty());
        assert!(!context.properties.contains(""));
        assert_eq!(factory.created_count(), 0);

        // The id is free for a proper address
        initializer.initialize(ID, ADDR).unwrap();
        assert!(initializer.is_active(ID));
    }

    #[tokio::test]
    async fn test_address_owned_by_another_session_is_refused() {
        let (factory, _, initializer) = initializer();
        let endpoint = initializer.initialize(ID, ADDR).unwrap();

        match initializer.initialize("sess2", ADDR) {
            Err(SessionError::AddressInUse(address, owner)) => {
                assert_eq!(address, ADDR);
                assert_eq!(owner, ID);
            }
            other => panic!("expected AddressInUse, got {:?}", other.map(|_| ())),
        }

        // The first session is untouched
        assert!(initializer.is_active(ID));
        assert!(!initializer.is_active("sess2"));
        assert_eq!(initializer.context().identities.id_of(ADDR).as_deref(), Some(ID));
        assert!(endpoint.sustainer().is_enabled());
        assert_eq!(factory.created_count(), 1);
        assert_eq!(factory.transport(0).unwrap().close_calls(), 0);
    }
}
