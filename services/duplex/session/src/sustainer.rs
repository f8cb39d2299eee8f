//! Bounded-retry reconnect policy bound to one connection.
//!
//! The sustainer reacts to close events. While enabled it reopens the
//! connection with a backoff delay, counting attempts in the endpoint's
//! [`SessionProperties`](crate::SessionProperties). Once the attempt budget is
//! spent it disables itself and reports the session as unsustainable. A
//! successful open resets the budget.

use crate::connection::Connection;
use crate::error::SessionError;
use crate::observer::SessionObserver;
use crate::properties::SessionPropertyStore;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconnect backoff and attempt budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts allowed between successful opens
    pub max_attempts: u32,
    /// Delay before the first reconnect
    pub base_delay: Duration,
    /// Added to the delay for every further attempt (zero for constant backoff)
    pub delay_step: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            delay_step: Duration::ZERO,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay for the 1-based `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let extra = self.delay_step.saturating_mul(attempt.saturating_sub(1));
        self.base_delay.saturating_add(extra).min(self.max_delay)
    }
}

/// Result of one [`ReconnectSustainer::sustain`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SustainOutcome {
    /// A reopen was issued
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
        /// Delay handed to the transport
        delay: Duration,
    },
    /// The budget was spent; the sustainer disabled itself
    Exhausted {
        /// Attempts made before giving up
        attempts: u32,
    },
    /// The sustainer is disabled (or the session is gone); nothing happened
    Idle,
}

/// Reconnect policy object for one connection
#[derive(Debug)]
pub struct ReconnectSustainer {
    address: String,
    connection: Weak<Connection>,
    properties: Arc<SessionPropertyStore>,
    policy: ReconnectPolicy,
    observer: Option<Arc<dyn SessionObserver>>,
}

enum Step {
    Reopen(u32, Duration),
    Exhausted(u32),
    Idle,
}

impl ReconnectSustainer {
    /// Create a sustainer for `connection`, keeping its state in `properties`
    pub fn new(
        address: impl Into<String>,
        connection: &Arc<Connection>,
        properties: Arc<SessionPropertyStore>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            address: address.into(),
            connection: Arc::downgrade(connection),
            properties,
            policy,
            observer: None,
        }
    }

    /// Report exhaustion to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Endpoint address this sustainer serves
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Policy in effect
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Arm future `sustain` calls with a fresh budget. Does not open anything.
    pub fn enable(&self) {
        let found = self.properties.update(&self.address, |props| {
            props.sustainer_enabled = true;
            props.reconnect_attempts = 0;
        });
        match found {
            Some(()) => debug!("Sustainer enabled for {}", self.address),
            None => warn!("Cannot enable sustainer for {}: no session properties", self.address),
        }
    }

    /// Stop reacting to close events until re-enabled
    pub fn disable(&self) {
        if self.properties.set_sustainer_enabled(&self.address, false) {
            debug!("Sustainer disabled for {}", self.address);
        }
    }

    /// Zero the attempt counter after a successful open; the enabled flag is untouched
    pub fn reset(&self) {
        self.properties.set_reconnect_attempts(&self.address, 0);
    }

    /// Whether close events currently trigger reconnects
    pub fn is_enabled(&self) -> bool {
        self.properties.is_sustainer_enabled(&self.address)
    }

    /// Attempts made since the last reset
    pub fn attempts(&self) -> u32 {
        self.properties.reconnect_attempts(&self.address)
    }

    /// React to one close event.
    ///
    /// The enabled check, budget check and counter increment happen under
    /// the endpoint's property lock, so concurrent close events cannot both
    /// spend the last attempt.
    pub fn sustain(&self) -> Result<SustainOutcome, SessionError> {
        let max_attempts = self.policy.max_attempts;
        let step = self
            .properties
            .update(&self.address, |props| {
                if !props.sustainer_enabled {
                    return Step::Idle;
                }
                if props.reconnect_attempts >= max_attempts {
                    props.sustainer_enabled = false;
                    return Step::Exhausted(props.reconnect_attempts);
                }
                props.reconnect_attempts += 1;
                let delay = self.policy.delay_for(props.reconnect_attempts);
                props.reconnect_delay = delay;
                Step::Reopen(props.reconnect_attempts, delay)
            })
            .unwrap_or(Step::Idle);

        match step {
            Step::Idle => {
                debug!("Sustainer for {} is idle, not reconnecting", self.address);
                Ok(SustainOutcome::Idle)
            }
            Step::Exhausted(attempts) => {
                warn!(
                    "Giving up on {} after {} reconnect attempts; sustainer disabled",
                    self.address, attempts
                );
                if let Some(observer) = &self.observer {
                    observer.session_unsustainable(&self.address, attempts);
                }
                Ok(SustainOutcome::Exhausted { attempts })
            }
            Step::Reopen(attempt, delay) => {
                let Some(connection) = self.connection.upgrade() else {
                    debug!("Connection for {} dropped, disabling sustainer", self.address);
                    self.disable();
                    return Ok(SustainOutcome::Idle);
                };
                info!(
                    "Reconnecting to {} (attempt {}/{}, delay {:?})",
                    self.address, attempt, max_attempts, delay
                );
                connection.open(delay)?;
                Ok(SustainOutcome::Reconnecting { attempt, delay })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransportFactory;
    use duplex_wire::JsonCodec;
    use std::sync::Mutex;

    const ADDR: &str = "wss://host/ep";

    #[derive(Debug, Default)]
    struct Exhaustions(Mutex<Vec<(String, u32)>>);

    impl SessionObserver for Exhaustions {
        fn session_unsustainable(&self, address: &str, attempts: u32) {
            self.0.lock().unwrap().push((address.to_string(), attempts));
        }
    }

    struct Fixture {
        factory: Arc<MockTransportFactory>,
        properties: Arc<SessionPropertyStore>,
        connection: Arc<Connection>,
    }

    impl Fixture {
        fn new() -> Self {
            let factory = Arc::new(MockTransportFactory::new());
            let connection = Arc::new(Connection::new(factory.clone(), Arc::new(JsonCodec::new())));
            connection.initialize(ADDR);
            let properties = Arc::new(SessionPropertyStore::new());
            properties.initialize_connection(ADDR);
            Self {
                factory,
                properties,
                connection,
            }
        }

        fn sustainer(&self, policy: ReconnectPolicy) -> ReconnectSustainer {
            ReconnectSustainer::new(ADDR, &self.connection, self.properties.clone(), policy)
        }
    }

    #[test]
    fn test_sixth_sustain_disables() {
        let fx = Fixture::new();
        let observer = Arc::new(Exhaustions::default());
        let sustainer = fx
            .sustainer(ReconnectPolicy::default())
            .with_observer(observer.clone());
        sustainer.enable();

        for attempt in 1..=5 {
            assert_eq!(
                sustainer.sustain().unwrap(),
                SustainOutcome::Reconnecting {
                    attempt,
                    delay: Duration::from_millis(500)
                }
            );
        }
        assert_eq!(sustainer.sustain().unwrap(), SustainOutcome::Exhausted { attempts: 5 });

        assert_eq!(fx.factory.created_count(), 5);
        assert!(!sustainer.is_enabled());
        assert_eq!(observer.0.lock().unwrap().as_slice(), &[(ADDR.to_string(), 5)]);

        // Disabled: further close events are ignored
        assert_eq!(sustainer.sustain().unwrap(), SustainOutcome::Idle);
        assert_eq!(fx.factory.created_count(), 5);
    }

    #[test]
    fn test_reset_restores_budget() {
        let fx = Fixture::new();
        let sustainer = fx.sustainer(ReconnectPolicy::default());
        sustainer.enable();

        for _ in 0..5 {
            sustainer.sustain().unwrap();
        }
        sustainer.reset();
        assert_eq!(sustainer.attempts(), 0);

        for _ in 0..5 {
            assert!(matches!(
                sustainer.sustain().unwrap(),
                SustainOutcome::Reconnecting { .. }
            ));
        }
        assert_eq!(fx.factory.created_count(), 10);
        assert!(sustainer.is_enabled());
    }

    #[test]
    fn test_disabled_sustainer_does_nothing() {
        let fx = Fixture::new();
        let sustainer = fx.sustainer(ReconnectPolicy::default());
        sustainer.disable();

        assert_eq!(sustainer.sustain().unwrap(), SustainOutcome::Idle);
        assert_eq!(fx.factory.created_count(), 0);

        sustainer.enable();
        assert!(matches!(
            sustainer.sustain().unwrap(),
            SustainOutcome::Reconnecting { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_reset_keeps_disabled_flag() {
        let fx = Fixture::new();
        let sustainer = fx.sustainer(ReconnectPolicy::default());
        sustainer.disable();
        sustainer.reset();
        assert!(!sustainer.is_enabled());
    }

    #[test]
    fn test_missing_properties_is_idle() {
        let fx = Fixture::new();
        let sustainer = fx.sustainer(ReconnectPolicy::default());
        fx.properties.remove(ADDR);

        assert_eq!(sustainer.sustain().unwrap(), SustainOutcome::Idle);
        assert_eq!(fx.factory.created_count(), 0);
    }

    #[test]
    fn test_linear_backoff_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            delay_step: Duration::from_millis(500),
            max_delay: Duration::from_millis(1200),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1200));

        let fx = Fixture::new();
        let sustainer = fx.sustainer(policy);
        for _ in 0..4 {
            sustainer.sustain().unwrap();
        }
        assert_eq!(
            fx.factory.delays(),
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(1200),
                Duration::from_millis(1200),
            ]
        );
        assert_eq!(fx.properties.reconnect_delay(ADDR), Some(Duration::from_millis(1200)));
    }

    #[test]
    fn test_uninitialized_connection_propagates() {
        let factory = Arc::new(MockTransportFactory::new());
        let connection = Arc::new(Connection::new(factory.clone(), Arc::new(JsonCodec::new())));
        let properties = Arc::new(SessionPropertyStore::new());
        properties.initialize_connection(ADDR);
        let sustainer =
            ReconnectSustainer::new(ADDR, &connection, properties, ReconnectPolicy::default());

        assert!(matches!(sustainer.sustain(), Err(SessionError::NotInitialized(_))));
        assert_eq!(factory.created_count(), 0);
    }
}
