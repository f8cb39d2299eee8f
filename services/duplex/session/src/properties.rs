//! Per-endpoint mutable session properties.
//!
//! The reconnect sustainer keeps its attempt counter, current delay and
//! enabled flag here, so whoever owns the session can observe them.

use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

/// Mutable configuration of one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProperties {
    /// Canonical endpoint address
    pub address: String,
    /// Delay applied to the next (re)connect
    pub reconnect_delay: Duration,
    /// Reconnect attempts since the last successful open
    pub reconnect_attempts: u32,
    /// Whether close events trigger reconnects
    pub sustainer_enabled: bool,
}

impl SessionProperties {
    /// Defaults for a freshly initialized session
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reconnect_delay: Duration::ZERO,
            reconnect_attempts: 0,
            sustainer_enabled: true,
        }
    }
}

/// Session properties keyed by endpoint address
#[derive(Debug, Default)]
pub struct SessionPropertyStore {
    properties: DashMap<String, SessionProperties>,
}

impl SessionPropertyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the properties of `address` to their defaults
    pub fn initialize_connection(&self, address: &str) {
        self.properties
            .insert(address.to_string(), SessionProperties::new(address));
        debug!("Initialized session properties for {}", address);
    }

    /// Drop the properties of `address`
    pub fn remove(&self, address: &str) -> Option<SessionProperties> {
        self.properties.remove(address).map(|(_, props)| props)
    }

    /// Snapshot of the properties of `address`
    pub fn get(&self, address: &str) -> Option<SessionProperties> {
        self.properties.get(address).map(|props| props.clone())
    }

    /// Whether `address` has properties
    pub fn contains(&self, address: &str) -> bool {
        self.properties.contains_key(address)
    }

    /// Read-modify-write the properties of `address` while holding its entry
    /// lock. Returns `None` if the address is unknown.
    pub fn update<R>(&self, address: &str, f: impl FnOnce(&mut SessionProperties) -> R) -> Option<R> {
        self.properties
            .get_mut(address)
            .map(|mut props| f(props.value_mut()))
    }

    /// Canonical address recorded for `address`
    pub fn canonical_address(&self, address: &str) -> Option<String> {
        self.properties.get(address).map(|props| props.address.clone())
    }

    /// Delay applied to the next (re)connect
    pub fn reconnect_delay(&self, address: &str) -> Option<Duration> {
        self.properties.get(address).map(|props| props.reconnect_delay)
    }

    /// Set the reconnect delay; false if the address is unknown
    pub fn set_reconnect_delay(&self, address: &str, delay: Duration) -> bool {
        self.update(address, |props| props.reconnect_delay = delay).is_some()
    }

    /// Reconnect attempts so far (0 for unknown addresses)
    pub fn reconnect_attempts(&self, address: &str) -> u32 {
        self.properties
            .get(address)
            .map(|props| props.reconnect_attempts)
            .unwrap_or(0)
    }

    /// Set the attempt counter; false if the address is unknown
    pub fn set_reconnect_attempts(&self, address: &str, attempts: u32) -> bool {
        self.update(address, |props| props.reconnect_attempts = attempts).is_some()
    }

    /// Whether the sustainer is enabled (false for unknown addresses)
    pub fn is_sustainer_enabled(&self, address: &str) -> bool {
        self.properties
            .get(address)
            .map(|props| props.sustainer_enabled)
            .unwrap_or(false)
    }

    /// Set the sustainer flag; false if the address is unknown
    pub fn set_sustainer_enabled(&self, address: &str, enabled: bool) -> bool {
        self.update(address, |props| props.sustainer_enabled = enabled).is_some()
    }
}
