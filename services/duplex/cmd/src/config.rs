//! Configuration handling for the duplex client.
//!
//! Values come from a YAML file, then environment variables, then
//! command-line flags (applied by `main`), each layer overriding the last.

use anyhow::Result;
use duplex_session::{ReconnectPolicy, TcpOptions, DEFAULT_HEARTBEAT_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Duplex client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexConfig {
    /// Session to bring up
    pub session: SessionConfig,
    /// Reconnect policy
    pub reconnect: ReconnectConfig,
    /// Protocol tags to register receivers for
    pub protocols: Vec<String>,
}

/// Session identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session id
    pub id: String,
    /// Endpoint address, `tcp://host:port` or `host:port`
    pub address: String,
}

/// Reconnect policy numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts between successful opens
    pub max_attempts: u32,
    /// Delay before the first attempt (milliseconds)
    pub base_delay_ms: u64,
    /// Added per further attempt (milliseconds)
    pub delay_step_ms: u64,
    /// Delay cap (milliseconds)
    pub max_delay_ms: u64,
    /// Heartbeat period while open (milliseconds, 0 disables)
    pub heartbeat_interval_ms: u64,
    /// Close a connection silent for this long (milliseconds, 0 disables)
    pub idle_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: "duplex-session".to_string(),
            address: "tcp://127.0.0.1:9000".to_string(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: millis(policy.base_delay),
            delay_step_ms: millis(policy.delay_step),
            max_delay_ms: millis(policy.max_delay),
            heartbeat_interval_ms: millis(DEFAULT_HEARTBEAT_INTERVAL),
            idle_timeout_ms: 0,
        }
    }
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            reconnect: ReconnectConfig::default(),
            protocols: vec!["jsonrpc-2.0".to_string()],
        }
    }
}

impl ReconnectConfig {
    /// Policy handed to the sustainer
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            delay_step: Duration::from_millis(self.delay_step_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    /// Liveness settings for TCP transports
    pub fn tcp_options(&self) -> TcpOptions {
        let enabled = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        TcpOptions {
            heartbeat: enabled(self.heartbeat_interval_ms),
            idle_timeout: enabled(self.idle_timeout_ms),
        }
    }
}

impl DuplexConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<DuplexConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?} ({}), using defaults",
                        config_path.as_ref(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path.as_ref());
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Final duplex configuration: session={}, address={}, max_attempts={}, base_delay={}ms",
            config.session.id,
            config.session.address,
            config.reconnect.max_attempts,
            config.reconnect.base_delay_ms
        );

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("DUPLEX_SESSION_ID") {
            info!("Session id overridden by environment: {}", id);
            self.session.id = id;
        }

        if let Some(address) = lookup("DUPLEX_ADDRESS") {
            info!("Address overridden by environment: {}", address);
            self.session.address = address;
        }

        if let Some(attempts) = lookup("DUPLEX_RECONNECT_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(attempts) => {
                    self.reconnect.max_attempts = attempts;
                    info!("Reconnect attempts overridden by environment: {}", attempts);
                }
                Err(_) => warn!("Ignoring invalid DUPLEX_RECONNECT_ATTEMPTS={}", attempts),
            }
        }

        if let Some(delay) = lookup("DUPLEX_RECONNECT_DELAY_MS") {
            match delay.parse::<u64>() {
                Ok(delay) => {
                    self.reconnect.base_delay_ms = delay;
                    info!("Reconnect delay overridden by environment: {}ms", delay);
                }
                Err(_) => warn!("Ignoring invalid DUPLEX_RECONNECT_DELAY_MS={}", delay),
            }
        }

        if let Some(interval) = lookup("DUPLEX_HEARTBEAT_MS") {
            match interval.parse::<u64>() {
                Ok(interval) => {
                    self.reconnect.heartbeat_interval_ms = interval;
                    info!("Heartbeat interval overridden by environment: {}ms", interval);
                }
                Err(_) => warn!("Ignoring invalid DUPLEX_HEARTBEAT_MS={}", interval),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = DuplexConfig::default();
        assert_eq!(config.session.address, "tcp://127.0.0.1:9000");
        assert_eq!(config.protocols, vec!["jsonrpc-2.0".to_string()]);
        assert_eq!(config.reconnect.policy(), ReconnectPolicy::default());
        assert_eq!(config.reconnect.tcp_options(), TcpOptions::default());
    }

    #[test]
    fn test_tcp_options() {
        let config: DuplexConfig = serde_yaml::from_str(
            "reconnect:\n  heartbeat_interval_ms: 0\n  idle_timeout_ms: 90000\n",
        )
        .unwrap();
        let options = config.reconnect.tcp_options();
        assert_eq!(options.heartbeat, None);
        assert_eq!(options.idle_timeout, Some(Duration::from_secs(90)));
        // Untouched keys keep their defaults
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
session:
  id: sess-7
  address: tcp://10.0.0.2:7000
reconnect:
  max_attempts: 3
  base_delay_ms: 250
protocols:
  - jsonrpc-2.0
  - terminal
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = DuplexConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.session.id, "sess-7");
        assert_eq!(config.session.address, "tcp://10.0.0.2:7000");
        assert_eq!(config.protocols.len(), 2);

        let policy = config.reconnect.policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        // Unset keys keep their defaults
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_unparsable_file_falls_back_to_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"session: [unterminated").unwrap();

        let config = DuplexConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("DUPLEX_SESSION_ID", "from-env"),
            ("DUPLEX_RECONNECT_ATTEMPTS", "9"),
            ("DUPLEX_RECONNECT_DELAY_MS", "soon"),
            ("DUPLEX_HEARTBEAT_MS", "15000"),
        ]
        .into_iter()
        .collect();

        let mut config = DuplexConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.session.id, "from-env");
        assert_eq!(config.reconnect.max_attempts, 9);
        // Invalid values are ignored
        assert_eq!(config.reconnect.base_delay_ms, 500);
        assert_eq!(config.reconnect.heartbeat_interval_ms, 15000);
    }
}
