//! Duplex session client binary.
//!
//! Brings up one resilient session over TCP, logs every inbound message per
//! protocol, and transmits `<protocol> <message>` lines read from stdin.

use clap::Parser;
use duplex_dispatch::{ReceiverRegistry, TransmissionDispatcher, TransmissionReceiver};
use duplex_session::{
    Delivery, MessageTransmitter, SessionContext, SessionInitializer, SessionObserver,
    TcpTransportFactory,
};
use duplex_wire::{JsonCodec, Transmission};
use std::{path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::DuplexConfig;
use logging::DuplexLogFormatter;

/// Resilient duplex session client
#[derive(Parser, Debug)]
#[command(name = "duplex", version, about = "Resilient duplex session client")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "duplex.yaml")]
    config: PathBuf,

    /// Session id (overrides config)
    #[arg(long)]
    session: Option<String>,

    /// Endpoint address, e.g. tcp://127.0.0.1:9000 (overrides config)
    #[arg(long)]
    address: Option<String>,

    /// Delay before the first reconnect attempt, e.g. 500ms
    #[arg(long)]
    reconnect_delay: Option<humantime::Duration>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    reconnect_attempts: Option<u32>,

    /// Heartbeat period while connected, e.g. 50s (0s disables)
    #[arg(long)]
    heartbeat: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Flags take precedence over file and environment
    fn apply_to(&self, config: &mut DuplexConfig) {
        if let Some(id) = &self.session {
            config.session.id = id.clone();
        }
        if let Some(address) = &self.address {
            config.session.address = address.clone();
        }
        if let Some(delay) = self.reconnect_delay {
            config.reconnect.base_delay_ms = config::millis(delay.into());
        }
        if let Some(attempts) = self.reconnect_attempts {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(interval) = self.heartbeat {
            config.reconnect.heartbeat_interval_ms = config::millis(interval.into());
        }
    }
}

/// Logs every message of one protocol
struct LogReceiver {
    protocol: String,
}

impl TransmissionReceiver for LogReceiver {
    fn receive(&self, message: &str) {
        component_info!("receiver", "[{}] {}", self.protocol, message);
    }
}

/// Reports session lifecycle and forwards exhaustion to the main loop
#[derive(Debug)]
struct ConsoleObserver {
    unsustainable: mpsc::UnboundedSender<String>,
}

impl SessionObserver for ConsoleObserver {
    fn session_opened(&self, address: &str) {
        component_info!("session", "Connected to {}", address);
    }

    fn session_closed(&self, address: &str) {
        component_warn!("session", "Disconnected from {}", address);
    }

    fn session_error(&self, address: &str, reason: &str) {
        component_warn!("session", "Transport error on {}: {}", address, reason);
    }

    fn session_unsustainable(&self, address: &str, attempts: u32) {
        component_error!(
            "session",
            "Giving up on {} after {} reconnect attempts",
            address,
            attempts
        );
        let _ = self.unsustainable.send(address.to_string());
    }
}

/// Split a `<protocol> <message>` input line
fn parse_line(line: &str) -> Option<Transmission> {
    let (protocol, message) = line.trim().split_once(char::is_whitespace)?;
    let message = message.trim_start();
    if protocol.is_empty() || message.is_empty() {
        return None;
    }
    Some(Transmission::new(protocol, message))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("duplex={}", args.log_level).parse()?)
        .add_directive(format!("duplex_wire={}", args.log_level).parse()?)
        .add_directive(format!("duplex_session={}", args.log_level).parse()?)
        .add_directive(format!("duplex_dispatch={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .event_format(DuplexLogFormatter::new("duplex"))
        .init();

    info!("Starting duplex client v{}", env!("CARGO_PKG_VERSION"));

    let mut config = DuplexConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);
    let session_id = config.session.id.clone();
    let address = config.session.address.clone();

    let receivers = Arc::new(ReceiverRegistry::new());
    for protocol in &config.protocols {
        receivers.register(
            protocol.clone(),
            Arc::new(LogReceiver {
                protocol: protocol.clone(),
            }),
        );
    }
    info!("Registered receivers for {:?}", receivers.protocols());

    let codec = Arc::new(JsonCodec::new());
    let factory = TcpTransportFactory::with_options(config.reconnect.tcp_options());
    let context = SessionContext::new(Arc::new(factory), codec.clone());
    let dispatcher = Arc::new(TransmissionDispatcher::new(codec, receivers));

    let (unsustainable_tx, mut unsustainable_rx) = mpsc::unbounded_channel();
    let sessions = SessionInitializer::new(context.clone(), dispatcher, config.reconnect.policy())
        .with_observer(Arc::new(ConsoleObserver {
            unsustainable: unsustainable_tx,
        }));

    sessions.initialize(&session_id, &address)?;
    let transmitter = MessageTransmitter::new(&context);

    info!("Session {} started. Enter `<protocol> <message>` lines to send.", session_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }

            Some(address) = unsustainable_rx.recv() => {
                warn!("Session to {} is unsustainable, shutting down", address);
                break;
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let Some(transmission) = parse_line(&line) else {
                            warn!("Expected `<protocol> <message>`, got {:?}", line);
                            continue;
                        };
                        match transmitter.transmit(&session_id, transmission) {
                            Ok(Delivery::Sent) => debug!("Sent"),
                            Ok(Delivery::Queued) => info!("Not connected, message queued"),
                            Err(e) => warn!("Failed to transmit: {}", e),
                        }
                    }
                    Ok(None) => {
                        info!("Input closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
        }
    }

    sessions.terminate(&session_id)?;
    info!("Duplex client stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("jsonrpc-2.0   {\"method\": \"ping\"}"),
            Some(Transmission::new("jsonrpc-2.0", "{\"method\": \"ping\"}"))
        );
        assert_eq!(parse_line("terminal [1]\n"), Some(Transmission::new("terminal", "[1]")));
        assert_eq!(parse_line("lonely"), None);
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "duplex",
            "--address",
            "tcp://10.1.1.1:9",
            "--reconnect-delay",
            "2s",
            "--reconnect-attempts",
            "7",
            "--heartbeat",
            "0s",
        ]);
        let mut config = DuplexConfig::default();
        args.apply_to(&mut config);

        assert_eq!(config.session.address, "tcp://10.1.1.1:9");
        assert_eq!(config.session.id, "duplex-session");
        assert_eq!(config.reconnect.base_delay_ms, 2000);
        assert_eq!(config.reconnect.max_attempts, 7);
        assert_eq!(config.reconnect.tcp_options().heartbeat, None);
    }
}
