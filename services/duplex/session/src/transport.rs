//! Transport boundary and the TCP transport for duplex connections.
//!
//! A transport owns one physical link. It never calls back into the session
//! layer directly: lifecycle and inbound traffic are reported through a
//! [`TransportEvents`] handle, which tags every event with the generation of
//! the connection that created the transport. Consumers compare that tag
//! against [`Connection::generation`](crate::Connection::generation) to drop
//! late events from superseded transports.

use crate::error::TransportError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Lifecycle and traffic events reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link is up
    Opened,
    /// The link is down (after an error, a remote close, or `close()`)
    Closed,
    /// The link failed; a `Closed` event follows
    Error(String),
    /// One inbound text frame
    Message(String),
}

/// A transport event tagged with the generation that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Connection generation at transport creation time
    pub generation: u64,
    /// The event itself
    pub event: TransportEvent,
}

/// Handle a transport uses to report events to its owning connection
#[derive(Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl TransportEvents {
    /// Create a handle for one transport generation
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation this handle reports for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report that the link is up
    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    /// Report that the link is down
    pub fn closed(&self) {
        self.emit(TransportEvent::Closed);
    }

    /// Report a link failure
    pub fn error(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Error(reason.into()));
    }

    /// Report an inbound frame
    pub fn message(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()));
    }

    fn emit(&self, event: TransportEvent) {
        let event = ConnectionEvent {
            generation: self.generation,
            event,
        };
        if let Err(e) = self.tx.send(event) {
            debug!(
                "Dropping transport event for generation {}: receiver gone ({:?})",
                self.generation, e.0.event
            );
        }
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("generation", &self.generation)
            .finish()
    }
}

/// One physical link. All operations are fire-and-forget; outcomes arrive
/// later as [`TransportEvent`]s.
pub trait Transport: Send + Sync {
    /// Start connecting
    fn open(&self);

    /// Tear the link down
    fn close(&self);

    /// Queue one text frame for sending
    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Whether the link is currently up
    fn is_open(&self) -> bool;
}

/// Constructs transports. Creating a transport is observable (it prepares a
/// connection attempt), so connections always go through a factory.
pub trait TransportFactory: Send + Sync {
    /// Create a transport for `address` that waits `delay` before connecting
    fn create(&self, address: &str, delay: Duration, events: TransportEvents)
        -> Box<dyn Transport>;
}

/// Reject text that would not arrive as exactly one newline-delimited frame
pub fn check_frame(text: &str) -> Result<(), TransportError> {
    if text.contains(['\n', '\r']) {
        return Err(TransportError::InvalidFrame(format!(
            "{} byte message contains a line break",
            text.len()
        )));
    }
    Ok(())
}

/// Heartbeat period used when none is configured explicitly
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(50);

/// Stand-in period for disabled timers; the branch is never polled
const DISABLED_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Link supervision settings for [`TcpTransport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpOptions {
    /// Send an empty heartbeat frame this often while open
    pub heartbeat: Option<Duration>,
    /// Treat the link as dead when nothing arrives for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            heartbeat: Some(DEFAULT_HEARTBEAT_INTERVAL),
            idle_timeout: None,
        }
    }
}

impl TcpOptions {
    /// Zero durations disable the corresponding timer
    fn normalized(self) -> Self {
        Self {
            heartbeat: self.heartbeat.filter(|d| !d.is_zero()),
            idle_timeout: self.idle_timeout.filter(|d| !d.is_zero()),
        }
    }
}

/// Factory for [`TcpTransport`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransportFactory {
    options: TcpOptions,
}

impl TcpTransportFactory {
    /// Create a factory with the default heartbeat
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory whose transports use `options`
    pub fn with_options(options: TcpOptions) -> Self {
        Self { options }
    }
}

impl TransportFactory for TcpTransportFactory {
    fn create(
        &self,
        address: &str,
        delay: Duration,
        events: TransportEvents,
    ) -> Box<dyn Transport> {
        Box::new(TcpTransport::new(address, delay, events).with_options(self.options))
    }
}

#[derive(Debug, Default)]
struct TcpShared {
    open: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl TcpShared {
    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<String>>) {
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = tx;
    }

    fn mark_down(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.set_outbound(None);
    }
}

/// Newline-delimited text frames over TCP.
///
/// Accepts `tcp://host:port` or plain `host:port` addresses. Empty lines are
/// heartbeats: they count as peer activity but are never reported as
/// messages.
pub struct TcpTransport {
    address: String,
    delay: Duration,
    options: TcpOptions,
    events: TransportEvents,
    shared: Arc<TcpShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Create a transport; nothing happens until [`Transport::open`]
    pub fn new(address: &str, delay: Duration, events: TransportEvents) -> Self {
        Self {
            address: address.to_string(),
            delay,
            options: TcpOptions::default(),
            events,
            shared: Arc::new(TcpShared::default()),
            task: Mutex::new(None),
        }
    }

    /// Override heartbeat and idle timeout settings
    pub fn with_options(mut self, options: TcpOptions) -> Self {
        self.options = options.normalized();
        self
    }

    fn target(&self) -> &str {
        self.address
            .strip_prefix("tcp://")
            .unwrap_or(&self.address)
            .trim_end_matches('/')
    }
}

impl Transport for TcpTransport {
    fn open(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Transport to {} already connecting or open", self.address);
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot open transport to {}: {}", self.address, e);
                self.events.error(e.to_string());
                self.events.closed();
                return;
            }
        };

        *task = Some(runtime.spawn(drive_tcp(
            self.target().to_string(),
            self.delay,
            self.options,
            self.events.clone(),
            self.shared.clone(),
        )));
    }

    fn close(&self) {
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let was_live = !handle.is_finished();
            handle.abort();
            self.shared.mark_down();
            if was_live {
                debug!("Closed transport to {}", self.address);
                self.events.closed();
            }
        }
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        check_frame(text)?;
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let outbound = self.shared.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(tx) => tx
                .send(text.to_string())
                .map_err(|e| TransportError::Send(e.to_string())),
            None => Err(TransportError::NotOpen),
        }
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

/// Connect after `delay`, then pump frames until either side fails
async fn drive_tcp(
    target: String,
    delay: Duration,
    options: TcpOptions,
    events: TransportEvents,
    shared: Arc<TcpShared>,
) {
    if !delay.is_zero() {
        debug!("Delaying connect to {} by {:?}", target, delay);
        tokio::time::sleep(delay).await;
    }

    let stream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", target, e);
            events.error(e.to_string());
            events.closed();
            return;
        }
    };

    let (reader, writer) = stream.into_split();
    pump_frames(reader, writer, &target, options, &events, &shared).await;
}

/// Mark the link open and move frames both ways, sending heartbeats and
/// watching for peer silence, until the link fails
async fn pump_frames<R, W>(
    reader: R,
    mut writer: W,
    target: &str,
    options: TcpOptions,
    events: &TransportEvents,
    shared: &TcpShared,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    shared.set_outbound(Some(outbound_tx));
    shared.open.store(true, Ordering::SeqCst);
    info!("Transport connected to {}", target);
    events.opened();

    let heartbeat_period = options.heartbeat.unwrap_or(DISABLED_PERIOD);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_period, heartbeat_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let idle_period = options.idle_timeout.unwrap_or(DISABLED_PERIOD);
    let idle = tokio::time::sleep(idle_period);
    tokio::pin!(idle);

    let mut lines = BufReader::new(reader).lines();
    let failure = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    idle.as_mut().reset(Instant::now() + idle_period);
                    if line.is_empty() {
                        trace!("Heartbeat from {}", target);
                    } else {
                        events.message(line);
                    }
                }
                Ok(None) => break None,
                Err(e) => break Some(e.to_string()),
            },
            Some(text) = outbound_rx.recv() => {
                let mut frame = text.into_bytes();
                frame.push(b'\n');
                if let Err(e) = writer.write_all(&frame).await {
                    break Some(e.to_string());
                }
            }
            _ = heartbeat.tick(), if options.heartbeat.is_some() => {
                trace!("Heartbeat to {}", target);
                if let Err(e) = writer.write_all(b"\n").await {
                    break Some(format!("heartbeat failed: {}", e));
                }
            }
            _ = &mut idle, if options.idle_timeout.is_some() => {
                break Some(format!("no traffic from peer for {:?}", idle_period));
            }
        }
    };

    shared.mark_down();
    match failure {
        Some(reason) => {
            warn!("Transport to {} failed: {}", target, reason);
            events.error(reason);
        }
        None => info!("Transport to {} closed by peer", target),
    }
    events.closed();
}
