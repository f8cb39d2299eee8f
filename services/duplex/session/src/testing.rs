//! Scripted in-memory transports for unit tests.

#![allow(dead_code)]

use crate::error::TransportError;
use crate::transport::{check_frame, Transport, TransportEvents, TransportFactory};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared state of one mock transport
#[derive(Debug, Default)]
pub struct MockTransportState {
    open: AtomicBool,
    open_checks: Mutex<Option<usize>>,
    sent: Mutex<Vec<String>>,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MockTransportState {
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Make `is_open` answer true for the next `n` checks, then false
    pub fn script_open_checks(&self, n: usize) {
        *self.open_checks.lock().unwrap() = Some(n);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

struct MockTransport {
    state: Arc<MockTransportState>,
    events: TransportEvents,
}

impl Transport for MockTransport {
    fn open(&self) {
        self.state.open_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.set_open(false);
        self.events.closed();
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        check_frame(text)?;
        if !self.state.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        self.state.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn is_open(&self) -> bool {
        let mut checks = self.state.open_checks.lock().unwrap();
        match checks.as_mut() {
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
            None => self.state.open.load(Ordering::SeqCst),
        }
    }
}

struct Created {
    address: String,
    delay: Duration,
    state: Arc<MockTransportState>,
    events: TransportEvents,
}

/// Factory recording every transport it builds
#[derive(Default)]
pub struct MockTransportFactory {
    created: Mutex<Vec<Created>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn address(&self, index: usize) -> Option<String> {
        self.created.lock().unwrap().get(index).map(|c| c.address.clone())
    }

    pub fn delay(&self, index: usize) -> Option<Duration> {
        self.created.lock().unwrap().get(index).map(|c| c.delay)
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.created.lock().unwrap().iter().map(|c| c.delay).collect()
    }

    pub fn transport(&self, index: usize) -> Option<Arc<MockTransportState>> {
        self.created.lock().unwrap().get(index).map(|c| c.state.clone())
    }

    pub fn last(&self) -> Option<Arc<MockTransportState>> {
        self.created.lock().unwrap().last().map(|c| c.state.clone())
    }

    pub fn events(&self, index: usize) -> Option<TransportEvents> {
        self.created.lock().unwrap().get(index).map(|c| c.events.clone())
    }

    pub fn last_events(&self) -> Option<TransportEvents> {
        self.created.lock().unwrap().last().map(|c| c.events.clone())
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(
        &self,
        address: &str,
        delay: Duration,
        events: TransportEvents,
    ) -> Box<dyn Transport> {
        let state = Arc::new(MockTransportState::default());
        self.created.lock().unwrap().push(Created {
            address: address.to_string(),
            delay,
            state: state.clone(),
            events: events.clone(),
        });
        Box::new(MockTransport { state, events })
    }
}
