//! Single-consumer dispatch keyed by session id.

use crate::receiver::LegacyReceiver;
use duplex_session::{InboundSink, SessionIdentityMap};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Forwards raw frames to one receiver, tagged with the sender's session id
pub struct LegacyDispatcher {
    identities: Arc<SessionIdentityMap>,
    receiver: RwLock<Option<Arc<dyn LegacyReceiver>>>,
}

impl LegacyDispatcher {
    /// Create a dispatcher resolving addresses through `identities`
    pub fn new(identities: Arc<SessionIdentityMap>) -> Self {
        Self {
            identities,
            receiver: RwLock::new(None),
        }
    }

    /// Install the receiver, replacing any previous one
    pub fn register(&self, receiver: Arc<dyn LegacyReceiver>) {
        *self.receiver.write().unwrap_or_else(|e| e.into_inner()) = Some(receiver);
    }

    /// Forward `raw` from `address`; returns whether the receiver was invoked.
    ///
    /// Frames from an address with no live session (for instance one being
    /// torn down) are dropped.
    pub fn dispatch(&self, address: &str, raw: &str) -> bool {
        let Some(id) = self.identities.id_of(address) else {
            debug!("No session bound to {}, dropping frame", address);
            return false;
        };
        let receiver = self
            .receiver
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match receiver {
            Some(receiver) => {
                receiver.receive(&id, raw);
                true
            }
            None => {
                warn!("No receiver registered, dropping frame for session {}", id);
                false
            }
        }
    }
}

impl InboundSink for LegacyDispatcher {
    fn deliver(&self, address: &str, raw: &str) {
        self.dispatch(address, raw);
    }
}

impl fmt::Debug for LegacyDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered = self
            .receiver
            .read()
            .map(|r| r.is_some())
            .unwrap_or(false);
        f.debug_struct("LegacyDispatcher")
            .field("sessions", &self.identities.len())
            .field("registered", &registered)
            .finish()
    }
}
