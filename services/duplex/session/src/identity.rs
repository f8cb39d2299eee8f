//! Bidirectional map between session identifiers and endpoint addresses.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct IdentityTables {
    by_id: HashMap<String, String>,
    by_address: HashMap<String, String>,
}

/// One-to-one mapping of session id to endpoint address with O(1) lookups
/// in both directions
#[derive(Debug, Default)]
pub struct SessionIdentityMap {
    tables: RwLock<IdentityTables>,
}

impl SessionIdentityMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `id` to `address`, dropping any previous binding of either side
    pub fn register(&self, id: &str, address: &str) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if let Some(old_address) = tables.by_id.remove(id) {
            tables.by_address.remove(&old_address);
        }
        if let Some(old_id) = tables.by_address.remove(address) {
            tables.by_id.remove(&old_id);
        }
        tables.by_id.insert(id.to_string(), address.to_string());
        tables.by_address.insert(address.to_string(), id.to_string());
        debug!("Session {} bound to {}", id, address);
    }

    /// Address bound to a session id
    pub fn address_of(&self, id: &str) -> Option<String> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.by_id.get(id).cloned()
    }

    /// Session id bound to an address
    pub fn id_of(&self, address: &str) -> Option<String> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.by_address.get(address).cloned()
    }

    /// Whether a session id is bound
    pub fn contains_id(&self, id: &str) -> bool {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.by_id.contains_key(id)
    }

    /// Remove a binding by session id, returning its address
    pub fn remove_by_id(&self, id: &str) -> Option<String> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let address = tables.by_id.remove(id)?;
        tables.by_address.remove(&address);
        debug!("Session {} unbound from {}", id, address);
        Some(address)
    }

    /// Remove a binding by address, returning its session id
    pub fn remove_by_address(&self, address: &str) -> Option<String> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let id = tables.by_address.remove(address)?;
        tables.by_id.remove(&id);
        Some(id)
    }

    /// Number of bound sessions
    pub fn len(&self) -> usize {
        self.tables.read().unwrap_or_else(|e| e.into_inner()).by_id.len()
    }

    /// Whether no session is bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
