//! Concurrent chassis-id to management-address table.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Shared table mapping every announced chassis id to the management address
/// of the device that owns it.
///
/// Probes write their own identifiers through the identity updater while
/// other probes and the resolvers read concurrently; a read-write lock keeps
/// lookups cheap (readers never block readers). Entries live for the whole
/// scan, there is no eviction.
#[derive(Debug, Default)]
pub struct ChassisIdentityTable {
    entries: RwLock<HashMap<String, String>>,
}

impl ChassisIdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional upsert. Returns the previously mapped address when the
    /// chassis id was already known, so the caller can spot collisions.
    pub fn set(&self, chassis_id: &str, address: &str) -> Option<String> {
        self.entries
            .write()
            .insert(chassis_id.to_string(), address.to_string())
    }

    /// Management address owning `chassis_id`, if announced.
    pub fn get(&self, chassis_id: &str) -> Option<String> {
        self.entries.read().get(chassis_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
