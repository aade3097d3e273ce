//! Node id assignment for stored devices.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Assigns a stable numeric id to every device key.
///
/// IPv4 management addresses map to their numeric value, which keeps ids
/// deterministic across runs. Non-address keys receive synthetic ids from a
/// counter starting above the reserved range; repeated lookups of the same
/// key always return the same id within one allocator.
#[derive(Debug)]
pub struct NodeIdAllocator {
    next: i64,
    assigned: HashMap<String, i64>,
}

impl NodeIdAllocator {
    pub fn new() -> Self {
        Self {
            next: 1000,
            assigned: HashMap::new(),
        }
    }

    /// Id for `key`, allocating a synthetic one when the key is not an
    /// IPv4 address.
    pub fn id_for(&mut self, key: &str) -> i64 {
        if let Ok(ip) = key.parse::<Ipv4Addr>() {
            return i64::from(u32::from(ip));
        }
        if let Some(id) = self.assigned.get(key) {
            return *id;
        }
        self.next += 1;
        self.assigned.insert(key.to_string(), self.next);
        self.next
    }
}

impl Default for NodeIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
