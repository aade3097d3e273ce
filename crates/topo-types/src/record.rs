//! Neighbor records flowing through the discovery pipeline.

/// Identity of the remote end of a neighbor adjacency.
///
/// A record starts out carrying the raw chassis id reported over LLDP and is
/// resolved to a management address exactly once; the variant transition is
/// one-way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteId {
    /// Raw LLDP chassis id, lowercase hex without separators.
    Chassis(String),
    /// Management address the chassis id resolved to.
    Resolved(String),
}

impl RemoteId {
    pub fn is_resolved(&self) -> bool {
        matches!(self, RemoteId::Resolved(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            RemoteId::Chassis(id) => id,
            RemoteId::Resolved(address) => address,
        }
    }
}

/// One adjacency between a polled device and a single remote chassis.
///
/// All links toward the same remote chassis share one record; the two port
/// lists run in parallel so `local_ports[i]` connects to `remote_ports[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborRecord {
    /// Management address of the device the record was observed on.
    pub local_address: String,
    pub local_ports: Vec<String>,
    pub remote: RemoteId,
    pub remote_ports: Vec<String>,
}

impl NeighborRecord {
    /// New record for a not-yet-resolved remote chassis, with no links.
    pub fn unresolved(local_address: impl Into<String>, chassis_id: impl Into<String>) -> Self {
        Self {
            local_address: local_address.into(),
            local_ports: Vec::new(),
            remote: RemoteId::Chassis(chassis_id.into()),
            remote_ports: Vec::new(),
        }
    }

    /// Appends one port pair, keeping the lists parallel.
    pub fn push_pair(&mut self, local_port: impl Into<String>, remote_port: impl Into<String>) {
        self.local_ports.push(local_port.into());
        self.remote_ports.push(remote_port.into());
    }

    /// Chassis id while unresolved, `None` afterwards.
    pub fn chassis_id(&self) -> Option<&str> {
        match &self.remote {
            RemoteId::Chassis(id) => Some(id),
            RemoteId::Resolved(_) => None,
        }
    }

    /// Remote management address once resolved, `None` before.
    pub fn remote_address(&self) -> Option<&str> {
        match &self.remote {
            RemoteId::Chassis(_) => None,
            RemoteId::Resolved(address) => Some(address),
        }
    }

    /// Replaces the chassis id with the resolved management address.
    ///
    /// Returns false without modifying the record when it is already
    /// resolved.
    pub fn resolve(&mut self, address: String) -> bool {
        match self.remote {
            RemoteId::Chassis(_) => {
                self.remote = RemoteId::Resolved(address);
                true
            }
            RemoteId::Resolved(_) => false,
        }
    }

    pub fn link_count(&self) -> usize {
        self.local_ports.len()
    }
}

/// Self-identification broadcast by a probe: the polled device's own chassis
/// id paired with its management address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChassisAnnouncement {
    pub chassis_id: String,
    pub address: String,
}
