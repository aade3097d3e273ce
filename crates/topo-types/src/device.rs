//! Device descriptors and the role tables used to place a device in the
//! topology hierarchy.

/// Identity and inventory attributes of one managed device.
///
/// Built once per inventory entry and never mutated afterwards; probes only
/// read it. The management address is the stable key identifying the device
/// throughout the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// Store-level node id (IPv4 numeric or synthetic, see [`crate::NodeIdAllocator`]).
    pub node_id: i64,
    /// Vertical placement in the topology drawing (tier plus service offset).
    pub level: f64,
    /// Address used for SNMP polling; unique per device.
    pub management_address: String,
    /// Out-of-band address, kept as metadata even when unused for polling.
    pub outofband_address: String,
    pub datacenter: String,
    pub vendor: String,
    pub model: String,
    pub role: String,
    pub service: String,
    pub pod: String,
    pub name: String,
    /// Graph labels applied to the stored node.
    pub labels: Vec<String>,
}

/// Topology level for a device role, adjusted by service class.
///
/// Higher levels sit closer to the servers: T0 access at 3, the routing
/// tiers below 0. BMC devices render one level above their tier, BSW
/// slightly below it.
pub fn topology_level(role: &str, service: &str) -> f64 {
    let base = match role {
        "T0" => 3.0,
        "T1" => 2.0,
        "T2" => 1.0,
        "WE" | "LE" => 0.0,
        "DE" => -1.0,
        "WR" | "LR" => -2.0,
        "PR" => -3.0,
        "GR" => -4.0,
        _ => 0.0,
    };
    match service {
        "BMC" => base + 1.0,
        "BSW" => base - 0.3,
        _ => base,
    }
}

/// Graph labels for a device role. Every device is a SWITCH; backbone and
/// DCI tiers carry extra labels. Unknown roles fall back to plain SWITCH.
pub fn topology_labels(role: &str) -> Vec<String> {
    let labels: &[&str] = match role {
        "WR" | "LR" | "GR" => &["SWITCH", "BACKBONE", "DCI"],
        "PR" => &["SWITCH", "BACKBONE"],
        "LE" => &["SWITCH", "DCI"],
        _ => &["SWITCH"],
    };
    labels.iter().map(|label| label.to_string()).collect()
}
