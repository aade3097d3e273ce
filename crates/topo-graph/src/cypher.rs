//! Cypher statements used by the topology store.
//!
//! Node properties mirror the inventory attributes; links carry parallel
//! port-name lists so one relationship covers every cable between two
//! devices.

/// Creates a LINK_TO relationship between two stored devices, matched by
/// node id.
pub const CREATE_LINK: &str = "MATCH (s:SWITCH {id: $start}), (e:SWITCH {id: $end}) \
     CREATE (s)-[:LINK_TO {lports: $lports, rports: $rports}]->(e)";

/// Counts stored devices.
pub const COUNT_DEVICES: &str = "MATCH (n:SWITCH) RETURN count(n) AS count";

/// Direction of a link query relative to the start device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// Links created from start toward end.
    Outgoing,
    /// Links created from end toward start.
    Incoming,
    /// Links in either direction.
    Any,
}

/// MATCH statement for the LINK_TO relationships between two stored
/// devices, matched by node id.
pub fn query_links_statement(direction: LinkDirection) -> String {
    let pattern = match direction {
        LinkDirection::Outgoing => "-[r:LINK_TO]->",
        LinkDirection::Incoming => "<-[r:LINK_TO]-",
        LinkDirection::Any => "-[r:LINK_TO]-",
    };
    format!(
        "MATCH (s:SWITCH {{id: $start}}){pattern}(e:SWITCH {{id: $end}}) \
         RETURN r.lports AS lports, r.rports AS rports"
    )
}

/// MATCH statement for device nodes filtered by an arbitrary property set.
///
/// Each property name doubles as its parameter name, so the caller binds
/// values under the same keys. An empty filter matches every stored device.
pub fn query_devices_statement(properties: &[&str]) -> String {
    if properties.is_empty() {
        return "MATCH (n:SWITCH) RETURN n.id AS id".to_string();
    }
    let filter = properties
        .iter()
        .map(|property| format!("{property}: ${property}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("MATCH (n:SWITCH {{{filter}}}) RETURN n.id AS id")
}

/// CREATE statement for one device node carrying the given labels.
///
/// Labels cannot be parameterized in Cypher, so the statement is built per
/// label set; all property values stay parameters. An empty label list falls
/// back to SWITCH so every node remains reachable by the link queries.
pub fn create_device_statement(labels: &[String]) -> String {
    let labels = if labels.is_empty() {
        "SWITCH".to_string()
    } else {
        labels.join(":")
    };
    format!(
        "CREATE (n:{labels} {{id: $id, level: $level, mgt: $mgt, oobmgt: $oobmgt, \
         dc: $dc, vendor: $vendor, model: $model, role: $role, service: $service, \
         pod: $pod, name: $name}})"
    )
}
