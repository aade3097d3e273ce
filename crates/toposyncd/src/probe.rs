//! Per-device LLDP probe.
//!
//! One probe owns one SNMP session: it announces the device's own chassis
//! id(s), walks the LLDP remote and local port tables, aggregates the rows
//! into one neighbor record per remote chassis, and emits each record on the
//! resolved or unresolved path depending on whether the chassis id is
//! already known.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use topo_types::{
    oids, ChassisAnnouncement, DeviceDescriptor, NeighborRecord, SessionFactory, SnmpTransport,
    TransportError, WalkRow,
};
use tracing::{debug, warn};

use crate::chassis_table::ChassisIdentityTable;

/// Output endpoints shared by every probe of a scan.
pub struct ProbeChannels {
    pub announce: mpsc::Sender<ChassisAnnouncement>,
    pub resolved: mpsc::Sender<NeighborRecord>,
    pub unresolved: mpsc::Sender<NeighborRecord>,
}

impl Clone for ProbeChannels {
    fn clone(&self) -> Self {
        Self {
            announce: self.announce.clone(),
            resolved: self.resolved.clone(),
            unresolved: self.unresolved.clone(),
        }
    }
}

/// Runs the discovery sequence against a single device.
pub struct DeviceNeighborProbe<F: SessionFactory> {
    factory: Arc<F>,
    table: Arc<ChassisIdentityTable>,
    channels: ProbeChannels,
}

impl<F: SessionFactory> DeviceNeighborProbe<F> {
    pub fn new(
        factory: Arc<F>,
        table: Arc<ChassisIdentityTable>,
        channels: ProbeChannels,
    ) -> Self {
        Self {
            factory,
            table,
            channels,
        }
    }

    /// Full probe of one device. The session is closed on every exit path;
    /// a protocol error anywhere yields zero records for this device.
    pub async fn scan(&self, device: &DeviceDescriptor) -> Result<(), TransportError> {
        let mut session = self.factory.session(&device.management_address);
        session.connect().await?;
        let outcome = self.scan_connected(&mut session, device).await;
        if let Err(e) = session.close().await {
            warn!(device = %device.management_address, error = %e, "session close failed");
        }
        outcome
    }

    async fn scan_connected(
        &self,
        session: &mut F::Session,
        device: &DeviceDescriptor,
    ) -> Result<(), TransportError> {
        for chassis_id in self_chassis_ids(session, device).await? {
            let announcement = ChassisAnnouncement {
                chassis_id,
                address: device.management_address.clone(),
            };
            if self.channels.announce.send(announcement).await.is_err() {
                warn!(device = %device.management_address, "announcement queue closed mid-scan");
                return Ok(());
            }
        }

        let remote_chassis =
            remote_chassis_table(&session.bulk_walk(oids::LLDP_REM_CHASSIS_ID).await?);
        let remote_ports = remote_port_table(&session.bulk_walk(oids::LLDP_REM_PORT_ID).await?);
        let local_ports = local_port_rows(&session.bulk_walk(oids::LLDP_LOC_PORT_ID).await?);

        let records = aggregate(
            &device.management_address,
            &local_ports,
            &remote_chassis,
            &remote_ports,
        );
        debug!(
            device = %device.management_address,
            neighbors = records.len(),
            "aggregated neighbor candidates"
        );

        for record in records {
            let output = match record.chassis_id().and_then(|id| self.table.get(id)) {
                Some(address) => {
                    let mut record = record;
                    record.resolve(address);
                    self.channels.resolved.send(record).await
                }
                None => self.channels.unresolved.send(record).await,
            };
            if output.is_err() {
                warn!(device = %device.management_address, "neighbor queue closed mid-scan");
                return Ok(());
            }
        }
        Ok(())
    }
}

/// The device's own chassis identifier(s), lower-hex encoded.
///
/// Nexus models do not expose the LLDP local chassis scalar, so they are
/// walked over the interface physical-address table instead; everything
/// else answers the scalar directly.
async fn self_chassis_ids<S: SnmpTransport>(
    session: &mut S,
    device: &DeviceDescriptor,
) -> Result<Vec<String>, TransportError> {
    let mut ids = Vec::new();
    if device.model.contains("Nexus") {
        for row in session.bulk_walk(oids::IF_PHYS_ADDRESS).await? {
            if let Some(bytes) = row.value.octets() {
                if !bytes.is_empty() {
                    ids.push(hex_encode(bytes));
                }
            }
        }
    } else {
        let values = session.get(&[oids::LLDP_LOC_CHASSIS_ID]).await?;
        if let Some(bytes) = values.first().and_then(|value| value.octets()) {
            ids.push(hex_encode(bytes));
        }
    }
    Ok(ids)
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// LLDP remote-table rows are instanced by (time-mark, local-port, index),
/// so the local port number is the second-to-last OID component.
fn index_second_last(oid: &str) -> Option<&str> {
    let mut parts = oid.rsplit('.');
    parts.next();
    parts.next()
}

/// Local-port rows are instanced by the port number alone.
fn index_last(oid: &str) -> Option<&str> {
    oid.rsplit('.').next()
}

/// Remote chassis ids keyed by local port index. Only 12-hex-character
/// values (MAC-sized) are kept; anything else is a locally-assigned or
/// malformed identifier the resolver could never match.
fn remote_chassis_table(rows: &[WalkRow]) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for row in rows {
        let Some(index) = index_second_last(&row.oid) else {
            continue;
        };
        if let Some(bytes) = row.value.octets() {
            let hex = hex_encode(bytes);
            if hex.len() == 12 {
                table.insert(index.to_string(), hex);
            }
        }
    }
    table
}

/// Remote port names keyed by local port index.
fn remote_port_table(rows: &[WalkRow]) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for row in rows {
        let Some(index) = index_second_last(&row.oid) else {
            continue;
        };
        if let Some(bytes) = row.value.octets() {
            table.insert(index.to_string(), String::from_utf8_lossy(bytes).into_owned());
        }
    }
    table
}

/// Local port names in walk order, as (index, name) pairs.
fn local_port_rows(rows: &[WalkRow]) -> Vec<(String, String)> {
    let mut ports = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(index) = index_last(&row.oid) else {
            continue;
        };
        if let Some(bytes) = row.value.octets() {
            ports.push((
                index.to_string(),
                String::from_utf8_lossy(bytes).into_owned(),
            ));
        }
    }
    ports
}

/// Groups the three walked tables into one record per remote chassis.
///
/// Local-port rows drive the iteration so port pairs follow walk order;
/// indexes without a remote chassis entry are dropped, and a missing remote
/// port name becomes an empty string so the two port lists stay parallel.
fn aggregate(
    local_address: &str,
    local_ports: &[(String, String)],
    remote_chassis: &HashMap<String, String>,
    remote_ports: &HashMap<String, String>,
) -> Vec<NeighborRecord> {
    let mut records: Vec<NeighborRecord> = Vec::new();
    let mut by_chassis: HashMap<String, usize> = HashMap::new();
    for (index, local_port) in local_ports {
        let Some(chassis) = remote_chassis.get(index) else {
            continue;
        };
        let remote_port = remote_ports.get(index).map(String::as_str).unwrap_or("");
        let slot = *by_chassis.entry(chassis.clone()).or_insert_with(|| {
            records.push(NeighborRecord::unresolved(local_address, chassis.clone()));
            records.len() - 1
        });
        records[slot].push_pair(local_port.clone(), remote_port);
    }
    records
}

#[cfg(test)]
mod tests {
    use topo_types::SnmpValue;

    use super::*;

    fn octet_row(oid: &str, bytes: &[u8]) -> WalkRow {
        WalkRow {
            oid: oid.to_string(),
            value: SnmpValue::OctetString(bytes.to_vec()),
        }
    }

    #[test]
    fn test_hex_encode_is_lowercase() {
        assert_eq!(hex_encode(&[0xaa, 0xbb, 0x01]), "aabb01");
        assert_eq!(hex_encode(&[]), "");
    }

    #[test]
    fn test_index_extraction() {
        assert_eq!(index_second_last("1.0.8802.1.1.2.1.4.1.1.5.0.7.1"), Some("7"));
        assert_eq!(index_last("1.0.8802.1.1.2.1.3.7.1.3.12"), Some("12"));
    }

    #[test]
    fn test_remote_chassis_table_keeps_only_mac_sized_values() {
        let base = oids::LLDP_REM_CHASSIS_ID;
        let rows = vec![
            octet_row(&format!("{base}.0.1.1"), &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]),
            // Too short to be a MAC.
            octet_row(&format!("{base}.0.2.1"), &[0x01, 0x02]),
            WalkRow {
                oid: format!("{base}.0.3.1"),
                value: SnmpValue::Integer(5),
            },
        ];
        let table = remote_chassis_table(&rows);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("1"), Some(&"aabbccddee02".to_string()));
    }

    #[test]
    fn test_local_port_rows_preserve_walk_order() {
        let base = oids::LLDP_LOC_PORT_ID;
        let rows = vec![
            octet_row(&format!("{base}.3"), b"GE1/0/3"),
            octet_row(&format!("{base}.1"), b"GE1/0/1"),
        ];
        let ports = local_port_rows(&rows);
        assert_eq!(
            ports,
            vec![
                ("3".to_string(), "GE1/0/3".to_string()),
                ("1".to_string(), "GE1/0/1".to_string()),
            ]
        );
    }

    #[test]
    fn test_aggregate_groups_multi_link_neighbors() {
        let local_ports = vec![
            ("1".to_string(), "GE1/0/1".to_string()),
            ("2".to_string(), "GE1/0/2".to_string()),
            ("3".to_string(), "GE1/0/3".to_string()),
        ];
        let mut remote_chassis = HashMap::new();
        remote_chassis.insert("1".to_string(), "aabbccddee02".to_string());
        remote_chassis.insert("2".to_string(), "aabbccddee02".to_string());
        remote_chassis.insert("3".to_string(), "aabbccddee03".to_string());
        let mut remote_ports = HashMap::new();
        remote_ports.insert("1".to_string(), "40GE1/0/1".to_string());
        remote_ports.insert("2".to_string(), "40GE1/0/2".to_string());
        remote_ports.insert("3".to_string(), "40GE1/0/9".to_string());

        let records = aggregate("10.0.0.1", &local_ports, &remote_chassis, &remote_ports);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].chassis_id(), Some("aabbccddee02"));
        assert_eq!(records[0].local_ports, vec!["GE1/0/1", "GE1/0/2"]);
        assert_eq!(records[0].remote_ports, vec!["40GE1/0/1", "40GE1/0/2"]);
        assert_eq!(records[1].chassis_id(), Some("aabbccddee03"));
        assert_eq!(records[1].link_count(), 1);
    }

    #[test]
    fn test_aggregate_drops_rows_without_remote_chassis() {
        let local_ports = vec![("1".to_string(), "GE1/0/1".to_string())];
        let records = aggregate("10.0.0.1", &local_ports, &HashMap::new(), &HashMap::new());
        assert!(records.is_empty());
    }

    #[test]
    fn test_aggregate_defaults_missing_remote_port_name() {
        let local_ports = vec![("1".to_string(), "GE1/0/1".to_string())];
        let mut remote_chassis = HashMap::new();
        remote_chassis.insert("1".to_string(), "aabbccddee02".to_string());

        let records = aggregate("10.0.0.1", &local_ports, &remote_chassis, &HashMap::new());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].local_ports, vec!["GE1/0/1"]);
        assert_eq!(records[0].remote_ports, vec![""]);
        assert_eq!(records[0].local_ports.len(), records[0].remote_ports.len());
    }
}
