//! In-memory SNMP lab.
//!
//! Serves fixture LLDP tables through the transport trait so `--mock` runs
//! and tests exercise the whole pipeline without network access. The
//! canonical lab is a three-switch fabric with one dual-link pair.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use topo_types::{
    oids, topology_labels, topology_level, DeviceDescriptor, NeighborRecord, NeighborSink,
    NodeIdAllocator, SessionFactory, SinkError, SnmpTransport, SnmpValue, TransportError, WalkRow,
};

/// One LLDP remote-table row of a fixture device.
#[derive(Debug, Clone)]
pub struct LinkFixture {
    /// Local port number, the shared index of the three LLDP tables.
    pub index: u32,
    pub local_port: String,
    /// Remote chassis id, 12 lowercase hex characters.
    pub remote_chassis: String,
    pub remote_port: String,
}

/// Simulated device: its own chassis id plus its LLDP tables.
#[derive(Debug, Clone)]
pub struct DeviceFixture {
    pub management_address: String,
    pub model: String,
    pub role: String,
    pub chassis_id: String,
    pub links: Vec<LinkFixture>,
}

#[derive(Debug, Clone, Default)]
struct LabState {
    fixtures: HashMap<String, DeviceFixture>,
    connect_failures: HashSet<String>,
    delays: HashMap<String, Duration>,
}

/// Fixture fleet acting as the transport factory.
#[derive(Debug, Clone, Default)]
pub struct MockLab {
    state: Arc<LabState>,
}

impl MockLab {
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical three-switch lab: sw1 and sw2 share a dual link, sw3
    /// hangs off both.
    pub fn lab() -> Self {
        let fixtures = [
            DeviceFixture {
                management_address: "172.0.0.1".to_string(),
                model: "S6850".to_string(),
                role: "T1".to_string(),
                chassis_id: "aabbccddee01".to_string(),
                links: vec![
                    link(1, "FGE1/0/1", "aabbccddee02", "FGE2/0/1"),
                    link(2, "FGE1/0/2", "aabbccddee02", "FGE2/0/2"),
                    link(3, "FGE1/0/3", "aabbccddee03", "FGE3/0/1"),
                ],
            },
            DeviceFixture {
                management_address: "172.0.0.2".to_string(),
                model: "S6850".to_string(),
                role: "T1".to_string(),
                chassis_id: "aabbccddee02".to_string(),
                links: vec![
                    link(1, "FGE2/0/1", "aabbccddee01", "FGE1/0/1"),
                    link(2, "FGE2/0/2", "aabbccddee01", "FGE1/0/2"),
                    link(3, "FGE2/0/3", "aabbccddee03", "FGE3/0/2"),
                ],
            },
            DeviceFixture {
                management_address: "172.0.0.3".to_string(),
                model: "S6850".to_string(),
                role: "T0".to_string(),
                chassis_id: "aabbccddee03".to_string(),
                links: vec![
                    link(1, "FGE3/0/1", "aabbccddee01", "FGE1/0/3"),
                    link(2, "FGE3/0/2", "aabbccddee02", "FGE2/0/3"),
                ],
            },
        ];
        fixtures
            .into_iter()
            .fold(Self::new(), |lab, fixture| lab.with_fixture(fixture))
    }

    pub fn with_fixture(mut self, fixture: DeviceFixture) -> Self {
        let state = Arc::make_mut(&mut self.state);
        state
            .fixtures
            .insert(fixture.management_address.clone(), fixture);
        self
    }

    /// Makes `session.connect()` fail for `address`.
    pub fn with_connect_failure(mut self, address: &str) -> Self {
        let state = Arc::make_mut(&mut self.state);
        state.connect_failures.insert(address.to_string());
        self
    }

    /// Delays `connect()` for `address`, which pins relative probe order in
    /// tests.
    pub fn with_connect_delay(mut self, address: &str, delay: Duration) -> Self {
        let state = Arc::make_mut(&mut self.state);
        state.delays.insert(address.to_string(), delay);
        self
    }

    /// Device descriptors for every fixture, in address order.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        let mut ids = NodeIdAllocator::new();
        let mut addresses: Vec<&String> = self.state.fixtures.keys().collect();
        addresses.sort();
        addresses
            .into_iter()
            .map(|address| {
                let fixture = &self.state.fixtures[address];
                DeviceDescriptor {
                    node_id: ids.id_for(address),
                    level: topology_level(&fixture.role, ""),
                    management_address: address.clone(),
                    outofband_address: String::new(),
                    datacenter: "LAB".to_string(),
                    vendor: "H3C".to_string(),
                    model: fixture.model.clone(),
                    role: fixture.role.clone(),
                    service: String::new(),
                    pod: "POD001".to_string(),
                    name: format!("lab-{address}"),
                    labels: topology_labels(&fixture.role),
                }
            })
            .collect()
    }
}

fn link(index: u32, local_port: &str, remote_chassis: &str, remote_port: &str) -> LinkFixture {
    LinkFixture {
        index,
        local_port: local_port.to_string(),
        remote_chassis: remote_chassis.to_string(),
        remote_port: remote_port.to_string(),
    }
}

fn hex_bytes(hex: &str) -> Vec<u8> {
    let digits: Vec<u8> = hex
        .bytes()
        .filter_map(|b| match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        })
        .collect();
    digits.chunks(2).map(|pair| (pair[0] << 4) | *pair.get(1).unwrap_or(&0)).collect()
}

impl SessionFactory for MockLab {
    type Session = MockSession;

    fn session(&self, target: &str) -> MockSession {
        MockSession {
            target: target.to_string(),
            state: self.state.clone(),
            connected: false,
        }
    }
}

/// One simulated SNMP session against a fixture device.
pub struct MockSession {
    target: String,
    state: Arc<LabState>,
    connected: bool,
}

impl MockSession {
    fn fixture(&self) -> Result<&DeviceFixture, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.state
            .fixtures
            .get(&self.target)
            .ok_or_else(|| TransportError::Protocol {
                target: self.target.clone(),
                reason: "no fixture for target".to_string(),
            })
    }
}

#[async_trait]
impl SnmpTransport for MockSession {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if let Some(delay) = self.state.delays.get(&self.target) {
            tokio::time::sleep(*delay).await;
        }
        if self.state.connect_failures.contains(&self.target) {
            return Err(TransportError::Connect {
                target: self.target.clone(),
                reason: "connection refused".to_string(),
            });
        }
        if !self.state.fixtures.contains_key(&self.target) {
            return Err(TransportError::Connect {
                target: self.target.clone(),
                reason: "unknown target".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    async fn get(&mut self, request: &[&str]) -> Result<Vec<SnmpValue>, TransportError> {
        let fixture = self.fixture()?;
        Ok(request
            .iter()
            .map(|oid| {
                if *oid == oids::LLDP_LOC_CHASSIS_ID {
                    SnmpValue::OctetString(hex_bytes(&fixture.chassis_id))
                } else {
                    SnmpValue::NoSuchObject
                }
            })
            .collect())
    }

    async fn bulk_walk(&mut self, oid: &str) -> Result<Vec<WalkRow>, TransportError> {
        let fixture = self.fixture()?;
        let rows = match oid {
            oids::LLDP_REM_CHASSIS_ID => fixture
                .links
                .iter()
                .map(|l| WalkRow {
                    oid: format!("{oid}.0.{}.1", l.index),
                    value: SnmpValue::OctetString(hex_bytes(&l.remote_chassis)),
                })
                .collect(),
            oids::LLDP_REM_PORT_ID => fixture
                .links
                .iter()
                .map(|l| WalkRow {
                    oid: format!("{oid}.0.{}.1", l.index),
                    value: SnmpValue::OctetString(l.remote_port.clone().into_bytes()),
                })
                .collect(),
            oids::LLDP_LOC_PORT_ID => fixture
                .links
                .iter()
                .map(|l| WalkRow {
                    oid: format!("{oid}.{}", l.index),
                    value: SnmpValue::OctetString(l.local_port.clone().into_bytes()),
                })
                .collect(),
            oids::IF_PHYS_ADDRESS => vec![WalkRow {
                oid: format!("{oid}.1"),
                value: SnmpValue::OctetString(hex_bytes(&fixture.chassis_id)),
            }],
            _ => Vec::new(),
        };
        Ok(rows)
    }
}

/// Sink capturing everything it is handed; test double for the graph sink.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<NeighborRecord>>,
    flushes: AtomicUsize,
    fail_remaining: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `count` saves, then behaves normally.
    pub fn failing_first(count: usize) -> Self {
        Self {
            fail_remaining: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<NeighborRecord> {
        self.records.lock().clone()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NeighborSink for RecordingSink {
    async fn save(&self, record: &NeighborRecord) -> Result<(), SinkError> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SinkError::new("injected save failure"));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_requires_connect() {
        let lab = MockLab::lab();
        let mut session = lab.session("172.0.0.1");
        assert!(matches!(
            session.get(&[oids::LLDP_LOC_CHASSIS_ID]).await,
            Err(TransportError::NotConnected)
        ));
        session.connect().await.unwrap();
        let values = session.get(&[oids::LLDP_LOC_CHASSIS_ID]).await.unwrap();
        assert_eq!(
            values,
            vec![SnmpValue::OctetString(vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01])]
        );
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_injection() {
        let lab = MockLab::lab().with_connect_failure("172.0.0.2");
        let mut session = lab.session("172.0.0.2");
        assert!(matches!(
            session.connect().await,
            Err(TransportError::Connect { .. })
        ));
        let mut session = lab.session("172.0.0.1");
        session.connect().await.unwrap();
    }

    #[tokio::test]
    async fn test_walk_rows_carry_table_indexes() {
        let lab = MockLab::lab();
        let mut session = lab.session("172.0.0.3");
        session.connect().await.unwrap();

        let rows = session.bulk_walk(oids::LLDP_REM_CHASSIS_ID).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].oid, format!("{}.0.1.1", oids::LLDP_REM_CHASSIS_ID));

        let local = session.bulk_walk(oids::LLDP_LOC_PORT_ID).await.unwrap();
        assert_eq!(local[0].oid, format!("{}.1", oids::LLDP_LOC_PORT_ID));
        assert_eq!(
            local[0].value,
            SnmpValue::OctetString(b"FGE3/0/1".to_vec())
        );
    }

    #[test]
    fn test_lab_devices_are_sorted_and_labeled() {
        let devices = MockLab::lab().devices();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].management_address, "172.0.0.1");
        assert_eq!(devices[2].management_address, "172.0.0.3");
        assert!(devices.iter().all(|d| d.labels == vec!["SWITCH"]));
        assert_eq!(devices[2].level, 3.0);
    }

    #[test]
    fn test_hex_bytes_round_trip() {
        assert_eq!(hex_bytes("aabbccddee01"), vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        assert_eq!(hex_bytes(""), Vec::<u8>::new());
    }
}
