//! Fleet topology discovery daemon.
//!
//! toposyncd polls every managed device for LLDP neighbor data over SNMP,
//! resolves raw chassis ids to management addresses through a two-stage
//! pipeline (immediate lookup plus a retry-until-resolved sweep), and feeds
//! the resolved adjacencies to the topology store.

pub mod chassis_table;
pub mod config;
pub mod drain;
pub mod error;
pub mod inventory;
pub mod mock;
pub mod pending;
pub mod probe;
pub mod scan;
pub mod snmp;

pub use chassis_table::ChassisIdentityTable;
pub use config::Config;
pub use drain::{DrainStats, ResultDrain};
pub use error::{Result, ScanError};
pub use inventory::fetch_devices;
pub use mock::{MockLab, RecordingSink};
pub use pending::PendingNeighborRegistry;
pub use probe::DeviceNeighborProbe;
pub use scan::{DiscoveryOrchestrator, OrchestratorSettings, ProbeStats};
pub use snmp::SnmpSessionFactory;
