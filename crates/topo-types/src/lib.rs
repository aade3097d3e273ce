//! Shared domain types for the fleet topology discovery pipeline.
//!
//! Everything the scanner daemon and the graph persistence layer exchange
//! lives here: device descriptors from inventory, aggregated neighbor
//! records, node-id allocation, and the two async seams of the pipeline
//! (the SNMP transport capability and the persistence sink).

pub mod device;
pub mod node_id;
pub mod record;
pub mod sink;
pub mod transport;

pub use device::{topology_labels, topology_level, DeviceDescriptor};
pub use node_id::NodeIdAllocator;
pub use record::{ChassisAnnouncement, NeighborRecord, RemoteId};
pub use sink::{NeighborSink, SinkError};
pub use transport::{
    oids, SessionFactory, SessionSettings, SnmpTransport, SnmpValue, TransportError, WalkRow,
};
