//! SNMP transport seam used by device probes.
//!
//! Probes only depend on the [`SnmpTransport`] trait and the OID constants
//! here; the real UDP client and the lab mock both implement it.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// OIDs polled during neighbor discovery.
pub mod oids {
    /// Local chassis id of the polled device (scalar).
    pub const LLDP_LOC_CHASSIS_ID: &str = "1.0.8802.1.1.2.1.3.2.0";
    /// Interface physical address column, used on devices whose LLDP local
    /// chassis object is absent.
    pub const IF_PHYS_ADDRESS: &str = "1.3.6.1.2.1.2.2.1.6";
    /// Remote chassis id column of the LLDP remote table.
    pub const LLDP_REM_CHASSIS_ID: &str = "1.0.8802.1.1.2.1.4.1.1.5";
    /// Remote port id column of the LLDP remote table.
    pub const LLDP_REM_PORT_ID: &str = "1.0.8802.1.1.2.1.4.1.1.7";
    /// Local port id column of the LLDP local port table.
    pub const LLDP_LOC_PORT_ID: &str = "1.0.8802.1.1.2.1.3.7.1.3";
}

/// Decoded SNMP variable binding value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    ObjectIdentifier(String),
    IpAddress([u8; 4]),
    Unsigned(u64),
    Null,
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
    /// Raw bytes of a value whose tag the decoder does not interpret.
    Opaque(Vec<u8>),
}

impl SnmpValue {
    /// Octet string payload, `None` for every other variant.
    pub fn octets(&self) -> Option<&[u8]> {
        match self {
            SnmpValue::OctetString(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// One row returned by a table walk: full instance OID plus its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkRow {
    pub oid: String,
    pub value: SnmpValue,
}

/// SNMP session parameters shared by every probe of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub community: String,
    pub port: u16,
    pub timeout: Duration,
    pub retries: u32,
    pub max_repetitions: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            community: "public".to_string(),
            port: 161,
            timeout: Duration::from_secs(3),
            retries: 1,
            max_repetitions: 3,
        }
    }
}

/// Transport-level failure while talking to a device.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("session is not connected")]
    NotConnected,

    #[error("request to {target} timed out after {attempts} attempts")]
    Timeout { target: String, attempts: u32 },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("protocol error from {target}: {reason}")]
    Protocol { target: String, reason: String },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// One SNMP session against a single device.
///
/// `connect` must succeed before `get` or `bulk_walk` are called; `close`
/// releases the session and is safe to call more than once.
#[async_trait]
pub trait SnmpTransport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    /// Values for `oids`, in request order.
    async fn get(&mut self, oids: &[&str]) -> Result<Vec<SnmpValue>, TransportError>;

    /// All rows under `oid`, in lexicographic instance order.
    async fn bulk_walk(&mut self, oid: &str) -> Result<Vec<WalkRow>, TransportError>;
}

/// Produces one transport session per probed device.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: SnmpTransport + Send + 'static;

    fn session(&self, target: &str) -> Self::Session;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.community, "public");
        assert_eq!(settings.port, 161);
        assert_eq!(settings.timeout, Duration::from_secs(3));
        assert_eq!(settings.retries, 1);
        assert_eq!(settings.max_repetitions, 3);
    }

    #[test]
    fn test_octets_accessor() {
        let value = SnmpValue::OctetString(vec![0xaa, 0xbb]);
        assert_eq!(value.octets(), Some(&[0xaa, 0xbb][..]));
        assert_eq!(SnmpValue::Integer(7).octets(), None);
        assert_eq!(SnmpValue::Null.octets(), None);
    }
}
