//! Inventory API client.
//!
//! Fetches the managed-device list over HTTP and maps each entry to a
//! [`DeviceDescriptor`], deriving the topology level and labels from the
//! device role. An inventory failure is fatal to the run; no partial scan
//! is attempted.

use serde::Deserialize;
use topo_types::{topology_labels, topology_level, DeviceDescriptor, NodeIdAllocator};
use tracing::{debug, info};

use crate::error::{Result, ScanError};

/// Response code the inventory API uses for success.
pub const INVENTORY_OK_CODE: i64 = 2000;
pub const INVENTORY_OK_MESSAGE: &str = "OK";

/// Envelope of the inventory API response.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RespBody {
    pub code: i64,
    pub data: DataBlock,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DataBlock {
    pub list: Vec<ListBlock>,
    pub total_count: f64,
}

/// One inventory entry. Only the fields the scanner consumes are kept;
/// unknown fields in the payload are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListBlock {
    pub name: String,
    pub role: String,
    pub service: String,
    pub management_ip: String,
    pub outofband_ip: String,
    pub manufacturer: String,
    pub model: String,
    pub datacenter_short_name: String,
    pub pod_name: String,
}

/// Fetches and maps the device inventory at `url`.
pub async fn fetch_devices(url: &str, ids: &mut NodeIdAllocator) -> Result<Vec<DeviceDescriptor>> {
    let body: RespBody = reqwest::get(url).await?.json().await?;
    devices_from_response(body, ids)
}

/// Maps an inventory response to device descriptors.
///
/// The response gate is strict: a code other than 2000 or a message other
/// than "OK" fails the whole run. Entries without a management address fall
/// back to the out-of-band address and are skipped when both are missing.
pub fn devices_from_response(
    body: RespBody,
    ids: &mut NodeIdAllocator,
) -> Result<Vec<DeviceDescriptor>> {
    if body.code != INVENTORY_OK_CODE {
        return Err(ScanError::Inventory(format!(
            "inventory returned code {}",
            body.code
        )));
    }
    if body.message != INVENTORY_OK_MESSAGE {
        return Err(ScanError::Inventory(format!(
            "inventory returned message {:?}",
            body.message
        )));
    }

    let mut devices = Vec::with_capacity(body.data.list.len());
    for entry in body.data.list {
        let management = if entry.management_ip.is_empty() {
            if entry.outofband_ip.is_empty() {
                debug!(name = %entry.name, "inventory entry has no usable address, skipped");
                continue;
            }
            entry.outofband_ip.clone()
        } else {
            entry.management_ip.clone()
        };
        devices.push(DeviceDescriptor {
            node_id: ids.id_for(&management),
            level: topology_level(&entry.role, &entry.service),
            management_address: management,
            outofband_address: entry.outofband_ip,
            datacenter: entry.datacenter_short_name,
            vendor: entry.manufacturer,
            model: entry.model,
            labels: topology_labels(&entry.role),
            role: entry.role,
            service: entry.service,
            pod: entry.pod_name,
            name: entry.name,
        });
    }
    info!(devices = devices.len(), "inventory loaded");
    Ok(devices)
}
