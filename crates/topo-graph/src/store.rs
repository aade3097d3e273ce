//! Connection handle and write operations against the Neo4j store.

use neo4rs::{query, Graph};
use topo_types::DeviceDescriptor;
use tracing::{debug, info};

use crate::cypher::{self, LinkDirection};
use crate::error::{GraphError, Result};

/// Port lists carried by one LINK_TO relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPorts {
    pub local_ports: Vec<String>,
    pub remote_ports: Vec<String>,
}

/// Handle to the topology database.
///
/// Cloneable; the underlying driver pools connections. Device nodes are
/// written in one transaction per batch, links either individually or
/// through [`crate::BatchingSink`].
#[derive(Clone)]
pub struct TopoGraph {
    pub(crate) graph: Graph,
}

impl TopoGraph {
    /// Connects to the store at `uri` with basic auth.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password).await?;
        info!(uri, "connected to topology store");
        Ok(Self { graph })
    }

    /// Writes all device nodes in a single transaction.
    ///
    /// Returns the number of nodes written. A failure on any statement rolls
    /// the whole batch back via transaction drop.
    pub async fn save_devices(&self, devices: &[DeviceDescriptor]) -> Result<usize> {
        let mut txn = self.graph.start_txn().await?;
        for device in devices {
            let statement = cypher::create_device_statement(&device.labels);
            txn.run(
                query(&statement)
                    .param("id", device.node_id)
                    .param("level", device.level)
                    .param("mgt", device.management_address.as_str())
                    .param("oobmgt", device.outofband_address.as_str())
                    .param("dc", device.datacenter.as_str())
                    .param("vendor", device.vendor.as_str())
                    .param("model", device.model.as_str())
                    .param("role", device.role.as_str())
                    .param("service", device.service.as_str())
                    .param("pod", device.pod.as_str())
                    .param("name", device.name.as_str()),
            )
            .await?;
        }
        txn.commit().await?;
        debug!(count = devices.len(), "device nodes written");
        Ok(devices.len())
    }

    /// Creates one LINK_TO relationship between two stored devices.
    pub async fn create_link(
        &self,
        start: i64,
        end: i64,
        local_ports: &[String],
        remote_ports: &[String],
    ) -> Result<()> {
        self.graph
            .run(
                query(cypher::CREATE_LINK)
                    .param("start", start)
                    .param("end", end)
                    .param("lports", local_ports.to_vec())
                    .param("rports", remote_ports.to_vec()),
            )
            .await?;
        Ok(())
    }

    /// Node ids of stored devices matching every property in `filter`.
    ///
    /// An empty filter returns every device. Filterable properties are the
    /// node attributes written by [`Self::save_devices`] (`mgt`, `name`,
    /// `role`, `pod`, ...).
    pub async fn query_devices(&self, filter: &[(&str, String)]) -> Result<Vec<i64>> {
        let names: Vec<&str> = filter.iter().map(|(name, _)| *name).collect();
        let statement = cypher::query_devices_statement(&names);
        let mut q = query(&statement);
        for (name, value) in filter {
            q = q.param(name, value.as_str());
        }
        let mut rows = self.graph.execute(q).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(
                row.get::<i64>("id")
                    .map_err(|e| GraphError::Row(e.to_string()))?,
            );
        }
        Ok(ids)
    }

    /// Node id for the device stored with `management_address`, if any.
    pub async fn device_node_id(&self, management_address: &str) -> Result<Option<i64>> {
        let ids = self
            .query_devices(&[("mgt", management_address.to_string())])
            .await?;
        Ok(ids.first().copied())
    }

    /// Port lists of the LINK_TO relationships between two stored devices,
    /// matched by node id and relationship direction.
    pub async fn query_links(
        &self,
        start: i64,
        end: i64,
        direction: LinkDirection,
    ) -> Result<Vec<LinkPorts>> {
        let statement = cypher::query_links_statement(direction);
        let mut rows = self
            .graph
            .execute(query(&statement).param("start", start).param("end", end))
            .await?;
        let mut links = Vec::new();
        while let Some(row) = rows.next().await? {
            links.push(LinkPorts {
                local_ports: row
                    .get::<Vec<String>>("lports")
                    .map_err(|e| GraphError::Row(e.to_string()))?,
                remote_ports: row
                    .get::<Vec<String>>("rports")
                    .map_err(|e| GraphError::Row(e.to_string()))?,
            });
        }
        Ok(links)
    }

    /// Number of device nodes currently stored.
    pub async fn count_devices(&self) -> Result<i64> {
        let mut rows = self.graph.execute(query(cypher::COUNT_DEVICES)).await?;
        match rows.next().await? {
            Some(row) => row
                .get::<i64>("count")
                .map_err(|e| GraphError::Row(e.to_string())),
            None => Ok(0),
        }
    }
}
