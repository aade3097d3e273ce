//! Batched link persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use neo4rs::{query, Txn};
use tokio::sync::Mutex;
use topo_types::{NeighborRecord, NeighborSink, SinkError};
use tracing::{debug, warn};

use crate::cypher;
use crate::store::TopoGraph;

/// Seam between the batching logic and the transaction calls it drives.
#[async_trait]
trait LinkWriter: Send + Sync {
    /// Opens a fresh batch transaction.
    async fn begin(&self) -> Result<(), SinkError>;
    /// Writes one link inside the open batch.
    async fn write(
        &self,
        start: i64,
        end: i64,
        local_ports: &[String],
        remote_ports: &[String],
    ) -> Result<(), SinkError>;
    /// Commits the open batch.
    async fn commit(&self) -> Result<(), SinkError>;
    /// Discards the open batch.
    async fn rollback(&self) -> Result<(), SinkError>;
}

/// Writes link batches through Neo4j transactions.
struct GraphLinkWriter {
    store: TopoGraph,
    txn: Mutex<Option<Txn>>,
}

#[async_trait]
impl LinkWriter for GraphLinkWriter {
    async fn begin(&self) -> Result<(), SinkError> {
        let txn = self
            .store
            .graph
            .start_txn()
            .await
            .map_err(|e| SinkError::new(format!("failed to open link batch: {e}")))?;
        *self.txn.lock().await = Some(txn);
        Ok(())
    }

    async fn write(
        &self,
        start: i64,
        end: i64,
        local_ports: &[String],
        remote_ports: &[String],
    ) -> Result<(), SinkError> {
        let mut guard = self.txn.lock().await;
        let txn = guard
            .as_mut()
            .ok_or_else(|| SinkError::new("link batch transaction missing"))?;
        txn.run(
            query(cypher::CREATE_LINK)
                .param("start", start)
                .param("end", end)
                .param("lports", local_ports.to_vec())
                .param("rports", remote_ports.to_vec()),
        )
        .await
        .map_err(|e| SinkError::new(format!("failed to save link: {e}")))
    }

    async fn commit(&self) -> Result<(), SinkError> {
        if let Some(txn) = self.txn.lock().await.take() {
            txn.commit()
                .await
                .map_err(|e| SinkError::new(format!("link batch commit failed: {e}")))?;
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), SinkError> {
        if let Some(txn) = self.txn.lock().await.take() {
            txn.rollback()
                .await
                .map_err(|e| SinkError::new(format!("link batch rollback failed: {e}")))?;
        }
        Ok(())
    }
}

struct BatchState {
    open: bool,
    pending: u64,
}

/// Batch state machine over a [`LinkWriter`].
///
/// Records accumulate in an open batch; every `batch_size` writes the batch
/// commits and a fresh one opens on the next record. A failed write discards
/// the open batch, so a poisoned transaction never reaches commit.
struct LinkBatcher<W> {
    writer: W,
    node_ids: HashMap<String, i64>,
    batch_size: u64,
    state: Mutex<BatchState>,
}

impl<W: LinkWriter> LinkBatcher<W> {
    fn new(writer: W, node_ids: HashMap<String, i64>, batch_size: u64) -> Self {
        Self {
            writer,
            node_ids,
            batch_size: batch_size.max(1),
            state: Mutex::new(BatchState {
                open: false,
                pending: 0,
            }),
        }
    }

    async fn save(&self, record: &NeighborRecord) -> Result<(), SinkError> {
        let (start, end) = endpoints(&self.node_ids, record)?;
        let mut state = self.state.lock().await;

        if !state.open {
            self.writer.begin().await?;
            state.open = true;
        }

        // A failed statement poisons the transaction; discard the whole
        // batch rather than commit a partial one.
        if let Err(e) = self
            .writer
            .write(start, end, &record.local_ports, &record.remote_ports)
            .await
        {
            let dropped = state.pending;
            state.pending = 0;
            state.open = false;
            if let Err(rollback_err) = self.writer.rollback().await {
                warn!(error = %rollback_err, "link batch rollback failed");
            }
            warn!(dropped, "open link batch rolled back");
            return Err(e);
        }

        state.pending += 1;
        if state.pending >= self.batch_size {
            state.pending = 0;
            state.open = false;
            self.writer.commit().await?;
            debug!(batch = self.batch_size, "link batch committed");
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock().await;
        let pending = state.pending;
        state.pending = 0;
        if state.open {
            state.open = false;
            self.writer.commit().await?;
            debug!(pending, "tail link batch committed");
        }
        Ok(())
    }
}

/// Sink that writes LINK_TO relationships in transactions of a fixed size.
///
/// `flush` commits whatever tail is open. Endpoint node ids are translated
/// from management addresses through a map captured at construction, so the
/// sink never queries the store on the hot path.
pub struct BatchingSink {
    batcher: LinkBatcher<GraphLinkWriter>,
}

impl BatchingSink {
    pub fn new(store: TopoGraph, node_ids: HashMap<String, i64>, batch_size: u64) -> Self {
        let writer = GraphLinkWriter {
            store,
            txn: Mutex::new(None),
        };
        Self {
            batcher: LinkBatcher::new(writer, node_ids, batch_size),
        }
    }
}

/// Node ids for both ends of a record. Fails when the record is still
/// unresolved or either address was never stored.
fn endpoints(
    node_ids: &HashMap<String, i64>,
    record: &NeighborRecord,
) -> Result<(i64, i64), SinkError> {
    let remote_address = record.remote_address().ok_or_else(|| {
        SinkError::new(format!(
            "record from {} reached the sink unresolved",
            record.local_address
        ))
    })?;
    let start = *node_ids.get(&record.local_address).ok_or_else(|| {
        SinkError::new(format!(
            "no node id for local device {}",
            record.local_address
        ))
    })?;
    let end = *node_ids
        .get(remote_address)
        .ok_or_else(|| SinkError::new(format!("no node id for remote device {remote_address}")))?;
    Ok((start, end))
}

#[async_trait]
impl NeighborSink for BatchingSink {
    async fn save(&self, record: &NeighborRecord) -> Result<(), SinkError> {
        self.batcher.save(record).await
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.batcher.flush().await
    }
}
