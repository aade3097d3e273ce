//! Persistence seam for resolved neighbor records.

use async_trait::async_trait;
use thiserror::Error;

use crate::record::NeighborRecord;

/// Error from a neighbor sink. Sinks translate their backend failures into
/// this type so the drain stage stays backend-agnostic.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Destination for resolved neighbor records.
///
/// `save` receives records whose remote end is already resolved to a
/// management address. `flush` is called once after the last record and lets
/// batching implementations commit their tail; the default is a no-op.
#[async_trait]
pub trait NeighborSink: Send + Sync {
    async fn save(&self, record: &NeighborRecord) -> Result<(), SinkError>;

    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
