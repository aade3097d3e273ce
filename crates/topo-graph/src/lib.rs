//! Neo4j topology store.
//!
//! Persists discovered devices as labeled nodes and neighbor adjacencies as
//! LINK_TO relationships. [`TopoGraph`] wraps the driver connection,
//! [`BatchingSink`] adapts it to the pipeline's record sink with transaction
//! batching.

pub mod cypher;
pub mod error;
pub mod sink;
pub mod store;

pub use cypher::LinkDirection;
pub use error::{GraphError, Result};
pub use sink::BatchingSink;
pub use store::{LinkPorts, TopoGraph};
