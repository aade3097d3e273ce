//! Error types for the topology store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("neo4j error: {0}")]
    Neo4j(#[from] neo4rs::Error),

    #[error("row decode error: {0}")]
    Row(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
