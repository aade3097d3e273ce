//! Error types for the discovery daemon.

use thiserror::Error;
use topo_types::TransportError;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inventory error: {0}")]
    Inventory(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("pipeline stage error: {0}")]
    Stage(&'static str),
}

pub type Result<T> = std::result::Result<T, ScanError>;
