//! Daemon configuration.
//!
//! Loaded from a JSON file named on the command line. Every tuning knob has
//! a default so a minimal config only needs the inventory URL and the graph
//! store coordinates.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, ScanError};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Inventory API endpoint.
    #[serde(default)]
    pub url: String,
    /// Link writes per graph transaction.
    #[serde(default = "default_savebatch")]
    pub savebatch: u64,
    /// Log file path; empty logs to stderr.
    #[serde(default)]
    pub logfile: String,
    /// Bolt URI of the topology store.
    #[serde(default = "default_neoserver")]
    pub neoserver: String,
    #[serde(default)]
    pub neouser: String,
    #[serde(default)]
    pub neopassword: String,
    /// SNMP community shared by every probed device.
    #[serde(default = "default_community")]
    pub community: String,
    /// Device probes in flight at once.
    #[serde(default = "default_max_probes")]
    pub max_probes: usize,
    /// Concurrent persistence workers. One keeps the sink's batching free
    /// of cross-task races.
    #[serde(default = "default_drain_workers")]
    pub drain_workers: usize,
}

fn default_savebatch() -> u64 {
    100
}

fn default_neoserver() -> String {
    "bolt://127.0.0.1:7687".to_string()
}

fn default_community() -> String {
    "public".to_string()
}

fn default_max_probes() -> usize {
    500
}

fn default_drain_workers() -> usize {
    1
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.savebatch == 0 {
            return Err(ScanError::Config("savebatch must be at least 1".to_string()));
        }
        if self.max_probes == 0 {
            return Err(ScanError::Config("max_probes must be at least 1".to_string()));
        }
        if self.drain_workers == 0 {
            return Err(ScanError::Config(
                "drain_workers must be at least 1".to_string(),
            ));
        }
        if self.neoserver.is_empty() {
            return Err(ScanError::Config("neoserver must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            savebatch: default_savebatch(),
            logfile: String::new(),
            neoserver: default_neoserver(),
            neouser: String::new(),
            neopassword: String::new(),
            community: default_community(),
            max_probes: default_max_probes(),
            drain_workers: default_drain_workers(),
        }
    }
}
