//! Configuration file

use std::path::Path;

use anyhow::{Context, Result};
use pb_session::VirtualBleConfig;
use pb_sim::SimAdapterConfig;
use serde::{Deserialize, Serialize};

/// Settings for the loopback hubs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Broadcasting hub
    pub sender: VirtualBleConfig,
    /// Observing hub
    pub receiver: VirtualBleConfig,
    /// Simulated adapter of the broadcasting hub
    pub adapter: SimAdapterConfig,
}

impl Config {
    /// Load from a JSON file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}
