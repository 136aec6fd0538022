//! Pipeline configuration.
//!
//! Every field has a default, so a TOML document only needs the keys it
//! changes:
//!
//! ```toml
//! ticks = 100
//! batch_size = 50
//! queue_capacity = 1024
//! seed = 1
//! monitor_interval = 10
//! ```

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of lock-step rounds in a default run
pub const DEFAULT_TICKS: u64 = 100;

/// Items generated per tick, and the most the filter takes per tick
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Capacity of each dataflow queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Settings shared by the lock-step and dataflow runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ticks: u64,
    pub batch_size: usize,
    pub queue_capacity: usize,
    /// Seed for the value stream
    pub seed: u64,
    /// Ticks between monitor health lines
    pub monitor_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ticks: DEFAULT_TICKS,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            seed: 1,
            monitor_interval: 10,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)
            .map_err(|e| PipelineError::invalid(format!("bad pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject zero counts
    pub fn validate(&self) -> Result<()> {
        if self.ticks == 0 {
            return Err(PipelineError::invalid("ticks must be positive"));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::invalid("batch_size must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::invalid("queue_capacity must be positive"));
        }
        if self.monitor_interval == 0 {
            return Err(PipelineError::invalid("monitor_interval must be positive"));
        }
        Ok(())
    }

    /// Total items the dataflow producer emits
    pub fn total_items(&self) -> u64 {
        self.ticks * self.batch_size as u64
    }
}
