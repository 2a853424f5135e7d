//! Execution configuration shared by the validator and the compiler

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default seed, matching the classic Mersenne Twister default
pub const DEFAULT_SEED: u64 = 5489;

/// Configuration for one compiled execution tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Worker threads per parallel operator
    pub num_parallel_workers: usize,

    /// Override for source reader workers
    pub source_workers: Option<usize>,

    /// Override for map workers
    pub map_workers: Option<usize>,

    /// Depth of every bounded queue between operators
    pub queue_capacity: usize,

    /// Seed for every randomized sampler and shuffle
    pub seed: u64,

    /// Ceiling on bytes held by buffering operators
    pub memory_ceiling: Option<usize>,

    /// Whether fan-out operators reproduce single-threaded row order
    pub preserve_order: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            num_parallel_workers: num_cpus::get().clamp(1, 8),
            source_workers: None,
            map_workers: None,
            queue_capacity: 16,
            seed: DEFAULT_SEED,
            memory_ceiling: None,
            preserve_order: true,
        }
    }
}

impl ExecutionConfig {
    /// Parse a configuration from JSON; missing keys take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid execution config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the worker count for every parallel operator
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.num_parallel_workers = workers;
        self
    }

    /// Set the source worker count
    #[must_use]
    pub fn with_source_workers(mut self, workers: usize) -> Self {
        self.source_workers = Some(workers);
        self
    }

    /// Set the map worker count
    #[must_use]
    pub fn with_map_workers(mut self, workers: usize) -> Self {
        self.map_workers = Some(workers);
        self
    }

    /// Set the queue depth
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the memory ceiling
    #[must_use]
    pub fn with_memory_ceiling(mut self, bytes: usize) -> Self {
        self.memory_ceiling = Some(bytes);
        self
    }

    /// Enable or disable order preservation
    #[must_use]
    pub fn with_preserve_order(mut self, preserve: bool) -> Self {
        self.preserve_order = preserve;
        self
    }

    /// Effective source worker count
    pub fn source_workers(&self) -> usize {
        self.source_workers.unwrap_or(self.num_parallel_workers)
    }

    /// Effective map worker count
    pub fn map_workers(&self) -> usize {
        self.map_workers.unwrap_or(self.num_parallel_workers)
    }

    /// Check the configuration for unusable values
    pub fn validate(&self) -> Result<()> {
        if self.num_parallel_workers == 0 || self.source_workers() == 0 || self.map_workers() == 0 {
            return Err(Error::Config("worker counts must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.memory_ceiling == Some(0) {
            return Err(Error::Config("memory_ceiling must be positive when set".into()));
        }
        Ok(())
    }
}
