//! Growth configuration.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tuning knobs of a [`crate::PathGraph`]. None of them changes which
/// nodes are grown, only how the work is spread and how long the per-step
/// indexes are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthConfig {
    /// Workers sharing the frontier of one step.
    pub nb_workers: usize,
    /// Frontier indexes kept for backward lookups, the current one included.
    pub retention: usize,
    /// Minimum bucket count of a frontier index.
    pub index_buckets: usize,
    /// Compare-and-swap attempts before an insert gives up.
    pub max_cas_retries: usize,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            nb_workers: 8,
            retention: 3,
            index_buckets: 64,
            max_cas_retries: 10,
        }
    }
}

impl GrowthConfig {
    pub fn with_workers(mut self, nb_workers: usize) -> Self {
        self.nb_workers = nb_workers;
        self
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_index_buckets(mut self, index_buckets: usize) -> Self {
        self.index_buckets = index_buckets;
        self
    }

    pub fn with_max_cas_retries(mut self, max_cas_retries: usize) -> Self {
        self.max_cas_retries = max_cas_retries;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nb_workers == 0 {
            return Err(Error::Growth("nb_workers must be at least 1".into()));
        }
        if self.retention == 0 {
            return Err(Error::Growth("retention must keep the current frontier".into()));
        }
        if self.index_buckets == 0 {
            return Err(Error::Growth("index_buckets must be at least 1".into()));
        }
        Ok(())
    }
}
