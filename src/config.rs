//! Engine configuration.
//!
//! Loaded from TOML, optionally overridden from the environment, and held in a
//! [`ConfigHandle`] that can be reloaded while jobs run. Jobs take one
//! [`ConfigHandle::snapshot`] at start and never read the handle again.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

/// Environment variable overriding [`EngineConfig::memory_buffer_bytes`].
pub const MEMORY_BUFFER_ENV: &str = "CLUSTER_EVAL_MEMORY_BUFFER_BYTES";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Label memory an evaluation may hold before switching to incremental scoring.
    pub memory_buffer_bytes: u64,
    /// Documents per scroll page (and per incremental scoring batch).
    pub scroll_size: usize,
    /// Used when a clustering run does not set its own limit.
    pub default_document_limit: usize,
    pub kmeans_max_iterations: usize,
    pub kmeans_tolerance: f64,
    pub random_seed: u64,
    /// Significant terms kept per cluster.
    pub significant_terms: usize,
    /// Vocabulary cap, most frequent terms first.
    pub max_features: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_buffer_bytes: 1 << 30,
            scroll_size: 500,
            default_document_limit: 10_000,
            kmeans_max_iterations: 100,
            kmeans_tolerance: 1e-4,
            random_seed: 42,
            significant_terms: 10,
            max_features: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply [`MEMORY_BUFFER_ENV`] if it is set.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(raw) = std::env::var(MEMORY_BUFFER_ENV) {
            self.memory_buffer_bytes = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: MEMORY_BUFFER_ENV.to_string(),
                reason: format!("'{}' is not a byte count", raw),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("scroll_size", self.scroll_size),
            ("default_document_limit", self.default_document_limit),
            ("kmeans_max_iterations", self.kmeans_max_iterations),
            ("max_features", self.max_features),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
        }
        if !(self.kmeans_tolerance >= 0.0) {
            return Err(ConfigError::Invalid {
                key: "kmeans_tolerance".to_string(),
                reason: "must be a non-negative number".to_string(),
            });
        }
        Ok(())
    }
}

/// Shared, hot-reloadable configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<EngineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> EngineConfig {
        self.inner.read().clone()
    }

    /// Replace the configuration; running jobs keep their snapshot.
    pub fn reload(&self, config: EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        info!(
            memory_buffer_bytes = config.memory_buffer_bytes,
            scroll_size = config.scroll_size,
            "engine configuration reloaded"
        );
        *self.inner.write() = config;
        Ok(())
    }
}
