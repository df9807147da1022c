//! Application configuration.
//!
//! Hosts pass configuration as JSON; every field is optional and falls back to
//! its documented default.

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::{FieldError, Result};
use crate::recorder::RecorderConfig;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// SQLite database file for entities and cached resources.
    /// Default: None (everything in memory)
    pub db_path: Option<String>,

    /// Cache generations and the shell manifest
    pub cache: CacheConfig,

    /// Recording behaviour
    pub recorder: RecorderConfig,
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(json).map_err(|e| FieldError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.product.trim().is_empty() || self.cache.version.trim().is_empty() {
            return Err(FieldError::Config {
                message: "cache product and version must not be empty".to_string(),
            });
        }
        if self.recorder.watch.timeout_ms == 0 {
            return Err(FieldError::Config {
                message: "watch timeout must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Persistent when a database path is set.
    pub fn is_persistent(&self) -> bool {
        self.db_path.is_some()
    }
}
