use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kernel::constants::{
    DEFAULT_ENABLE_POLL_INTERVAL_MS, DEFAULT_ENABLE_TIMEOUT_SECS, ENABLE_TIMEOUT_ENV,
};
use crate::kernel::error::Result;
use crate::storage::error::StorageSystemError;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

/// Tunables of the plugin manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// How long the convergence wait lets plugins sit in `Enabling`
    pub enable_timeout_secs: u64,
    /// Poll step of the convergence wait
    pub enable_poll_interval_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enable_timeout_secs: DEFAULT_ENABLE_TIMEOUT_SECS,
            enable_poll_interval_ms: DEFAULT_ENABLE_POLL_INTERVAL_MS,
        }
    }
}

impl ManagerConfig {
    pub fn enable_timeout(&self) -> Duration {
        Duration::from_secs(self.enable_timeout_secs)
    }

    pub fn enable_poll_interval(&self) -> Duration {
        Duration::from_millis(self.enable_poll_interval_ms.max(1))
    }

    /// Timeouts are kept in whole seconds; a fractional one rounds up.
    pub fn with_enable_timeout(mut self, timeout: Duration) -> Self {
        let mut secs = timeout.as_secs();
        if timeout.subsec_nanos() > 0 {
            secs = secs.saturating_add(1);
            log::debug!("Rounding enable timeout {:?} up to {}s", timeout, secs);
        }
        self.enable_timeout_secs = secs;
        self
    }

    /// Defaults with the process environment applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`.
    ///
    /// `PLINTH_ENABLE_TIMEOUT_SECS` replaces the enable timeout; an unparsable
    /// value is logged and ignored.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENABLE_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.enable_timeout_secs = secs,
                Err(e) => log::warn!(
                    "Ignoring {}='{}': not a whole number of seconds ({})",
                    ENABLE_TIMEOUT_ENV,
                    raw,
                    e
                ),
            }
        }
        self
    }

    /// Parse a config document in the given format
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self> {
        let parsed = match format {
            ConfigFormat::Json => serde_json::from_str(contents).map_err(|e| {
                StorageSystemError::DeserializationError {
                    format: "json".to_string(),
                    source: Box::new(e),
                }
            })?,
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|e| {
                StorageSystemError::DeserializationError {
                    format: "yaml".to_string(),
                    source: Box::new(e),
                }
            })?,
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(contents).map_err(|e| {
                StorageSystemError::DeserializationError {
                    format: "toml".to_string(),
                    source: Box::new(e),
                }
            })?,
        };
        Ok(parsed)
    }

    /// Load from a file, picking the format from its extension
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            StorageSystemError::UnsupportedConfigFormat(path.display().to_string())
        })?;
        let contents = fs::read_to_string(path)
            .map_err(|e| StorageSystemError::io(e, "read_config", path.to_path_buf()))?;
        Self::parse(&contents, format)
    }
}
