//! Configuration for smartmark
//!
//! Link derivation settings, local storage location and logging level.
//! Loaded from `~/.smartmark/config.toml` when present.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartmarkConfig {
    /// Url normalization and favicon settings
    pub links: LinkConfig,
    /// Local collection storage
    pub storage: StorageConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

/// Url normalization and favicon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Favicon lookup service, queried with `sz` and `domain` parameters
    pub favicon_service: String,
    /// Requested favicon edge length in pixels
    pub favicon_size: u32,
    /// Scheme prepended to input that has none
    pub default_scheme: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            favicon_service: "https://www.google.com/s2/favicons".to_string(),
            favicon_size: 64,
            default_scheme: "https".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding the collection
    pub database_path: Option<PathBuf>,
    /// Owner used when none is given on the command line
    pub default_owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SmartmarkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `~/.smartmark/config.toml`, or defaults if it does not exist
    pub fn load_standard() -> Result<Self, ConfigError> {
        match Self::standard_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn standard_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".smartmark").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(16..=256).contains(&self.links.favicon_size) {
            return Err(ConfigError::OutOfRange(
                "favicon_size must be between 16 and 256".to_string(),
            ));
        }

        if !matches!(self.links.default_scheme.as_str(), "http" | "https") {
            return Err(ConfigError::OutOfRange(format!(
                "default_scheme must be http or https, got {}",
                self.links.default_scheme
            )));
        }

        if self.links.favicon_service.trim().is_empty() {
            return Err(ConfigError::MissingField("favicon_service".to_string()));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::MissingField("logging.level".to_string()));
        }

        Ok(())
    }
}

/// Configuration loading or validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(String),

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Missing field: {0}")]
    MissingField(String),
}
