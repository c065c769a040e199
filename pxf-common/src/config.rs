//! Configuration loading and root folder resolution
//!
//! Resolution priority for the root folder:
//! 1. Explicit argument (highest priority)
//! 2. `PXF_ROOT_FOLDER` environment variable
//! 3. `root_folder` in the TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: defaults are used and a
//! warning is logged.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "PXF_ROOT_FOLDER";

/// Environment variable overriding the remote classifier A API key
pub const REMOTE_A_API_KEY_ENV: &str = "PXF_REMOTE_A_API_KEY";

/// Environment variable overriding the remote classifier B API key
pub const REMOTE_B_API_KEY_ENV: &str = "PXF_REMOTE_B_API_KEY";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "pxflora.db";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder holding the database
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    /// Remote classifier A endpoint
    pub remote_a: RemoteEndpointConfig,
    /// Remote classifier B endpoint
    pub remote_b: RemoteEndpointConfig,
    pub details: DetailsConfig,
    pub collection: CollectionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (e.g. "info", "pxf_id=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Short-circuit thresholds for the identification pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Local confidence at or above which remote classifiers are skipped
    pub local_accept_threshold: f32,
    /// Remote A confidence below which remote B is consulted
    pub remote_accept_threshold: f32,
    /// Broadcast capacity for pipeline events
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            local_accept_threshold: 0.75,
            remote_accept_threshold: 0.6,
            event_capacity: 100,
        }
    }
}

/// Remote classifier endpoint and its call policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteEndpointConfig {
    /// Endpoint URL; `None` disables the classifier
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay, doubled on every retry
    pub base_delay_ms: u64,
    pub requests_per_second: u32,
}

impl Default for RemoteEndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_ms: 10_000,
            max_retries: 2,
            base_delay_ms: 250,
            requests_per_second: 2,
        }
    }
}

/// Species detail cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailsConfig {
    /// Detail service endpoint; `None` disables remote detail fetches
    pub endpoint: Option<String>,
    /// Cache TTL in days
    pub ttl_days: i64,
    pub timeout_ms: u64,
}

impl Default for DetailsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            ttl_days: 7,
            timeout_ms: 10_000,
        }
    }
}

/// Collection store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Upper bound for a stored original image
    pub max_image_bytes: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 4 * 1024 * 1024,
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        let thresholds = [
            ("pipeline.local_accept_threshold", self.pipeline.local_accept_threshold),
            ("pipeline.remote_accept_threshold", self.pipeline.remote_accept_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.pipeline.event_capacity == 0 {
            return Err(Error::Config(
                "pipeline.event_capacity must be positive".to_string(),
            ));
        }
        if self.details.ttl_days <= 0 {
            return Err(Error::Config(format!(
                "details.ttl_days must be positive, got {}",
                self.details.ttl_days
            )));
        }
        if self.collection.max_image_bytes == 0 {
            return Err(Error::Config(
                "collection.max_image_bytes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply API key overrides from the environment
    ///
    /// Environment values win over TOML values; blank values are ignored.
    pub fn apply_env_overrides(&mut self) {
        let overrides = [
            (REMOTE_A_API_KEY_ENV, &mut self.remote_a.api_key),
            (REMOTE_B_API_KEY_ENV, &mut self.remote_b.api_key),
        ];
        for (var, slot) in overrides {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    info!(variable = var, "API key loaded from environment variable");
                    *slot = Some(key);
                }
            }
        }
    }
}

/// Load and validate a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;
    TomlConfig::from_toml_str(&content)
}

/// Load config, falling back to defaults when the file is missing or invalid
///
/// Environment overrides are applied either way.
pub fn load_config_or_default(path: &Path) -> TomlConfig {
    let mut config = match load_toml_config(path) {
        Ok(config) => {
            info!(path = %path.display(), "Configuration loaded");
            config
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Configuration unavailable, using defaults"
            );
            TomlConfig::default()
        }
    };
    config.apply_env_overrides();
    config
}

/// Write config to disk
///
/// Writes a sibling temp file first and renames it over the target so
/// readers never observe a half-written file.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Platform default config file location (`<config dir>/pxflora/pxflora.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pxflora").join("pxflora.toml"))
}

/// Root folder resolution
pub struct RootFolderResolver<'a> {
    config: Option<&'a TomlConfig>,
}

impl<'a> RootFolderResolver<'a> {
    pub fn new(config: Option<&'a TomlConfig>) -> Self {
        Self { config }
    }

    /// Resolve root folder using the documented priority order
    pub fn resolve(&self, explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = self.config.and_then(|c| c.root_folder.clone()) {
            return path;
        }

        default_root_folder()
    }
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("pxflora"))
        .unwrap_or_else(|| PathBuf::from("./pxflora_data"))
}

/// Database path inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE_NAME)
}
