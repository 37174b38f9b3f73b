//! Configuration management module
//!
//! Handles loading and validating the gateway configuration. The config file
//! is read exactly once at startup; there is no watching or hot reload.

use std::path::{Path, PathBuf};

use orchestra_types::{GatewayError, GatewayResult};
use tracing::info;

pub mod types;

pub use types::{
    AppConfig, BackendConfig, EditMode, GatewaySettings, PiiEntity, RedactionConfig,
};

/// Default config file location: `<config-dir>/orchestra/config.yaml`
pub fn default_config_path() -> GatewayResult<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| GatewayError::Config("Could not determine config directory".to_string()))?;
    Ok(base.join("orchestra").join("config.yaml"))
}

/// Load and validate configuration from the given path
pub fn load_config(path: &Path) -> GatewayResult<AppConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::Config(format!("Failed to read config {}: {}", path.display(), e))
    })?;

    let config: AppConfig = serde_yaml::from_str(&contents).map_err(|e| {
        GatewayError::Config(format!("Failed to parse config {}: {}", path.display(), e))
    })?;

    config.validate()?;

    info!(
        path = %path.display(),
        backends = config.backends.len(),
        redaction = config.redaction.is_some(),
        "Loaded configuration"
    );

    Ok(config)
}
