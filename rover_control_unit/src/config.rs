//! TOML configuration loader with validation.
//!
//! Loads [`ControlUnitConfig`] from a single TOML file and runs the
//! bounds checks defined next to the structures in `rover_common`.

use std::path::Path;

use rover_common::config::ControlUnitConfig;
use thiserror::Error;

/// Configuration loading/validation error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("config I/O error: {0}")]
    Io(String),
    /// TOML parse error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Parameter bounds or cross-field validation error.
    #[error("config validation: {0}")]
    Validation(String),
}

/// Load and validate the control unit configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ControlUnitConfig, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("failed to read {}: {e}", path.display())))?;
    load_config_from_str(&text)
}

/// Load from a TOML string (test hook).
pub fn load_config_from_str(text: &str) -> Result<ControlUnitConfig, ConfigError> {
    let cfg: ControlUnitConfig =
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    cfg.validate().map_err(ConfigError::Validation)?;
    Ok(cfg)
}

// ─── Tests ──────────────────────────────────────────────────────────
