//! Configuration file loading and parsing.
//!
//! This module handles loading the YAML run configuration from disk and
//! parsing it into validated, type-safe structures.
//!
//! # Configuration File Locations
//!
//! The configuration file is searched in the following order:
//!
//! 1. Path specified via `--config` CLI flag
//! 2. Default location:
//!    - **Linux/macOS:** `~/.kiprint/config.yaml`
//!    - **Windows:** `%USERPROFILE%\.kiprint\config.yaml`
//! 3. `kiprint.yaml` in the current directory
//!
//! # Example Configuration
//!
//! See `config/example.kiprint.yaml` for a complete example.

mod settings;

pub use settings::{
    Config, DrcOptions, GlobalConfig, LoggingConfig, PreflightConfig, Resolved,
    DEFAULT_OUTPUT_PATTERN,
};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// Name looked up in the current directory when nothing else is found.
pub const LOCAL_CONFIG_NAME: &str = "kiprint.yaml";

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.kiprint/`
/// - **Windows:** `%USERPROFILE%\.kiprint\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".kiprint"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.yaml"))
}

/// Picks the configuration file: the explicit one, the default location if
/// it exists, else `kiprint.yaml` in the current directory.
#[must_use]
pub fn find_config(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    default_config_path()
        .filter(|p| p.is_file())
        .unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_NAME))
}

/// Loads and parses the configuration file.
///
/// If `path` is `None`, the file is looked up with [`find_config`].
///
/// # Errors
///
/// Returns an error if:
/// - The configuration file cannot be found
/// - The file cannot be read
/// - The YAML is malformed
/// - A filter, variant, output, layer or color is unknown or invalid
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = find_config(path);

    if !config_path.exists() {
        return Err(ConfigError::NotFound { path: config_path });
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;

    let config = parse_config(&contents, &config_path)?;
    tracing::debug!(path = %config_path.display(), outputs = config.outputs.len(), "Loaded configuration");
    Ok(config)
}

/// Parses and validates configuration text. `path` is only used in errors.
///
/// # Errors
///
/// Same as [`load_config`], without the file access ones.
pub fn parse_config(contents: &str, path: &Path) -> Result<Config, ConfigError> {
    // An empty document is an empty configuration
    let config: Config = if contents.trim().is_empty() {
        Config::default()
    } else {
        serde_yml::from_str(contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?
    };
    config.validate()?;
    Ok(config)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

/// Accepts `name`, `[a, b]` or a comma separated `a, b`.
///
/// # Errors
///
/// Fails for anything that isn't a string or a list of strings.
pub fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        StringOrList::Many(list) => list,
    })
}
