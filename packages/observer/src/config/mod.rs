//! Configuration loading for the observation engine.
//!
//! The configuration file supports JSONC format (JSON with comments).
//! Both single-line (`//`) and multi-line (`/* */`) comments are allowed.

mod types;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
pub use types::ObserverConfig;

/// Directory name used under the user's config directories.
const CONFIG_DIR_NAME: &str = "viz-observer";

/// Configuration file names to search for (in priority order).
const CONFIG_FILE_NAMES: &[&str] = &["config.jsonc", "config.json"];

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration file was found in any of the expected locations.
    #[error("No configuration file found. Expected at ~/.config/viz-observer/config.jsonc")]
    NotFound,
    /// The configuration file exists but could not be read.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file contains invalid JSON.
    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    /// The configuration parsed but holds unusable values.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Returns the possible configuration file paths in priority order.
///
/// The function checks the following locations (both `.jsonc` and `.json` variants):
/// 1. `$XDG_CONFIG_HOME/viz-observer/` if the variable is set
/// 2. `~/.config/viz-observer/`
/// 3. The platform config directory (e.g. `~/Library/Application Support/viz-observer/`)
#[must_use]
pub fn config_paths() -> Vec<PathBuf> {
    let mut dirs_to_check = Vec::new();

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        dirs_to_check.push(PathBuf::from(xdg_config).join(CONFIG_DIR_NAME));
    }

    if let Some(home) = dirs::home_dir() {
        dirs_to_check.push(home.join(".config").join(CONFIG_DIR_NAME));
    }

    if let Some(config_dir) = dirs::config_dir() {
        dirs_to_check.push(config_dir.join(CONFIG_DIR_NAME));
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    for dir in dirs_to_check {
        for filename in CONFIG_FILE_NAMES {
            let path = dir.join(filename);
            // XDG_CONFIG_HOME is often ~/.config, skip duplicates
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }

    paths
}

/// Parses a configuration from any JSONC reader and validates it.
///
/// # Errors
///
/// Returns `ConfigError::Parse` for malformed JSON and `ConfigError::Invalid`
/// for values that fail validation.
pub fn parse_config(reader: impl Read) -> Result<ObserverConfig, ConfigError> {
    // Strip comments from JSONC before parsing
    let reader = json_comments::StripComments::new(reader);
    let config: ObserverConfig = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}

/// Parses a configuration from a JSONC string.
///
/// # Errors
///
/// See [`parse_config`].
pub fn parse_config_str(source: &str) -> Result<ObserverConfig, ConfigError> {
    parse_config(source.as_bytes())
}

/// Loads the configuration from an explicit path.
///
/// # Errors
///
/// Returns `ConfigError::NotFound` if the file doesn't exist, otherwise the
/// errors of [`parse_config`] or an IO error.
pub fn load_config_from_path(path: &Path) -> Result<ObserverConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound);
    }

    let file = fs::File::open(path)?;
    let config = parse_config(file)?;
    tracing::debug!(path = %path.display(), "loaded observer configuration");
    Ok(config)
}

/// Loads the configuration from the first existing default location.
///
/// # Errors
///
/// Returns `ConfigError::NotFound` if no configuration file exists in any of
/// the expected locations, or the errors of [`load_config_from_path`].
pub fn load_config() -> Result<(ObserverConfig, PathBuf), ConfigError> {
    for path in config_paths() {
        if path.exists() {
            let config = load_config_from_path(&path)?;
            return Ok((config, path));
        }
    }

    Err(ConfigError::NotFound)
}

/// Loads the configuration, falling back to defaults when none is usable.
///
/// A missing file is silent; a broken one is logged and ignored.
#[must_use]
pub fn load_or_default(custom_path: Option<&Path>) -> ObserverConfig {
    let result = custom_path
        .map_or_else(|| load_config().map(|(config, _)| config), load_config_from_path);

    match result {
        Ok(config) => config,
        Err(ConfigError::NotFound) => ObserverConfig::default(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to load configuration, using defaults");
            ObserverConfig::default()
        }
    }
}
