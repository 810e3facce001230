//! Typed, defaulted, file-and-env-loadable configuration for the
//! collaboration core.
//!
//! Mirrors the loading strategy used elsewhere in this codebase: compiled
//! defaults, overlaid by an optional system file, a user file, a local file
//! (or CLI-specified path), and finally environment variables.

mod infra;
mod limits;
pub mod loader;

pub use infra::{BindConfig, TelemetryConfig};
pub use limits::{default_color_palette, LockConfig, PresenceConfig, SessionConfig, ThrottleConfig};
pub use loader::ConfigSources;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level configuration for the collaboration core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollabConfig {
    #[serde(default)]
    pub bind: BindConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default = "default_color_palette")]
    pub color_palette: Vec<String>,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            bind: BindConfig::default(),
            telemetry: TelemetryConfig::default(),
            lock: LockConfig::default(),
            throttle: ThrottleConfig::default(),
            session: SessionConfig::default(),
            presence: PresenceConfig::default(),
            color_palette: default_color_palette(),
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to serialize config: {0}")]
    Serialize(String),
}

impl CollabConfig {
    /// Load configuration from the standard search path (system, user,
    /// local), overlaid by environment variables. Discards source tracking.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources()?;
        Ok(config)
    }

    /// Load configuration and report which files/env vars contributed.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration, optionally overriding the local config file path
    /// (as would come from a `--config` CLI flag).
    pub fn load_with_sources_from(
        cli_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut config = Self::default();
        let mut sources = ConfigSources::default();

        for path in loader::discover_config_files_with_override(cli_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Load configuration from a single explicit file, ignoring the search
    /// path and environment overrides. Useful for tests.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        loader::load_from_file(path)
    }

    /// Render this config back to TOML, e.g. for `--show-config`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = CollabConfig::default();
        assert_eq!(config.bind.http_port, 8088);
        assert_eq!(config.lock.lease_ttl_secs, 15);
        assert_eq!(config.color_palette.len(), 10);
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = CollabConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed: CollabConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[bind]\nhttp_port = 9999\n").unwrap();

        let config = CollabConfig::load_from(file.path()).unwrap();
        assert_eq!(config.bind.http_port, 9999);
        assert_eq!(config.lock.lease_ttl_secs, 15);
    }

    #[test]
    fn test_missing_file_errors() {
        let result = CollabConfig::load_from(Path::new("/nonexistent/path/collab.toml"));
        assert!(result.is_err());
    }
}
