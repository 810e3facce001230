//! Config file discovery, loading, and environment variable overlay.

use crate::{BindConfig, CollabConfig, ConfigError, LockConfig, PresenceConfig, SessionConfig, TelemetryConfig, ThrottleConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order).
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values.
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only returns files
/// that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/collab/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("collab/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("collab.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<CollabConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<CollabConfig, ConfigError> {
    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let mut config = CollabConfig::default();

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("http_port").and_then(|v| v.as_integer()) {
            config.bind.http_port = v as u16;
        }
        if let Some(v) = bind.get("host").and_then(|v| v.as_str()) {
            config.bind.host = v.to_string();
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    if let Some(lock) = table.get("lock").and_then(|v| v.as_table()) {
        if let Some(v) = lock.get("lease_ttl_secs").and_then(|v| v.as_integer()) {
            config.lock.lease_ttl_secs = v as u64;
        }
        if let Some(v) = lock.get("max_duration_secs").and_then(|v| v.as_integer()) {
            config.lock.max_duration_secs = v as u64;
        }
        if let Some(v) = lock.get("sweep_interval_secs").and_then(|v| v.as_integer()) {
            config.lock.sweep_interval_secs = v as u64;
        }
    }

    if let Some(throttle) = table.get("throttle").and_then(|v| v.as_table()) {
        if let Some(v) = throttle.get("interval_ms").and_then(|v| v.as_integer()) {
            config.throttle.interval_ms = v as u64;
        }
        if let Some(v) = throttle.get("max_flush_per_sec").and_then(|v| v.as_integer()) {
            config.throttle.max_flush_per_sec = v as u32;
        }
        if let Some(v) = throttle.get("max_pending_changes").and_then(|v| v.as_integer()) {
            config.throttle.max_pending_changes = v as usize;
        }
        if let Some(v) = throttle.get("idle_reap_secs").and_then(|v| v.as_integer()) {
            config.throttle.idle_reap_secs = v as u64;
        }
    }

    if let Some(session) = table.get("session").and_then(|v| v.as_table()) {
        if let Some(v) = session.get("event_id_history").and_then(|v| v.as_integer()) {
            config.session.event_id_history = v as usize;
        }
        if let Some(v) = session
            .get("idle_connection_secs")
            .and_then(|v| v.as_integer())
        {
            config.session.idle_connection_secs = v as u64;
        }
        if let Some(v) = session.get("outbound_queue").and_then(|v| v.as_integer()) {
            config.session.outbound_queue = v as usize;
        }
    }

    if let Some(presence) = table.get("presence").and_then(|v| v.as_table()) {
        if let Some(v) = presence.get("stale_secs").and_then(|v| v.as_integer()) {
            config.presence.stale_secs = v as u64;
        }
        if let Some(v) = presence
            .get("sweep_interval_secs")
            .and_then(|v| v.as_integer())
        {
            config.presence.sweep_interval_secs = v as u64;
        }
    }

    if let Some(palette) = table.get("color_palette").and_then(|v| v.as_array()) {
        let colors: Vec<String> = palette
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect();
        if !colors.is_empty() {
            config.color_palette = colors;
        }
    }

    Ok(config)
}

/// Merge two configs, with `overlay` taking precedence field by field.
pub fn merge_configs(base: CollabConfig, overlay: CollabConfig) -> CollabConfig {
    let default = CollabConfig::default();
    CollabConfig {
        bind: BindConfig {
            http_port: pick(overlay.bind.http_port, base.bind.http_port, default.bind.http_port),
            host: pick(overlay.bind.host, base.bind.host, default.bind.host),
        },
        telemetry: TelemetryConfig {
            log_level: pick(
                overlay.telemetry.log_level,
                base.telemetry.log_level,
                default.telemetry.log_level,
            ),
        },
        lock: LockConfig {
            lease_ttl_secs: pick(overlay.lock.lease_ttl_secs, base.lock.lease_ttl_secs, default.lock.lease_ttl_secs),
            max_duration_secs: pick(
                overlay.lock.max_duration_secs,
                base.lock.max_duration_secs,
                default.lock.max_duration_secs,
            ),
            sweep_interval_secs: pick(
                overlay.lock.sweep_interval_secs,
                base.lock.sweep_interval_secs,
                default.lock.sweep_interval_secs,
            ),
        },
        throttle: ThrottleConfig {
            interval_ms: pick(overlay.throttle.interval_ms, base.throttle.interval_ms, default.throttle.interval_ms),
            max_flush_per_sec: pick(
                overlay.throttle.max_flush_per_sec,
                base.throttle.max_flush_per_sec,
                default.throttle.max_flush_per_sec,
            ),
            max_pending_changes: pick(
                overlay.throttle.max_pending_changes,
                base.throttle.max_pending_changes,
                default.throttle.max_pending_changes,
            ),
            idle_reap_secs: pick(
                overlay.throttle.idle_reap_secs,
                base.throttle.idle_reap_secs,
                default.throttle.idle_reap_secs,
            ),
        },
        session: SessionConfig {
            event_id_history: pick(
                overlay.session.event_id_history,
                base.session.event_id_history,
                default.session.event_id_history,
            ),
            idle_connection_secs: pick(
                overlay.session.idle_connection_secs,
                base.session.idle_connection_secs,
                default.session.idle_connection_secs,
            ),
            outbound_queue: pick(
                overlay.session.outbound_queue,
                base.session.outbound_queue,
                default.session.outbound_queue,
            ),
        },
        presence: PresenceConfig {
            stale_secs: pick(overlay.presence.stale_secs, base.presence.stale_secs, default.presence.stale_secs),
            sweep_interval_secs: pick(
                overlay.presence.sweep_interval_secs,
                base.presence.sweep_interval_secs,
                default.presence.sweep_interval_secs,
            ),
        },
        color_palette: if overlay.color_palette != default.color_palette {
            overlay.color_palette
        } else {
            base.color_palette
        },
    }
}

/// Pick `overlay` if it differs from the compiled default, else `base`.
fn pick<T: PartialEq>(overlay: T, base: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut CollabConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("COLLAB_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.bind.http_port = port;
            sources.env_overrides.push("COLLAB_HTTP_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("COLLAB_HOST") {
        config.bind.host = v;
        sources.env_overrides.push("COLLAB_HOST".to_string());
    }
    if let Ok(v) = env::var("COLLAB_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("COLLAB_LOG_LEVEL".to_string());
    }
    // Also honor the conventional RUST_LOG if COLLAB_LOG_LEVEL is unset.
    if !sources.env_overrides.iter().any(|v| v == "COLLAB_LOG_LEVEL") {
        if let Ok(v) = env::var("RUST_LOG") {
            config.telemetry.log_level = v;
            sources.env_overrides.push("RUST_LOG".to_string());
        }
    }
    if let Ok(v) = env::var("COLLAB_LEASE_TTL_SECS") {
        if let Ok(n) = v.parse() {
            config.lock.lease_ttl_secs = n;
            sources.env_overrides.push("COLLAB_LEASE_TTL_SECS".to_string());
        }
    }
    if let Ok(v) = env::var("COLLAB_MAX_LOCK_DURATION_SECS") {
        if let Ok(n) = v.parse() {
            config.lock.max_duration_secs = n;
            sources
                .env_overrides
                .push("COLLAB_MAX_LOCK_DURATION_SECS".to_string());
        }
    }
    if let Ok(v) = env::var("COLLAB_THROTTLE_INTERVAL_MS") {
        if let Ok(n) = v.parse() {
            config.throttle.interval_ms = n;
            sources
                .env_overrides
                .push("COLLAB_THROTTLE_INTERVAL_MS".to_string());
        }
    }
    if let Ok(v) = env::var("COLLAB_MAX_FLUSH_PER_SEC") {
        if let Ok(n) = v.parse() {
            config.throttle.max_flush_per_sec = n;
            sources
                .env_overrides
                .push("COLLAB_MAX_FLUSH_PER_SEC".to_string());
        }
    }
    if let Ok(v) = env::var("COLLAB_EVENT_ID_HISTORY") {
        if let Ok(n) = v.parse() {
            config.session.event_id_history = n;
            sources
                .env_overrides
                .push("COLLAB_EVENT_ID_HISTORY".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic.
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[bind]
http_port = 9100
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.bind.http_port, 9100);
        // Other values should be defaults.
        assert_eq!(config.lock.lease_ttl_secs, 15);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[bind]
http_port = 9000
host = "127.0.0.1"

[telemetry]
log_level = "debug"

[lock]
lease_ttl_secs = 20
max_duration_secs = 600

[throttle]
interval_ms = 50
max_flush_per_sec = 20

[session]
event_id_history = 5000

[presence]
stale_secs = 60

color_palette = ["#111111", "#222222"]
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.bind.http_port, 9000);
        assert_eq!(config.bind.host, "127.0.0.1");
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.lock.lease_ttl_secs, 20);
        assert_eq!(config.lock.max_duration_secs, 600);
        assert_eq!(config.throttle.interval_ms, 50);
        assert_eq!(config.throttle.max_flush_per_sec, 20);
        assert_eq!(config.session.event_id_history, 5000);
        assert_eq!(config.presence.stale_secs, 60);
        assert_eq!(config.color_palette, vec!["#111111", "#222222"]);
    }

    #[test]
    fn test_merge_prefers_overlay_when_nondefault() {
        let mut base = CollabConfig::default();
        base.bind.http_port = 7000;

        let mut overlay = CollabConfig::default();
        overlay.telemetry.log_level = "trace".to_string();

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.bind.http_port, 7000);
        assert_eq!(merged.telemetry.log_level, "trace");
    }
}
