//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TickwireSettings::default()`]
//! 2. If `~/.tickwire/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `TICKWIRE_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tickwire_core::logging::LogFormat;
use tracing::debug;

use crate::errors::Result;
use crate::types::TickwireSettings;

/// Resolve the path to the settings file (`~/.tickwire/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tickwire").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TickwireSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<TickwireSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Read and merge the settings file over defaults, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<TickwireSettings> {
    let defaults = serde_json::to_value(TickwireSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TICKWIRE_*` process environment overrides.
pub fn apply_env_overrides(settings: &mut TickwireSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Invalid values are ignored with a warning and leave the file/default
/// value in place.
pub fn apply_overrides<F>(settings: &mut TickwireSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read_string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let read_u64 = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        parsed
    };

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = read_string("TICKWIRE_ENDPOINT") {
        settings.connection.endpoint = v;
    }
    if let Some(v) = read_u64("TICKWIRE_CONNECT_TIMEOUT_MS", 100, 300_000) {
        settings.connection.connect_timeout_ms = v;
    }
    if let Some(v) = read_u64("TICKWIRE_CALL_TIMEOUT_MS", 100, 600_000) {
        settings.connection.call_timeout_ms = v;
    }
    if let Some(v) = read_u64("TICKWIRE_RECONNECT_INTERVAL_MS", 100, 3_600_000) {
        settings.connection.reconnect_interval_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_string("TICKWIRE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_string("TICKWIRE_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(value = %v, "invalid TICKWIRE_LOG_FORMAT, ignoring"),
        }
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"connection": {"endpoint": "wss://a", "callTimeoutMs": 1}});
        let source = serde_json::json!({"connection": {"callTimeoutMs": 2}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["connection"]["callTimeoutMs"], 2);
        assert_eq!(merged["connection"]["endpoint"], "wss://a");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"streams": [1, 2, 3]});
        let source = serde_json::json!({"streams": [4]});
        assert_eq!(deep_merge(target, source)["streams"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = read_settings_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, TickwireSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"connection": {"endpoint": "ws://127.0.0.1:9000", "reconnectIntervalMs": 250}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.connection.endpoint, "ws://127.0.0.1:9000");
        assert_eq!(settings.connection.reconnect_interval_ms, 250);
        assert_eq!(settings.connection.call_timeout_ms, 15_000);
    }

    #[test]
    fn load_stream_routes_replace_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"routing": {"streams": [{"field": "ohlc", "key": "symbol"}]}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.routing.streams.len(), 1);
        assert_eq!(settings.routing.streams[0].field, "ohlc");
        assert_eq!(settings.routing.id_field, "req_id");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"callTimeoutMs": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = TickwireSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("TICKWIRE_ENDPOINT", "ws://localhost:1234"),
                ("TICKWIRE_CALL_TIMEOUT_MS", "10000"),
                ("TICKWIRE_RECONNECT_INTERVAL_MS", "1000"),
                ("TICKWIRE_CONNECT_TIMEOUT_MS", "2000"),
                ("TICKWIRE_LOG_LEVEL", "debug"),
                ("TICKWIRE_LOG_FORMAT", "json"),
            ]),
        );
        assert_eq!(settings.connection.endpoint, "ws://localhost:1234");
        assert_eq!(settings.connection.call_timeout_ms, 10_000);
        assert_eq!(settings.connection.reconnect_interval_ms, 1_000);
        assert_eq!(settings.connection.connect_timeout_ms, 2_000);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = TickwireSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("TICKWIRE_ENDPOINT", ""),
                ("TICKWIRE_CALL_TIMEOUT_MS", "soon"),
                ("TICKWIRE_RECONNECT_INTERVAL_MS", "5"),
                ("TICKWIRE_LOG_FORMAT", "xml"),
            ]),
        );
        assert_eq!(settings, TickwireSettings::default());
    }

    // ── parse_u64_range ─────────────────────────────────────────────

    #[test]
    fn parse_u64_valid() {
        assert_eq!(parse_u64_range("30000", 1000, 600_000), Some(30_000));
        assert_eq!(parse_u64_range(" 1000 ", 1000, 600_000), Some(1000));
    }

    #[test]
    fn parse_u64_out_of_range() {
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("700000", 1000, 600_000), None);
    }

    #[test]
    fn parse_u64_invalid() {
        assert_eq!(parse_u64_range("abc", 1000, 600_000), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }
}
