//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`OpsdeckSettings::default()`]
//! 2. If `~/.opsdeck/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `OPSDECK_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::OpsdeckSettings;

/// Accepted `stream.connectTimeoutMs`.
pub const CONNECT_TIMEOUT_MS_RANGE: RangeInclusive<u64> = 100..=600_000;
/// Accepted `stream.idleTimeoutMs`; 0 disables the idle timeout.
pub const IDLE_TIMEOUT_MS_RANGE: RangeInclusive<u64> = 0..=86_400_000;
/// Accepted `stream.channelCapacity`.
pub const CHANNEL_CAPACITY_RANGE: RangeInclusive<u64> = 1..=65_536;

/// Resolve the path to the settings file (`~/.opsdeck/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".opsdeck").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<OpsdeckSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid value is an error.
pub fn load_settings_from_path(path: &Path) -> Result<OpsdeckSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<OpsdeckSettings> {
    let parse_err = |source: serde_json::Error| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let defaults = serde_json::to_value(OpsdeckSettings::default()).map_err(parse_err)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(parse_err)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    serde_json::from_value(merged).map_err(parse_err)
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

/// Apply `OPSDECK_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut OpsdeckSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from any key lookup. Invalid values are logged and
/// ignored (the file/default value stays).
pub fn apply_overrides_from<F>(settings: &mut OpsdeckSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("OPSDECK_BASE_URL") {
        settings.server.base_url = v;
    }
    if let Some(v) = read("OPSDECK_CONNECT_TIMEOUT_MS") {
        match parse_in(&v, &CONNECT_TIMEOUT_MS_RANGE) {
            Some(n) => settings.stream.connect_timeout_ms = n,
            None => warn_invalid("OPSDECK_CONNECT_TIMEOUT_MS", &v),
        }
    }
    if let Some(v) = read("OPSDECK_IDLE_TIMEOUT_MS") {
        match parse_in(&v, &IDLE_TIMEOUT_MS_RANGE) {
            Some(n) => settings.stream.idle_timeout_ms = n,
            None => warn_invalid("OPSDECK_IDLE_TIMEOUT_MS", &v),
        }
    }
    if let Some(v) = read("OPSDECK_CHANNEL_CAPACITY") {
        match parse_in(&v, &CHANNEL_CAPACITY_RANGE) {
            Some(n) => settings.stream.channel_capacity = n as usize,
            None => warn_invalid("OPSDECK_CHANNEL_CAPACITY", &v),
        }
    }
    if let Some(v) = read("OPSDECK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("OPSDECK_JSON_LOGS") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn_invalid("OPSDECK_JSON_LOGS", &v),
        }
    }
}

/// Reject values no transport could work with. Applies to the merged result,
/// so a bad file value fails the same way a bad flag does.
pub fn validate(settings: &OpsdeckSettings) -> Result<()> {
    let base = &settings.server.base_url;
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(SettingsError::InvalidValue {
            key: "server.baseUrl",
            reason: format!("must start with http:// or https://, got {base:?}"),
        });
    }
    let stream = &settings.stream;
    check_range("stream.connectTimeoutMs", stream.connect_timeout_ms, &CONNECT_TIMEOUT_MS_RANGE)?;
    check_range("stream.idleTimeoutMs", stream.idle_timeout_ms, &IDLE_TIMEOUT_MS_RANGE)?;
    check_range(
        "stream.channelCapacity",
        u64::try_from(stream.channel_capacity).unwrap_or(u64::MAX),
        &CHANNEL_CAPACITY_RANGE,
    )?;
    Ok(())
}

fn check_range(key: &'static str, value: u64, range: &RangeInclusive<u64>) -> Result<()> {
    if range.contains(&value) {
        return Ok(());
    }
    Err(SettingsError::InvalidValue {
        key,
        reason: format!(
            "must be within {}..={}, got {value}",
            range.start(),
            range.end()
        ),
    })
}

fn parse_in(val: &str, range: &RangeInclusive<u64>) -> Option<u64> {
    parse_u64_range(val, *range.start(), *range.end())
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn warn_invalid(key: &str, value: &str) {
    tracing::warn!(key, value, "invalid env var, ignoring");
}
