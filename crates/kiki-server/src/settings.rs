//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `KIKI_*` environment variable overrides
//! 4. Validate the merged server settings against their accepted ranges
//!
//! Command-line flags are applied by the binary on top of the result.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{
    HEARTBEAT_INTERVAL_RANGE, HEARTBEAT_TIMEOUT_RANGE, MAX_CONNECTIONS_RANGE,
    MAX_MESSAGE_SIZE_RANGE, SEND_QUEUE_RANGE, ServerConfig,
};
use crate::error::SettingsError;

/// Top-level settings file contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Listener and connection settings.
    pub server: ServerConfig,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            log_level: "info".into(),
        }
    }
}

/// Resolve the default settings file path (`~/.kiki/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".kiki").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON, or one that sets
/// a server value outside its accepted range, is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings, SettingsError> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    settings.server.validate()?;
    Ok(settings)
}

fn load_file(path: &Path) -> Result<Settings, SettingsError> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        if !user.is_object() {
            return Err(SettingsError::InvalidValue(
                "settings file must contain a JSON object".into(),
            ));
        }
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `KIKI_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid or out-of-range values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let server = &mut settings.server;
    if let Some(v) = read_string(&lookup, "KIKI_HOST") {
        server.host = v;
    }
    if let Some(v) = read_parsed(&lookup, "KIKI_PORT", |s| s.parse::<u16>().ok()) {
        server.port = v;
    }
    if let Some(v) = read_parsed(&lookup, "KIKI_MAX_CONNECTIONS", |s| {
        parse_usize_range(s, *MAX_CONNECTIONS_RANGE.start(), *MAX_CONNECTIONS_RANGE.end())
    }) {
        server.max_connections = v;
    }
    if let Some(v) = read_parsed(&lookup, "KIKI_SEND_QUEUE", |s| {
        parse_usize_range(s, *SEND_QUEUE_RANGE.start(), *SEND_QUEUE_RANGE.end())
    }) {
        server.send_queue_capacity = v;
    }
    if let Some(v) = read_parsed(&lookup, "KIKI_HEARTBEAT_INTERVAL", |s| {
        parse_u64_range(s, *HEARTBEAT_INTERVAL_RANGE.start(), *HEARTBEAT_INTERVAL_RANGE.end())
    }) {
        server.heartbeat_interval_secs = v;
    }
    if let Some(v) = read_parsed(&lookup, "KIKI_HEARTBEAT_TIMEOUT", |s| {
        parse_u64_range(s, *HEARTBEAT_TIMEOUT_RANGE.start(), *HEARTBEAT_TIMEOUT_RANGE.end())
    }) {
        server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = read_parsed(&lookup, "KIKI_MAX_MESSAGE_SIZE", |s| {
        parse_usize_range(s, *MAX_MESSAGE_SIZE_RANGE.start(), *MAX_MESSAGE_SIZE_RANGE.end())
    }) {
        server.max_message_size = v;
    }
    if let Some(v) = read_string(&lookup, "KIKI_LOG_LEVEL") {
        settings.log_level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_string<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.is_empty())
}

fn read_parsed<F, T>(lookup: &F, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(name)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}
