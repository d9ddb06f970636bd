//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MockpilotSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `MOCKPILOT_*` environment overrides (highest priority)
//! 4. [`MockpilotSettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use mockpilot_core::logging::LogFormat;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::MockpilotSettings;

/// Resolve the default settings path (`~/.mockpilot/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".mockpilot").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MockpilotSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a present but invalid file is an error.
pub fn load_settings_from_path(path: &Path) -> Result<MockpilotSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<MockpilotSettings> {
    let defaults = serde_json::to_value(MockpilotSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        if !user.is_object() {
            return Err(SettingsError::NotAnObject(json_type_name(&user)));
        }
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (file/default value stays).
pub fn apply_env_overrides(settings: &mut MockpilotSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("MOCKPILOT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("MOCKPILOT_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_u64("MOCKPILOT_WS_PING_INTERVAL_MS", 1000, 600_000) {
        settings.server.ws_ping_interval_ms = v;
    }
    if let Some(v) = read_env_u64("MOCKPILOT_DRAIN_GRACE_MS", 0, 600_000) {
        settings.server.drain_grace_ms = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("MOCKPILOT_SESSION_TTL_MS", 1000, 86_400_000) {
        settings.hub.session_ttl_ms = v;
    }
    if let Some(v) = read_env_usize("MOCKPILOT_QUEUE_MAX_MESSAGES", 2, 1_000_000) {
        settings.hub.queue_max_messages = v;
    }
    if let Some(v) = read_env_u64("MOCKPILOT_LIVENESS_INTERVAL_MS", 100, 3_600_000) {
        settings.hub.liveness_interval_ms = v;
    }

    // ── Trigger ─────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("MOCKPILOT_DEBOUNCE_HORIZON_MS", 1, 600_000) {
        settings.trigger.horizon_ms = v;
    }
    if let Some(v) = read_env_u64("MOCKPILOT_SILENCE_THRESHOLD_MS", 0, 600_000) {
        settings.trigger.silence_threshold_ms = v;
    }
    if let Some(v) = read_env_f64("MOCKPILOT_CONFIDENCE_THRESHOLD", 0.0, 1.0) {
        settings.trigger.confidence_threshold = v;
    }
    if let Some(v) = read_env_usize("MOCKPILOT_TRIGGER_SHARDS", 1, 1024) {
        settings.trigger.shards = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("MOCKPILOT_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("MOCKPILOT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("MOCKPILOT_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(f) => settings.logging.format = f,
            None => tracing::warn!(key = "MOCKPILOT_LOG_FORMAT", value = %v, "invalid log format env var, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

/// Parse `compact` / `json` (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.trim().to_lowercase().as_str() {
        "compact" | "text" | "pretty" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    let val = std::env::var(name).ok()?;
    let result = parse_f64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid f64 env var, ignoring");
    }
    result
}
