//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ScoutSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `SCOUT_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{home_dir, LogLevel, ScoutSettings, SearchProvider};

/// Resolve the path to the settings file (`~/.scout/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".scout").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ScoutSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ScoutSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<ScoutSettings> {
    if !path.exists() {
        debug!(?path, "settings file not found, using defaults");
        return Ok(ScoutSettings::default());
    }
    debug!(?path, "loading settings from file");

    let schema_error = |source| SettingsError::Schema {
        path: path.to_path_buf(),
        source,
    };
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let defaults = serde_json::to_value(ScoutSettings::default()).map_err(schema_error)?;
    let settings: ScoutSettings =
        serde_json::from_value(deep_merge(defaults, user)).map_err(schema_error)?;

    check_ranges(path, &settings)?;
    Ok(settings)
}

/// File values get the same bounds the `SCOUT_*` overrides enforce, but a
/// violation is an error rather than a warning.
fn check_ranges(path: &Path, settings: &ScoutSettings) -> Result<()> {
    let checks: [(&'static str, u64, u64, u64); 4] = [
        ("retry.maxAttempts", u64::from(settings.retry.max_attempts), 1, 10),
        (
            "orchestration.maxConcurrentDomains",
            settings.orchestration.max_concurrent_domains as u64,
            1,
            64,
        ),
        ("orchestration.toolTimeoutMs", settings.orchestration.tool_timeout_ms, 100, 600_000),
        ("server.closedSessionTtlSecs", settings.server.closed_session_ttl_secs, 1, 86_400),
    ];
    match checks.into_iter().find(|&(_, v, min, max)| v < min || v > max) {
        Some((key, value, min, max)) => Err(SettingsError::OutOfRange {
            path: path.to_path_buf(),
            key,
            value,
            min,
            max,
        }),
        None => Ok(()),
    }
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
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut ScoutSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning, leaving the file/default value.
pub fn apply_overrides_from<F>(settings: &mut ScoutSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SCOUT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.ranged("SCOUT_PORT", 0u16, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.ranged("SCOUT_CLOSED_SESSION_TTL_SECS", 1u64, 86_400) {
        settings.server.closed_session_ttl_secs = v;
    }

    // ── Orchestration ───────────────────────────────────────────────
    if let Some(v) = env.ranged("SCOUT_MAX_CONCURRENT_DOMAINS", 1usize, 64) {
        settings.orchestration.max_concurrent_domains = v;
    }
    if let Some(v) = env.ranged("SCOUT_TOOL_TIMEOUT_MS", 100u64, 600_000) {
        settings.orchestration.tool_timeout_ms = v;
    }
    if let Some(v) = env.ranged("SCOUT_MAX_ATTEMPTS", 1u32, 10) {
        settings.retry.max_attempts = v;
    }

    // ── Search ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SCOUT_SEARCH_PROVIDER") {
        match serde_json::from_value::<SearchProvider>(Value::String(v.clone())) {
            Ok(provider) => settings.search.provider = provider,
            Err(_) => tracing::warn!(key = "SCOUT_SEARCH_PROVIDER", value = %v, "unknown search provider, ignoring"),
        }
    }

    // ── Storage & logging ───────────────────────────────────────────
    if let Some(v) = env.string("SCOUT_DATA_DIR") {
        settings.storage.data_dir = v;
    }
    if let Some(v) = env.string("SCOUT_LOG_LEVEL") {
        match serde_json::from_value::<LogLevel>(Value::String(v.to_lowercase())) {
            Ok(level) => settings.logging.level = level,
            Err(_) => tracing::warn!(key = "SCOUT_LOG_LEVEL", value = %v, "invalid log level, ignoring"),
        }
    }
    if let Some(v) = env.boolean("SCOUT_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a number within an inclusive range.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn boolean(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let val = (self.lookup)(name)?;
        let result = parse_in_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "out-of-range env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8000, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, ScoutSettings::default().server.port);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"orchestration": {"maxConcurrentDomains": 4}, "retry": {"maxAttempts": 5}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.orchestration.max_concurrent_domains, 4);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.orchestration.tool_timeout_ms, 30_000);
        assert_eq!(settings.retry.base_delay_ms, 2_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let err = load_file_layer(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert_eq!(err.path(), path);
    }

    #[test]
    fn load_wrong_types_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();

        let err = load_file_layer(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Schema { .. }));
    }

    #[test]
    fn load_out_of_range_file_value_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"orchestration": {"maxConcurrentDomains": 0}}"#).unwrap();

        let err = load_file_layer(&path).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::OutOfRange {
                key: "orchestration.maxConcurrentDomains",
                value: 0,
                ..
            }
        ));
    }

    #[test]
    fn unreadable_path_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory exists but cannot be read as a file.
        let err = load_file_layer(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = ScoutSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup_from(&[
                ("SCOUT_PORT", "9191"),
                ("SCOUT_MAX_CONCURRENT_DOMAINS", "3"),
                ("SCOUT_SEARCH_PROVIDER", "brave"),
                ("SCOUT_LOG_LEVEL", "DEBUG"),
                ("SCOUT_LOG_JSON", "off"),
                ("SCOUT_DATA_DIR", "/srv/scout"),
            ]),
        );
        assert_eq!(settings.server.port, 9191);
        assert_eq!(settings.orchestration.max_concurrent_domains, 3);
        assert_eq!(settings.search.provider, SearchProvider::Brave);
        assert_eq!(settings.logging.level, LogLevel::Debug);
        assert!(!settings.logging.json);
        assert_eq!(settings.storage.data_dir, "/srv/scout");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = ScoutSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup_from(&[
                ("SCOUT_MAX_ATTEMPTS", "0"),
                ("SCOUT_MAX_CONCURRENT_DOMAINS", "many"),
                ("SCOUT_SEARCH_PROVIDER", "bing"),
                ("SCOUT_LOG_JSON", "maybe"),
                ("SCOUT_HOST", ""),
            ]),
        );
        let defaults = ScoutSettings::default();
        assert_eq!(settings.retry.max_attempts, defaults.retry.max_attempts);
        assert_eq!(
            settings.orchestration.max_concurrent_domains,
            defaults.orchestration.max_concurrent_domains
        );
        assert_eq!(settings.search.provider, defaults.search.provider);
        assert_eq!(settings.logging.json, defaults.logging.json);
        assert_eq!(settings.server.host, defaults.server.host);
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "Yes"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "OFF"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_in_range_bounds() {
        assert_eq!(parse_in_range("9090", 1u16, 65535), Some(9090));
        assert_eq!(parse_in_range("0", 1u16, 65535), None);
        assert_eq!(parse_in_range("99999", 1u16, 65535), None);
        assert_eq!(parse_in_range("500", 1000u64, 600_000), None);
        assert_eq!(parse_in_range("abc", 1000u64, 600_000), None);
        assert_eq!(parse_in_range(" 12 ", 1usize, 64), Some(12));
    }
}
