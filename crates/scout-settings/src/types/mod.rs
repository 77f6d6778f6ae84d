//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file may specify any subset of fields and the rest keep their
//! compiled defaults.

mod orchestration;
mod server;

pub use orchestration::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 8000 },
///   "orchestration": { "maxConcurrentDomains": 4 },
///   "retry": { "maxAttempts": 5 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoutSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Task graph execution settings.
    pub orchestration: OrchestrationSettings,
    /// Retry policy for research tool calls.
    pub retry: RetrySettings,
    /// Research tool selection.
    pub search: SearchSettings,
    /// Database locations.
    pub storage: StorageSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ScoutSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "scout".to_string(),
            server: ServerSettings::default(),
            orchestration: OrchestrationSettings::default(),
            retry: RetrySettings::default(),
            search: SearchSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Retry policy for research tool calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Total attempts per tool call, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling for the exponential delay in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0–1.0) applied to retry delays.
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 10_000,
            jitter_factor: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_version() {
        let s = ScoutSettings::default();
        assert_eq!(s.version, "0.1.0");
        assert_eq!(s.name, "scout");
    }

    #[test]
    fn default_settings_serde_roundtrip() {
        let defaults = ScoutSettings::default();
        let json = serde_json::to_string(&defaults).unwrap();
        let back: ScoutSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.server.port, defaults.server.port);
        assert_eq!(back.retry.max_attempts, defaults.retry.max_attempts);
        assert_eq!(back.search.provider, defaults.search.provider);
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let json = serde_json::to_value(ScoutSettings::default()).unwrap();
        assert!(json["orchestration"].get("maxConcurrentDomains").is_some());
        assert!(json["orchestration"].get("toolTimeoutMs").is_some());
        assert!(json["retry"].get("baseDelayMs").is_some());
        assert!(json["server"].get("streamKeepaliveSecs").is_some());
    }

    #[test]
    fn partial_json_overrides() {
        let json = serde_json::json!({
            "server": { "port": 9090 },
            "retry": { "maxAttempts": 5 }
        });
        let settings: ScoutSettings = serde_json::from_value(json).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.retry.base_delay_ms, 2_000);
    }

    #[test]
    fn retry_defaults() {
        let r = RetrySettings::default();
        assert_eq!(r.max_attempts, 3);
        assert_eq!(r.base_delay_ms, 2_000);
        assert_eq!(r.max_delay_ms, 10_000);
        assert!(r.jitter_factor.abs() < f64::EPSILON);
    }
}
