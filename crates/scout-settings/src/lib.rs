//! # scout-settings
//!
//! Layered configuration for the scout research orchestrator.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`ScoutSettings::default()`])
//! 2. **User file** `~/.scout/settings.json`, deep-merged over defaults
//! 3. **Environment variables** `SCOUT_*` overrides (highest priority)
//!
//! Settings are loaded once at startup and handed to each component
//! explicitly.
//!
//! # Usage
//!
//! ```no_run
//! use scout_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = ScoutSettings::default();
        assert!(settings_path().ends_with(".scout/settings.json"));
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = ScoutSettings::default();
        assert_eq!(settings.version, "0.1.0");
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.orchestration.max_concurrent_domains, 1);
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.search.provider, SearchProvider::Simulated);
        assert_eq!(settings.logging.level, LogLevel::Info);
    }
}
