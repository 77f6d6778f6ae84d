//! Logging setup for scout binaries.
//!
//! Console output goes through `tracing-subscriber` (JSON lines or a
//! human-readable format), filtered by `RUST_LOG` or the configured level.
//! WARN and above are additionally persisted to a SQLite log database.

mod logging;

pub use logging::{DomainWarnings, LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use scout_settings::ScoutSettings;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "scout_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout instead of the pretty formatter.
    pub json: bool,
    /// Whether to persist warn+ logs to SQLite.
    pub log_to_sqlite: bool,
    /// Path to the log database.
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_settings(&ScoutSettings::default())
    }
}

impl TelemetryConfig {
    pub fn from_settings(settings: &ScoutSettings) -> Self {
        Self {
            log_level: parse_level(settings.logging.level.as_filter_str()),
            module_levels: Vec::new(),
            json: settings.logging.json,
            log_to_sqlite: settings.logging.persist_warnings,
            log_db_path: settings.storage.log_database_path(),
        }
    }

    fn filter_directive(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
        }
        filter
    }
}

fn parse_level(s: &str) -> Level {
    s.parse().unwrap_or(Level::INFO)
}

/// Keeps the log sink reachable for the life of the process.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// Wrap an already opened sink without installing a subscriber.
    pub fn from_sink(sink: Arc<SqliteLogSink>) -> Self {
        Self {
            log_sink: Some(sink),
        }
    }

    /// Access the log sink for querying persisted logs.
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
///
/// A second call leaves the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let (json_layer, pretty_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter);
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(env_filter);
        (None, Some(layer))
    };

    let (sqlite_layer, sqlite_sink) = if config.log_to_sqlite {
        match SqliteLogSink::new(&config.log_db_path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                (Some(SqliteLogLayer::new(sink.clone())), Some(sink))
            }
            Err(e) => {
                eprintln!("scout-telemetry: failed to open log DB: {e}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(pretty_layer)
        .with(sqlite_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("scout-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        log_sink: sqlite_sink,
    }
}
