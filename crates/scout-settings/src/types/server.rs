//! Server, storage and logging settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP port. `0` picks an ephemeral port.
    pub port: u16,
    /// Interval between SSE keep-alive comments in seconds.
    pub stream_keepalive_secs: u64,
    /// How often closed-but-undrained session queues are swept, in seconds.
    pub sweep_interval_secs: u64,
    /// How long a closed queue waits for a late subscriber, in seconds.
    pub closed_session_ttl_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            stream_keepalive_secs: 15,
            sweep_interval_secs: 60,
            closed_session_ttl_secs: 600,
        }
    }
}

/// Database locations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Data directory. Relative paths resolve against the home directory.
    pub data_dir: String,
    /// Workspace and knowledge database file name inside `data_dir`.
    pub database_file: String,
    /// Persisted warning log file name inside `data_dir`.
    pub log_database_file: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: ".scout".to_string(),
            database_file: "scout.db".to_string(),
            log_database_file: "scout-logs.db".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn data_dir_path(&self) -> PathBuf {
        let dir = PathBuf::from(&self.data_dir);
        if dir.is_absolute() {
            dir
        } else {
            home_dir().join(dir)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir_path().join(&self.database_file)
    }

    pub fn log_database_path(&self) -> PathBuf {
        self.data_dir_path().join(&self.log_database_file)
    }
}

pub(crate) fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Log level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level. `RUST_LOG` takes precedence when set.
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Persist WARN and above to the log database.
    pub persist_warnings: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: true,
            persist_warnings: true,
        }
    }
}
