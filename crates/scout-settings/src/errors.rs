//! Settings file failures. Each names the file it came from so the binary
//! can point the operator at it.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("settings file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// Valid JSON whose values do not fit the settings schema.
    #[error("settings file {} does not match the settings schema: {source}", path.display())]
    Schema {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("settings file {}: {key} = {value} is outside {min}..={max}", path.display())]
    OutOfRange {
        path: PathBuf,
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

impl SettingsError {
    pub fn path(&self) -> &Path {
        match self {
            Self::Read { path, .. }
            | Self::Parse { path, .. }
            | Self::Schema { path, .. }
            | Self::OutOfRange { path, .. } => path,
        }
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;
