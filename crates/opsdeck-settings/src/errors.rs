//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why the settings could not be loaded. The CLI exits with the setup-failure
/// code on any of these, before a stream is opened.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not JSON, or does not fit the settings shape.
    #[error("malformed settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// A merged value the stream transport cannot work with.
    #[error("invalid {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

impl SettingsError {
    /// The camelCase settings key at fault, for value errors.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
