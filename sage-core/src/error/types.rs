//! Operational error type for the Sage core itself
//!
//! [`SageError`] reports failures of the diagnostics machinery (bad
//! configuration, unreadable files, lifecycle misuse). Errors raised by the
//! application being diagnosed are [`AppError`](super::AppError)s instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SageError {
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("No active learning session")]
    NoActiveSession,

    #[error("{component} is already running")]
    AlreadyRunning { component: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SageError {
    /// Create a configuration error with component and message
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        SageError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        SageError::InvalidPattern {
            pattern: pattern.into(),
            source,
        }
    }
}

pub type SageResult<T> = std::result::Result<T, SageError>;
