//! Error taxonomy and non-fatal warnings.
//!
//! Hard failures surface as [`EngineError`]. Anything that only invalidates
//! one unit of input (one metric kind for one tick, one file in a scan, one
//! battery reading, one config value) is downgraded to a [`Warning`] and
//! carried alongside the partial result.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sample::MetricKind;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A metric source failed or timed out for this tick.
    #[error("metric {kind} unavailable: {reason}")]
    MetricUnavailable { kind: MetricKind, reason: String },

    /// Too few data points to compute a score or forecast.
    #[error("insufficient history: need {required}, found {found}")]
    InsufficientHistory { required: usize, found: usize },

    /// A file could not be read for hashing.
    #[error("failed to hash {}: {source}", path.display())]
    HashIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration value out of range or not normalizable.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The operation was aborted between units of work.
    #[error("operation cancelled")]
    Cancelled,

    /// A daily story for this date has already been written.
    #[error("daily story for {date} already written")]
    StoryExists { date: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    ConfigWrite(#[from] toml::ser::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Category of a non-fatal problem absorbed during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    MetricUnavailable,
    HashIo,
    ConfigInvalid,
    SkippedReading,
}

/// A non-fatal problem reported next to a partial result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&EngineError> for Warning {
    fn from(err: &EngineError) -> Self {
        let kind = match err {
            EngineError::MetricUnavailable { .. } => WarningKind::MetricUnavailable,
            EngineError::HashIo { .. } | EngineError::Io(_) => WarningKind::HashIo,
            EngineError::ConfigInvalid(_)
            | EngineError::ConfigParse(_)
            | EngineError::ConfigWrite(_) => WarningKind::ConfigInvalid,
            _ => WarningKind::SkippedReading,
        };
        Self::new(kind, err.to_string())
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
