// src/error.rs
//! Error taxonomy of the monitoring pipeline.
//!
//! Only [`StoreError`] is fatal for a run; fetch and notify failures are
//! absorbed by the orchestrator and logged with their context.

use std::path::PathBuf;
use std::time::Duration;

/// Failure of one `(keyword, source)` search.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("search timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no adapter registered for source `{0}`")]
    UnknownSource(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Parse(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Content Store failure. Aborts the persistence steps of a run.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error on {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("record {path} is for date {found}, expected {expected}")]
    InvalidRecord {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serde(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Serialize {
            path: path.into(),
            source,
        }
    }
}

/// Notification delivery failure. Logged, never escalated.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier misconfigured: {0}")]
    Config(String),

    #[error("could not build message: {0}")]
    Build(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("webhook returned an error: {0}")]
    Http(String),

    #[error("all notifiers failed: {0}")]
    AllFailed(String),
}

/// Configuration problem, detected before the affected side effect.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(String),
}
