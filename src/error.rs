//! Error types for the analysis core and its collaborators

use std::time::Duration;
use thiserror::Error;

/// Failure of an external collaborator (market data, calendar, participant flow).
///
/// The core never retries these; they are handed back to the caller unchanged.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ProviderError {
    /// Whether a caller-side retry could reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Http(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<csv::Error> for ProviderError {
    fn from(err: csv::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Errors that abort an analysis run. No mandate is produced when one occurs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data for {estimator}: need {required}, have {available}")]
    InsufficientData {
        estimator: &'static str,
        required: usize,
        available: usize,
    },

    #[error("invalid weight configuration: {0}")]
    InvalidWeightConfig(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("an analysis run is already in progress")]
    ConcurrentRunRejected,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("analysis run abandoned after {0:?}")]
    Timeout(Duration),

    #[error("analysis task aborted: {0}")]
    Aborted(String),
}

impl EngineError {
    pub(crate) fn insufficient(estimator: &'static str, required: usize, available: usize) -> Self {
        Self::InsufficientData {
            estimator,
            required,
            available,
        }
    }

    /// Worth retrying on the next schedule tick
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider(inner) => inner.is_transient(),
            Self::Timeout(_) | Self::ConcurrentRunRejected => true,
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
