use std::{sync::Arc, time::Duration};

/// Represents a result type for operations in the synchronization engine.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// crate-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur while synchronizing.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A fetch did not complete within the configured time limit.
    #[error("operation timed out because it exceeded the configured time limit of {0:?}")]
    Timeout(Duration),

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// Server responded with a non-successful status code.
    #[error("server responded with status {0}")]
    HttpStatus(u16),

    /// Network error.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// Error serializing or deserializing JSON (split definitions or push notifications).
    #[error(transparent)]
    Json(Arc<serde_json::Error>),

    /// Error reported by a cache implementation.
    #[error("storage error: {0}")]
    Storage(Arc<dyn std::error::Error + Send + Sync>),

    /// The readiness gate timed out before the SDK became ready.
    #[error("SDK is not ready: readiness timed out")]
    ReadyTimedOut,

    /// The readiness gate (or the whole engine) was destroyed.
    #[error("SDK was destroyed")]
    Destroyed,
}

impl Error {
    /// Returns `true` for the declared synchronization failures that are retried and treated as
    /// soft failures. Any other error is unexpected and must not be swallowed.
    pub fn is_sync_error(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::InvalidBaseUrl(_)
                | Error::Unauthorized
                | Error::HttpStatus(_)
                | Error::Network(_)
        )
    }

    /// Wrap an arbitrary cache back-end error.
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Storage(Arc::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Json(Arc::new(value))
    }
}
