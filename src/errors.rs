//! Structured error types for the ShadowPI engine.
//!
//! Every fallible path in the engine funnels into [`EngineError`] so the
//! event pipeline can decide between retrying, degrading, or surfacing the
//! failure to the moderation log.

use std::time::Duration;

use thiserror::Error;

/// Main error type for the moderation engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage operation failed: {operation} - {source}")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Reputation service unavailable: {message}")]
    Reputation { message: String },

    #[error("Watchlist sync fetch failed: {message}")]
    SyncFetch { message: String },

    #[error("Malformed import line: {line}")]
    MalformedImport { line: String },

    #[error("Invalid activation secret")]
    InvalidSecret,

    #[error("Too many attempts: {message}")]
    RateLimited { message: String },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sweep aborted: {message}")]
    SweepAborted { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Result with EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Create a reputation-unavailable error
    pub fn reputation(message: impl Into<String>) -> Self {
        Self::Reputation {
            message: message.into(),
        }
    }

    /// Create a sync fetch error
    pub fn sync_fetch(message: impl Into<String>) -> Self {
        Self::SyncFetch {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the operation is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Io { .. })
    }
}

/// Convert from sled errors
impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::storage("sled_operation", err)
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::serialization("json_operation", err)
    }
}

/// Convert from std::io errors
impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::io("io_operation", err)
    }
}

/// Convert from reqwest errors
impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::reputation(err.to_string())
    }
}

/// Retry a storage operation a bounded number of times with linear backoff
/// and jitter. Non-transient errors surface immediately.
pub async fn with_retry<T, F>(operation: &str, attempts: u32, mut f: F) -> EngineResult<T>
where
    F: FnMut() -> EngineResult<T>,
{
    let mut last_err = None;
    for attempt in 0..attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let jitter: u64 = rand::random_range(0..25);
                let delay = Duration::from_millis(50 * u64::from(attempt + 1) + jitter);
                tracing::warn!(operation, attempt, error = %err, "transient failure, retrying");
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| EngineError::internal(format!("{operation}: retries exhausted"))))
}
