use std::sync::Arc;

use thiserror::Error;

/// Error types for cache operations.
///
/// The enum is `Clone` so a single failure can be shared among every caller
/// waiting on the same single-flight load.
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    #[error("lock contention, cache_name={cache_name}, key={key}")]
    LockContention { cache_name: String, key: String },

    #[error("loader failed, cache_name={cache_name}, key={key}: {cause}")]
    Loader {
        cache_name: String,
        key: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("operation '{operation}' not supported by {kind} cache")]
    Unsupported { operation: String, kind: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Create a new InvalidKey error
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    /// Create a new LockContention error
    pub fn lock_contention(cache_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::LockContention {
            cache_name: cache_name.into(),
            key: key.into(),
        }
    }

    /// Create a new Loader error wrapping the original cause
    pub fn loader(
        cache_name: impl Into<String>,
        key: impl Into<String>,
        cause: anyhow::Error,
    ) -> Self {
        Self::Loader {
            cache_name: cache_name.into(),
            key: key.into(),
            cause: Arc::new(cause),
        }
    }

    /// Create a new Unsupported error
    pub fn unsupported(operation: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            kind: kind.into(),
        }
    }

    /// Create a new Store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a new Sync error
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync(message.into())
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check whether this is a try-lock fast-fail.
    ///
    /// Callers should treat it as "someone else is loading this key right
    /// now" and retry or degrade, rather than retry internally.
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }

    /// Check whether this error wraps a failed loader invocation.
    pub fn is_loader_failure(&self) -> bool {
        matches!(self, Self::Loader { .. })
    }

    /// If a loader error transports a typed `CacheError` (a nested tier
    /// raised it inside the loader callback), surface that inner error.
    ///
    /// The composite tier wraps the backing-store protocol in the local
    /// tier's loader; a `LockContention` raised there must reach the caller
    /// typed, not buried in a loader wrapper.
    pub fn unwrap_nested(self) -> CacheError {
        if let Self::Loader { ref cause, .. } = self
            && let Some(inner) = cause.downcast_ref::<CacheError>()
        {
            return inner.clone();
        }
        self
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
