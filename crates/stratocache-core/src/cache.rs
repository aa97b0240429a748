//! The cache abstraction implemented by every tier variant.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CacheError, Result};
use crate::loader::ValueLoader;

/// Which tier variant a cache instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// Stores nothing; every read recomputes.
    None,
    /// In-process bounded memory cache (L1).
    Local,
    /// Shared remote key-value cache (L2).
    Redis,
    /// L1 + L2 routed per cache-name/key policy.
    Composite,
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Local => write!(f, "local"),
            Self::Redis => write!(f, "redis"),
            Self::Composite => write!(f, "composite"),
        }
    }
}

impl std::str::FromStr for CacheKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "local" => Ok(Self::Local),
            "redis" => Ok(Self::Redis),
            "composite" => Ok(Self::Composite),
            other => Err(CacheError::config(format!("unknown cache kind: {other}"))),
        }
    }
}

/// Contract implemented by every tier variant.
///
/// Implementations must be thread-safe (`Send + Sync`); a cache instance
/// belongs to exactly one cache name (its logical namespace).
///
/// The null sentinel is an internal representation only: `get` returns
/// `Ok(None)` both for absent keys and for keys cached as "confirmed
/// nothing" — the difference is observable only through loader behavior
/// (`get_or_load` will not re-run the loader for a cached-null entry).
#[async_trait]
pub trait Cache: Send + Sync {
    /// The cache name this instance serves.
    fn name(&self) -> &str;

    /// The tier variant.
    fn kind(&self) -> CacheKind;

    /// Read a value. Returns `Ok(None)` for absent or cached-null entries.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Read a value, computing and caching it on a miss.
    ///
    /// Concurrently competing callers for the same key observe at most one
    /// loader invocation within this process; all of them receive the one
    /// result. A failed load caches nothing and the error propagates to
    /// every waiter.
    async fn get_or_load(&self, key: &str, loader: Arc<ValueLoader>) -> Result<Option<Value>>;

    /// Store a value. `Value::Null` stores the null sentinel when the cache
    /// allows null caching, and evicts the entry otherwise.
    async fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Store a value only when the key is absent. Returns the previous
    /// decoded value, if any.
    async fn put_if_absent(&self, key: &str, value: Value) -> Result<Option<Value>>;

    /// Remove one entry.
    async fn evict(&self, key: &str) -> Result<()>;

    /// Remove every entry of this cache name.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Unsupported` for tiers that store flat keys
    /// with no per-cache-name index (the backing-store tier).
    async fn clear(&self) -> Result<()>;

    /// Whether the key currently has a stored entry (including the null
    /// sentinel).
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Read many keys at once, preserving input order.
    ///
    /// Entries that decode to "no value" (absent or cached-null) are
    /// omitted, so callers cannot distinguish never-cached from
    /// cached-as-null through this path — only single-key reads can.
    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Store many entries at once. Null values follow the same sentinel
    /// rules as `put`.
    async fn batch_put(&self, entries: Vec<(String, Value)>) -> Result<()> {
        for (key, value) in entries {
            self.put(&key, value).await?;
        }
        Ok(())
    }

    /// Sync-protocol hook: drop the local (L1) copy of a key, or all local
    /// copies when `key` is `None`. No-op for tiers without a local copy.
    async fn clear_local(&self, _key: Option<&str>) -> Result<()> {
        Ok(())
    }

    /// Sync-protocol hook: eagerly reload a key from its stored loader
    /// recipe, falling back to dropping the local copy when no recipe is
    /// known. No-op for tiers without a local copy.
    async fn refresh(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Typed read extension over [`Cache`].
///
/// Kept out of the object-safe trait because of the generic parameter.
#[async_trait]
pub trait CacheExt: Cache {
    /// Read and decode a value into `T`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Serialization` when the cached value does not
    /// decode into the requested type.
    async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(value) => {
                let typed = serde_json::from_value(value).map_err(|e| {
                    CacheError::Serialization(format!(
                        "cached value does not match requested type, cache_name={}, key={key}: {e}",
                        self.name()
                    ))
                })?;
                Ok(Some(typed))
            }
        }
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}
