//! Expired-entry notification boundary.

use serde_json::Value;

/// Why the local tier dropped an entry on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    /// The entry's TTL elapsed.
    Expired,
    /// The entry was pushed out by the capacity bound.
    Size,
    /// The entry was overwritten by a newer value.
    Replaced,
}

impl std::fmt::Display for EvictionCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "expired"),
            Self::Size => write!(f, "size"),
            Self::Replaced => write!(f, "replaced"),
        }
    }
}

/// Invoked by the local tier whenever it evicts an entry by capacity or
/// TTL — never for explicit `evict()`/`clear()` calls.
pub trait CacheExpiredListener: Send + Sync {
    fn on_expired(&self, key: &str, value: Option<&Value>, cause: EvictionCause);
}

/// Default listener: ignore expirations.
#[derive(Debug, Default)]
pub struct NoopExpiredListener;

impl CacheExpiredListener for NoopExpiredListener {
    fn on_expired(&self, _key: &str, _value: Option<&Value>, _cause: EvictionCause) {}
}
