//! Stored-value representation shared by every tier.
//!
//! A cached entry is either a real JSON value or the null sentinel: a
//! distinguished marker for "this lookup legitimately returned nothing",
//! cached to stop absent keys from hammering the loader (cache
//! penetration). The sentinel is never exposed to callers; it decodes to
//! `None` on every public read path.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// On-the-wire and in-store form of a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StoreValue {
    /// Null sentinel: a confirmed "no value" result.
    Null,
    /// An ordinary cached value.
    Value(Value),
}

impl StoreValue {
    /// Encode a user-facing value for storage.
    ///
    /// `Value::Null` becomes the sentinel when null caching is allowed;
    /// otherwise `None` is returned and nothing should be stored.
    pub fn encode(value: Value, allow_null_values: bool) -> Option<StoreValue> {
        if value.is_null() {
            if allow_null_values {
                Some(StoreValue::Null)
            } else {
                None
            }
        } else {
            Some(StoreValue::Value(value))
        }
    }

    /// Decode a stored entry for callers. The sentinel decodes to `None`.
    pub fn decode(self) -> Option<Value> {
        match self {
            StoreValue::Null => None,
            StoreValue::Value(v) => Some(v),
        }
    }

    /// Whether this entry is the null sentinel.
    pub fn is_null_sentinel(&self) -> bool {
        matches!(self, StoreValue::Null)
    }

    /// Serialize for the backing store.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from the backing store.
    pub fn from_wire(raw: &str) -> Result<StoreValue, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Resolve the effective expiry for a stored entry.
///
/// The null sentinel gets its own, shorter TTL so confirmed-absent entries
/// are retried reasonably soon; that TTL is not applied when the entry's
/// real TTL is already shorter. `None` means no expiry.
pub fn resolve_expire_time(
    value: &StoreValue,
    ttl: Option<Duration>,
    null_value_ttl: Duration,
) -> Option<Duration> {
    if value.is_null_sentinel() {
        return match ttl {
            Some(t) if t < null_value_ttl => Some(t),
            _ => Some(null_value_ttl),
        };
    }
    ttl
}
