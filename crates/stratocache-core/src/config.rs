//! Engine configuration.
//!
//! Plain serde-deserializable structs; loading them from files or the
//! environment is the embedding application's job. A cache name resolves
//! to its own settings when present in `caches`, falling back to
//! `defaults` otherwise.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheKind;

/// Top-level configuration for one cache engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Process-unique instance id, generated once and immutable. Lets a
    /// process ignore its own echoed sync messages.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Settings applied to cache names without an explicit entry.
    #[serde(default)]
    pub defaults: CacheSettings,

    /// Per-cache-name settings.
    #[serde(default)]
    pub caches: HashMap<String, CacheSettings>,

    /// Backing-store (L2) settings, shared by every cache name.
    #[serde(default)]
    pub redis: RedisSettings,

    /// Cross-process synchronization settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Hot-key detection settings.
    #[serde(default)]
    pub hot_key: HotKeySettings,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            defaults: CacheSettings::default(),
            caches: HashMap::new(),
            redis: RedisSettings::default(),
            sync: SyncSettings::default(),
            hot_key: HotKeySettings::default(),
        }
    }
}

impl CacheConfig {
    /// Settings for a cache name (explicit entry or defaults).
    pub fn settings(&self, cache_name: &str) -> &CacheSettings {
        self.caches.get(cache_name).unwrap_or(&self.defaults)
    }

    /// Resolve the build-time spec for a cache name.
    pub fn spec(&self, cache_name: &str) -> CacheSpec {
        let settings = self.settings(cache_name);
        CacheSpec {
            kind: settings.kind,
            allow_null_values: settings.allow_null_values,
            null_value_ttl: Duration::from_secs(settings.null_value_ttl_secs),
            max_capacity: settings.max_capacity,
            ttl: normalize_ttl(settings.ttl_ms),
            auto_refresh: settings.auto_refresh,
            refresh_period: Duration::from_secs(settings.refresh_period_secs),
        }
    }
}

/// Per-cache-name settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Tier variant built for this cache name.
    #[serde(default = "default_kind")]
    pub kind: CacheKind,

    /// Cache the null sentinel for confirmed-absent lookups (penetration
    /// protection).
    #[serde(default = "default_true")]
    pub allow_null_values: bool,

    /// Expiry of null-sentinel entries, independent of (and usually much
    /// shorter than) the regular TTL.
    #[serde(default = "default_null_value_ttl_secs")]
    pub null_value_ttl_secs: u64,

    /// Maximum number of entries held by the local tier.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    /// Entry TTL in milliseconds; zero or negative means no expiry.
    /// The backing-store tier uses this same value so L1 and L2 agree.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: i64,

    /// Re-invoke stored loaders in the background instead of letting
    /// entries expire under readers.
    #[serde(default)]
    pub auto_refresh: bool,

    /// Period of the background refresh task.
    #[serde(default = "default_refresh_period_secs")]
    pub refresh_period_secs: u64,

    /// Composite-tier routing policy.
    #[serde(default)]
    pub composite: CompositeSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            allow_null_values: true,
            null_value_ttl_secs: default_null_value_ttl_secs(),
            max_capacity: default_max_capacity(),
            ttl_ms: default_ttl_ms(),
            auto_refresh: false,
            refresh_period_secs: default_refresh_period_secs(),
            composite: CompositeSettings::default(),
        }
    }
}

/// Which cache names / keys route through the local tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSettings {
    /// Every key of every cache name uses L1.
    #[serde(default = "default_true")]
    pub l1_all_keys: bool,

    /// Only these cache names use L1 (when `l1_all_keys` is off).
    #[serde(default)]
    pub l1_cache_names: HashSet<String>,

    /// Only these literal keys use L1 (when `l1_all_keys` is off),
    /// entries formatted as `"<cacheName>:<key>"`.
    #[serde(default)]
    pub l1_keys: HashSet<String>,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            l1_all_keys: true,
            l1_cache_names: HashSet::new(),
            l1_keys: HashSet::new(),
        }
    }
}

impl CompositeSettings {
    /// Whether every key of `cache_name` routes through L1. Resolved once
    /// at build time.
    pub fn l1_enabled_for(&self, cache_name: &str) -> bool {
        self.l1_all_keys || self.l1_cache_names.contains(cache_name)
    }

    /// Whether this specific key routes through L1 even though the cache
    /// name as a whole does not.
    pub fn l1_enabled_for_key(&self, cache_name: &str, key: &str) -> bool {
        !self.l1_keys.is_empty() && self.l1_keys.contains(&format!("{cache_name}:{key}"))
    }
}

/// Backing-store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Guard the load step with a distributed lock so that, cluster-wide,
    /// at most one process runs the loader for a key at a time.
    #[serde(default)]
    pub lock: bool,

    /// Try-lock mode fails competing loads fast with `LockContention`;
    /// otherwise competitors block until the lock is released.
    #[serde(default = "default_true")]
    pub try_lock: bool,

    /// Lock expiry; bounds how long a crashed holder can block peers.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// Retry interval for blocking lock acquisition.
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,

    /// Default entry TTL in milliseconds when the cache spec sets none;
    /// zero or negative means no expiry.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: i64,

    /// Master switch for hot-key duplication.
    #[serde(default)]
    pub duplicate: bool,

    /// Duplicate every key (of every cache name) at the default size.
    #[serde(default)]
    pub duplicate_all_keys: bool,

    /// Duplicate size used when a map entry does not carry its own.
    #[serde(default = "default_duplicate_size")]
    pub default_duplicate_size: usize,

    /// Per-key duplicate sizes, keyed by the full base key
    /// `"<cacheName>:<key>"`.
    #[serde(default)]
    pub duplicate_keys: HashMap<String, usize>,

    /// Per-cache-name duplicate sizes.
    #[serde(default)]
    pub duplicate_cache_names: HashMap<String, usize>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            timeout_ms: default_timeout_ms(),
            lock: false,
            try_lock: true,
            lock_ttl_ms: default_lock_ttl_ms(),
            lock_retry_ms: default_lock_retry_ms(),
            default_ttl_ms: default_ttl_ms(),
            duplicate: false,
            duplicate_all_keys: false,
            default_duplicate_size: default_duplicate_size(),
            duplicate_keys: HashMap::new(),
            duplicate_cache_names: HashMap::new(),
        }
    }
}

impl RedisSettings {
    /// Statically configured duplicate size for a key, if duplication
    /// applies. Resolution order: per-key map, per-cache-name map,
    /// all-keys default. The hot-key detector is consulted separately.
    pub fn configured_duplicate_size(&self, cache_name: &str, base_key: &str) -> Option<usize> {
        if !self.duplicate {
            return None;
        }
        let size = self
            .duplicate_keys
            .get(base_key)
            .or_else(|| self.duplicate_cache_names.get(cache_name))
            .copied()
            .or_else(|| self.duplicate_all_keys.then_some(self.default_duplicate_size));
        size.filter(|n| *n > 0)
    }
}

/// Cross-process synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Sync policy name resolved through the component registry
    /// ("none" or "redis").
    #[serde(default = "default_component_none")]
    pub kind: String,

    /// Pub/sub topic carrying sync messages.
    #[serde(default = "default_sync_topic")]
    pub topic: String,

    /// Publish fire-and-forget instead of awaiting the broker round trip.
    #[serde(default)]
    pub async_publish: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            kind: default_component_none(),
            topic: default_sync_topic(),
            async_publish: false,
        }
    }
}

/// Hot-key detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotKeySettings {
    /// Detector name resolved through the component registry
    /// ("none" or "static").
    #[serde(default = "default_component_none")]
    pub kind: String,

    /// Built keys (`"<cacheName>:<key>"`) treated as hot by the static
    /// detector.
    #[serde(default)]
    pub keys: HashSet<String>,
}

impl Default for HotKeySettings {
    fn default() -> Self {
        Self {
            kind: default_component_none(),
            keys: HashSet::new(),
        }
    }
}

/// Build-time resolved settings for one cache name.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSpec {
    pub kind: CacheKind,
    pub allow_null_values: bool,
    pub null_value_ttl: Duration,
    pub max_capacity: u64,
    /// Entry TTL; `None` means no expiry. Shared by L1 and L2 for the same
    /// cache name so an L1 refresh never outlives the L2 entry.
    pub ttl: Option<Duration>,
    pub auto_refresh: bool,
    pub refresh_period: Duration,
}

/// Normalize a configured TTL: zero or negative means no expiry.
pub fn normalize_ttl(ttl_ms: i64) -> Option<Duration> {
    (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms as u64))
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
fn default_kind() -> CacheKind {
    CacheKind::Composite
}
fn default_true() -> bool {
    true
}
fn default_null_value_ttl_secs() -> u64 {
    60
}
fn default_max_capacity() -> u64 {
    10_000
}
fn default_ttl_ms() -> i64 {
    -1
}
fn default_refresh_period_secs() -> u64 {
    30
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}
fn default_pool_size() -> usize {
    16
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_lock_ttl_ms() -> u64 {
    30_000
}
fn default_lock_retry_ms() -> u64 {
    50
}
fn default_duplicate_size() -> usize {
    10
}
fn default_component_none() -> String {
    "none".into()
}
fn default_sync_topic() -> String {
    "stratocache:sync".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(!config.instance_id.is_empty());
        assert_eq!(config.defaults.kind, CacheKind::Composite);
        assert!(config.defaults.allow_null_values);
        assert_eq!(config.sync.kind, "none");
        assert!(!config.redis.lock);
        assert!(config.redis.try_lock);
    }

    #[test]
    fn test_instance_ids_are_unique() {
        let a = CacheConfig::default();
        let b = CacheConfig::default();
        assert_ne!(a.instance_id, b.instance_id);
    }

    #[test]
    fn test_spec_resolution_prefers_explicit_entry() {
        let mut config = CacheConfig::default();
        config.caches.insert(
            "user".into(),
            CacheSettings {
                ttl_ms: 120_000,
                max_capacity: 500,
                ..CacheSettings::default()
            },
        );

        let user_spec = config.spec("user");
        assert_eq!(user_spec.ttl, Some(Duration::from_millis(120_000)));
        assert_eq!(user_spec.max_capacity, 500);

        let other_spec = config.spec("order");
        assert_eq!(other_spec.ttl, None);
        assert_eq!(other_spec.max_capacity, default_max_capacity());
    }

    #[test]
    fn test_ttl_normalization() {
        assert_eq!(normalize_ttl(-1), None);
        assert_eq!(normalize_ttl(0), None);
        assert_eq!(normalize_ttl(1500), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_duplicate_size_resolution_order() {
        let redis = RedisSettings {
            duplicate: true,
            duplicate_all_keys: true,
            default_duplicate_size: 10,
            duplicate_keys: HashMap::from([("user:u1".to_string(), 4)]),
            duplicate_cache_names: HashMap::from([("user".to_string(), 6)]),
            ..RedisSettings::default()
        };

        assert_eq!(redis.configured_duplicate_size("user", "user:u1"), Some(4));
        assert_eq!(redis.configured_duplicate_size("user", "user:u2"), Some(6));
        assert_eq!(redis.configured_duplicate_size("order", "order:o1"), Some(10));

        let disabled = RedisSettings::default();
        assert_eq!(disabled.configured_duplicate_size("user", "user:u1"), None);
    }

    #[test]
    fn test_duplicate_disabled_without_any_match() {
        let redis = RedisSettings {
            duplicate: true,
            ..RedisSettings::default()
        };
        // Duplication on, but no key/name/all-keys rule matches.
        assert_eq!(redis.configured_duplicate_size("user", "user:u1"), None);
    }

    #[test]
    fn test_composite_l1_routing() {
        let composite = CompositeSettings {
            l1_all_keys: false,
            l1_cache_names: HashSet::from(["user".to_string()]),
            l1_keys: HashSet::from(["order:o1".to_string()]),
        };
        assert!(composite.l1_enabled_for("user"));
        assert!(!composite.l1_enabled_for("order"));
        assert!(composite.l1_enabled_for_key("order", "o1"));
        assert!(!composite.l1_enabled_for_key("order", "o2"));
    }

    #[test]
    fn test_config_deserializes_from_sparse_json() {
        let config: CacheConfig = serde_json::from_str(
            r#"{
                "caches": { "user": { "ttl_ms": 60000 } },
                "redis": { "url": "redis://cache:6379", "lock": true },
                "sync": { "kind": "redis", "topic": "events" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.spec("user").ttl, Some(Duration::from_secs(60)));
        assert_eq!(config.redis.url, "redis://cache:6379");
        assert!(config.redis.lock);
        assert!(config.redis.try_lock);
        assert_eq!(config.sync.topic, "events");
    }
}
