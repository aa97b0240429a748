//! Local (L1) tier: in-process bounded cache.
//!
//! Backed by a moka cache with per-entry expiry (the null sentinel carries
//! its own shorter TTL). Competing `get_or_load` callers for one key are
//! collapsed into a single loader invocation per process via moka's
//! coalescing init; a failed load caches nothing and the error is shared
//! by every waiter.
//!
//! With `auto_refresh` on, loader recipes are remembered and a background
//! task re-invokes them periodically so readers keep seeing values without
//! paying the load cost at expiry. Keys populated by bare `put` have no
//! recipe and simply expire; the tier cannot refresh what it has no recipe
//! to recompute.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use moka::Expiry;
use moka::notification::RemovalCause;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::cache::{Cache, CacheKind};
use crate::config::CacheSpec;
use crate::error::{CacheError, Result};
use crate::listener::{CacheExpiredListener, EvictionCause};
use crate::loader::ValueLoader;
use crate::store::{StoreValue, resolve_expire_time};
use crate::sync::{CacheSyncPolicy, SyncOp};

/// Per-entry expiry: regular entries use the spec TTL, the null sentinel
/// its own shorter TTL (unless the spec TTL is already shorter).
struct EntryExpiry {
    ttl: Option<Duration>,
    null_value_ttl: Duration,
}

impl Expiry<String, StoreValue> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoreValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        resolve_expire_time(value, self.ttl, self.null_value_ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoreValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        resolve_expire_time(value, self.ttl, self.null_value_ttl)
    }
}

pub struct LocalCache {
    name: String,
    spec: CacheSpec,
    store: moka::future::Cache<String, StoreValue>,
    /// Loader recipes remembered for refresh-ahead and peer-driven
    /// refresh.
    loaders: DashMap<String, Arc<ValueLoader>>,
    /// Present only on standalone L1 caches; a composite tier publishes
    /// for its inner L1 itself.
    sync: Option<Arc<dyn CacheSyncPolicy>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalCache {
    pub fn new(
        name: impl Into<String>,
        spec: CacheSpec,
        expired_listener: Arc<dyn CacheExpiredListener>,
        sync: Option<Arc<dyn CacheSyncPolicy>>,
    ) -> Arc<Self> {
        let name = name.into();
        let listener_name = name.clone();
        let store = moka::future::Cache::builder()
            .max_capacity(spec.max_capacity)
            .expire_after(EntryExpiry {
                ttl: spec.ttl,
                null_value_ttl: spec.null_value_ttl,
            })
            .eviction_listener(move |key: Arc<String>, value: StoreValue, cause| {
                let cause = match cause {
                    RemovalCause::Expired => EvictionCause::Expired,
                    RemovalCause::Size => EvictionCause::Size,
                    RemovalCause::Replaced => EvictionCause::Replaced,
                    // Explicit evict()/clear() is the caller's own doing.
                    RemovalCause::Explicit => return,
                };
                tracing::debug!(
                    cache_name = %listener_name,
                    key = %key,
                    cause = %cause,
                    "local entry evicted"
                );
                expired_listener.on_expired(&key, value.decode().as_ref(), cause);
            })
            .build();

        let cache = Arc::new(Self {
            name,
            spec,
            store,
            loaders: DashMap::new(),
            sync,
            refresh_task: Mutex::new(None),
        });

        if cache.spec.auto_refresh {
            let handle = Self::spawn_refresh_task(&cache);
            *cache.refresh_task.lock().unwrap() = Some(handle);
        }
        cache
    }

    fn spawn_refresh_task(cache: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(cache);
        let period = cache.spec.refresh_period;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                cache.refresh_stored_loaders().await;
            }
        })
    }

    /// Re-invoke every stored loader whose entry is still present; drop
    /// recipes for entries that have already been evicted.
    async fn refresh_stored_loaders(&self) {
        let keys: Vec<String> = self.loaders.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if !self.store.contains_key(&key) {
                self.loaders.remove(&key);
                continue;
            }
            if let Err(e) = self.refresh(&key).await {
                tracing::warn!(
                    cache_name = %self.name,
                    key = %key,
                    error = %e,
                    "background refresh failed"
                );
            }
        }
    }

    fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::invalid_key(format!(
                "empty key, cache_name={}",
                self.name
            )));
        }
        Ok(())
    }

    async fn publish(&self, key: &str, op: SyncOp) {
        if let Some(sync) = &self.sync
            && let Err(e) = sync.publish(&self.name, key, op).await
        {
            // A publish failure must never fail the cache operation.
            tracing::warn!(
                cache_name = %self.name,
                key = %key,
                error = %e,
                "sync publish failed, continuing"
            );
        }
    }

    /// Stop the background refresh task. Also happens on drop.
    pub fn shutdown(&self) {
        if let Some(handle) = self.refresh_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Number of stored loader recipes (refresh-ahead bookkeeping).
    pub fn stored_loader_count(&self) -> usize {
        self.loaders.len()
    }
}

impl Drop for LocalCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl Cache for LocalCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CacheKind {
        CacheKind::Local
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.validate_key(key)?;
        Ok(self.store.get(key).await.and_then(StoreValue::decode))
    }

    async fn get_or_load(&self, key: &str, loader: Arc<ValueLoader>) -> Result<Option<Value>> {
        self.validate_key(key)?;

        let name = self.name.clone();
        let key_owned = key.to_string();
        let allow_null = self.spec.allow_null_values;
        let init_loader = Arc::clone(&loader);
        let result = self
            .store
            .try_get_with(key_owned, async move {
                let value = init_loader
                    .load()
                    .await
                    .map_err(|e| CacheError::loader(&name, init_loader.key(), e))?;
                // Null with null-caching off still flows through here as a
                // sentinel; it is invalidated right below.
                Ok::<_, CacheError>(StoreValue::encode(value, true).unwrap_or(StoreValue::Null))
            })
            .await;

        match result {
            Ok(stored) => {
                if stored.is_null_sentinel() && !allow_null {
                    self.store.invalidate(key).await;
                } else if self.spec.auto_refresh && loader.was_invoked() {
                    self.loaders.insert(key.to_string(), Arc::clone(&loader));
                }
                if loader.should_publish() {
                    self.publish(key, SyncOp::Refresh).await;
                }
                Ok(stored.decode())
            }
            Err(shared) => Err((*shared).clone()),
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.validate_key(key)?;
        match StoreValue::encode(value, self.spec.allow_null_values) {
            Some(stored) => {
                tracing::debug!(cache_name = %self.name, key = %key, "local put");
                self.store.insert(key.to_string(), stored).await;
            }
            None => {
                // Null with null-caching off removes the entry.
                self.store.invalidate(key).await;
                self.loaders.remove(key);
            }
        }
        self.publish(key, SyncOp::Refresh).await;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Value) -> Result<Option<Value>> {
        self.validate_key(key)?;
        let Some(stored) = StoreValue::encode(value, self.spec.allow_null_values) else {
            return self.get(key).await;
        };
        let entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(async { stored })
            .await;
        if entry.is_fresh() {
            self.publish(key, SyncOp::Refresh).await;
            Ok(None)
        } else {
            Ok(entry.into_value().decode())
        }
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.validate_key(key)?;
        tracing::debug!(cache_name = %self.name, key = %key, "local evict");
        self.store.invalidate(key).await;
        self.loaders.remove(key);
        self.publish(key, SyncOp::Evict).await;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        tracing::debug!(cache_name = %self.name, "local clear");
        self.store.invalidate_all();
        self.loaders.clear();
        self.publish("", SyncOp::Clear).await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.validate_key(key)?;
        Ok(self.store.contains_key(key))
    }

    async fn clear_local(&self, key: Option<&str>) -> Result<()> {
        match key {
            Some(key) => self.store.invalidate(key).await,
            None => self.store.invalidate_all(),
        }
        Ok(())
    }

    async fn refresh(&self, key: &str) -> Result<()> {
        let Some(loader) = self.loaders.get(key).map(|e| Arc::clone(e.value())) else {
            // No recipe to recompute with; drop the copy so the next read
            // repopulates it.
            self.store.invalidate(key).await;
            return Ok(());
        };
        let value = loader
            .load()
            .await
            .map_err(|e| CacheError::loader(&self.name, key, e))?;
        if let Some(stored) = StoreValue::encode(value, self.spec.allow_null_values) {
            self.store.insert(key.to_string(), stored).await;
        } else {
            self.store.invalidate(key).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheExt;
    use crate::listener::NoopExpiredListener;
    use crate::test_support::RecordingSyncPolicy;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn spec(ttl: Option<Duration>) -> CacheSpec {
        CacheSpec {
            kind: CacheKind::Local,
            allow_null_values: true,
            null_value_ttl: Duration::from_secs(60),
            max_capacity: 1_000,
            ttl,
            auto_refresh: false,
            refresh_period: Duration::from_secs(30),
        }
    }

    fn local(ttl: Option<Duration>) -> Arc<LocalCache> {
        LocalCache::new("user", spec(ttl), Arc::new(NoopExpiredListener), None)
    }

    fn counting_loader(
        key: &str,
        calls: &Arc<AtomicUsize>,
        value: Value,
    ) -> Arc<ValueLoader> {
        let calls = Arc::clone(calls);
        ValueLoader::new("user", key, move || {
            let calls = Arc::clone(&calls);
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
        })
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = local(None);
        cache.put("u1", json!({"name": "Alice"})).await.unwrap();
        assert_eq!(
            cache.get("u1").await.unwrap(),
            Some(json!({"name": "Alice"}))
        );
        assert!(cache.exists("u1").await.unwrap());
        assert_eq!(cache.get("u2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_get() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct User {
            name: String,
        }

        let cache = local(None);
        cache.put("u1", json!({"name": "Alice"})).await.unwrap();
        let user: Option<User> = cache.get_as("u1").await.unwrap();
        assert_eq!(user.unwrap().name, "Alice");

        let err = cache.get_as::<u64>("u1").await.unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let cache = local(None);
        assert!(matches!(
            cache.get("").await.unwrap_err(),
            CacheError::InvalidKey(_)
        ));
        assert!(matches!(
            cache.put("", json!(1)).await.unwrap_err(),
            CacheError::InvalidKey(_)
        ));
    }

    #[tokio::test]
    async fn test_single_flight_one_loader_run() {
        let cache = local(None);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_for_loader = Arc::clone(&calls);
        let loader = ValueLoader::new("user", "u1", move || {
            let calls = Arc::clone(&calls_for_loader);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!("Alice"))
            }
        });

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let loader = Arc::clone(&loader);
            tasks.push(tokio::spawn(async move {
                cache.get_or_load("u1", loader).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), Some(json!("Alice")));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_caches_nothing_and_fails_all_waiters() {
        let cache = local(None);
        let attempts = Arc::new(AtomicUsize::new(0));

        let attempts_for_loader = Arc::clone(&attempts);
        let loader = ValueLoader::new("user", "u1", move || {
            let attempts = Arc::clone(&attempts_for_loader);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err(anyhow::anyhow!("upstream down"))
            }
        });

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let loader = Arc::clone(&loader);
            tasks.push(tokio::spawn(async move {
                cache.get_or_load("u1", loader).await
            }));
        }
        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(err.is_loader_failure());
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!cache.exists("u1").await.unwrap());

        // The next caller retries cleanly.
        let calls = Arc::new(AtomicUsize::new(0));
        let retry = counting_loader("u1", &calls, json!("Alice"));
        assert_eq!(
            cache.get_or_load("u1", retry).await.unwrap(),
            Some(json!("Alice"))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_null_value_roundtrip() {
        let cache = local(None);
        cache.put("missing", Value::Null).await.unwrap();

        // The sentinel decodes to "no value"...
        assert_eq!(cache.get("missing").await.unwrap(), None);
        // ...but the entry is present, defeating penetration.
        assert!(cache.exists("missing").await.unwrap());

        // A loader-backed read serves the cached null without recomputing.
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader("missing", &calls, json!("should not run"));
        assert_eq!(cache.get_or_load("missing", loader).await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_null_value_expires_on_its_own_ttl() {
        // Regular TTL is long; the sentinel must still expire quickly.
        let mut s = spec(Some(Duration::from_secs(300)));
        s.null_value_ttl = Duration::from_millis(100);
        let cache = LocalCache::new("user", s, Arc::new(NoopExpiredListener), None);

        cache.put("missing", Value::Null).await.unwrap();
        cache.put("present", json!("Alice")).await.unwrap();
        assert!(cache.exists("missing").await.unwrap());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.get("missing").await.unwrap(), None);
        assert!(!cache.exists("missing").await.unwrap());
        // The regular entry is unaffected.
        assert_eq!(cache.get("present").await.unwrap(), Some(json!("Alice")));
    }

    #[tokio::test]
    async fn test_null_not_cached_when_disallowed() {
        let mut s = spec(None);
        s.allow_null_values = false;
        let cache = LocalCache::new("user", s, Arc::new(NoopExpiredListener), None);

        cache.put("u1", Value::Null).await.unwrap();
        assert!(!cache.exists("u1").await.unwrap());

        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader("u1", &calls, Value::Null);
        assert_eq!(cache.get_or_load("u1", loader).await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.exists("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache = local(Some(Duration::from_millis(100)));
        cache.put("u1", json!("Alice")).await.unwrap();
        assert!(cache.exists("u1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.get("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let cache = local(None);
        assert_eq!(
            cache.put_if_absent("u1", json!("Alice")).await.unwrap(),
            None
        );
        assert_eq!(
            cache.put_if_absent("u1", json!("Bob")).await.unwrap(),
            Some(json!("Alice"))
        );
        assert_eq!(cache.get("u1").await.unwrap(), Some(json!("Alice")));
    }

    #[tokio::test]
    async fn test_evict_and_clear() {
        let cache = local(None);
        cache.put("u1", json!(1)).await.unwrap();
        cache.put("u2", json!(2)).await.unwrap();

        cache.evict("u1").await.unwrap();
        assert!(!cache.exists("u1").await.unwrap());
        assert!(cache.exists("u2").await.unwrap());

        cache.clear().await.unwrap();
        assert!(!cache.exists("u2").await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_ahead_reinvokes_stored_loader() {
        let mut s = spec(Some(Duration::from_secs(300)));
        s.auto_refresh = true;
        s.refresh_period = Duration::from_millis(50);
        let cache = LocalCache::new("user", s, Arc::new(NoopExpiredListener), None);

        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader("u1", &calls, json!("Alice"));
        cache.get_or_load("u1", loader).await.unwrap();
        assert_eq!(cache.stored_loader_count(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(calls.load(Ordering::SeqCst) > 1);
        assert_eq!(cache.get("u1").await.unwrap(), Some(json!("Alice")));

        cache.shutdown();
    }

    #[tokio::test]
    async fn test_refresh_without_recipe_drops_entry() {
        let cache = local(None);
        cache.put("u1", json!("Alice")).await.unwrap();
        // Populated via put: no recipe, refresh falls back to dropping.
        cache.refresh("u1").await.unwrap();
        assert!(!cache.exists("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_listener_sees_ttl_eviction_not_explicit() {
        struct Recording(Mutex<Vec<(String, EvictionCause)>>);
        impl CacheExpiredListener for Recording {
            fn on_expired(&self, key: &str, _value: Option<&Value>, cause: EvictionCause) {
                self.0.lock().unwrap().push((key.to_string(), cause));
            }
        }

        let listener = Arc::new(Recording(Mutex::new(Vec::new())));
        let cache = LocalCache::new(
            "user",
            spec(Some(Duration::from_millis(100))),
            Arc::clone(&listener) as Arc<dyn CacheExpiredListener>,
            None,
        );

        cache.put("expiring", json!(1)).await.unwrap();
        cache.put("evicted", json!(2)).await.unwrap();
        cache.evict("evicted").await.unwrap();

        // Expired notifications arrive through moka's timer wheel well
        // after the entry stops being readable, so poll for delivery.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let _ = cache.get("expiring").await.unwrap();
            cache.store.run_pending_tasks().await;
            let expired_seen = listener
                .0
                .lock()
                .unwrap()
                .iter()
                .any(|(k, c)| k == "expiring" && *c == EvictionCause::Expired);
            if expired_seen {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expired notification never delivered"
            );
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let events = listener.0.lock().unwrap();
        assert!(!events.iter().any(|(k, _)| k == "evicted"));
    }

    #[tokio::test]
    async fn test_standalone_sync_publishes_on_load_not_on_hit() {
        let sync = Arc::new(RecordingSyncPolicy::new("instance-a"));
        let cache = LocalCache::new(
            "user",
            spec(None),
            Arc::new(NoopExpiredListener),
            Some(Arc::clone(&sync) as Arc<dyn CacheSyncPolicy>),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader("u1", &calls, json!("Alice"));
        cache.get_or_load("u1", Arc::clone(&loader)).await.unwrap();
        assert_eq!(sync.count(SyncOp::Refresh), 1);

        // Hits publish nothing.
        let hit_loader = counting_loader("u1", &calls, json!("Alice"));
        cache.get_or_load("u1", hit_loader).await.unwrap();
        let _ = cache.get("u1").await.unwrap();
        assert_eq!(sync.count(SyncOp::Refresh), 1);

        cache.evict("u1").await.unwrap();
        assert_eq!(sync.count(SyncOp::Evict), 1);
    }
}
