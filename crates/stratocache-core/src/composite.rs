//! Composite tier: L1 in front of L2.
//!
//! Reads prefer the local copy and promote backing-store hits into it.
//! Writes go to the backing store first, then the local copy, so a
//! concurrent reader can never promote a stale L2 value over a fresher L1
//! one. Loads nest the whole backing-store protocol (lock, null sentinel,
//! duplication) inside the local tier's single-flight slot, so one process
//! makes at most one L2 round trip per key at a time.
//!
//! Only this outermost tier publishes sync notifications; its inner tiers
//! are constructed without a sync policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::{Cache, CacheKind};
use crate::config::CompositeSettings;
use crate::error::Result;
use crate::loader::ValueLoader;
use crate::local::LocalCache;
use crate::sync::{CacheSyncPolicy, SyncOp};

pub struct CompositeCache {
    name: String,
    routing: CompositeSettings,
    /// Resolved once: every key of this cache name routes through L1.
    l1_default: bool,
    l1: Arc<LocalCache>,
    l2: Arc<dyn Cache>,
    sync: Option<Arc<dyn CacheSyncPolicy>>,
}

impl CompositeCache {
    pub fn new(
        name: impl Into<String>,
        routing: CompositeSettings,
        l1: Arc<LocalCache>,
        l2: Arc<dyn Cache>,
        sync: Option<Arc<dyn CacheSyncPolicy>>,
    ) -> Arc<Self> {
        let name = name.into();
        let l1_default = routing.l1_enabled_for(&name);
        Arc::new(Self {
            name,
            routing,
            l1_default,
            l1,
            l2,
            sync,
        })
    }

    fn l1_routed(&self, key: &str) -> bool {
        self.l1_default || self.routing.l1_enabled_for_key(&self.name, key)
    }

    async fn publish(&self, key: &str, op: SyncOp) {
        if let Some(sync) = &self.sync
            && let Err(e) = sync.publish(&self.name, key, op).await
        {
            tracing::warn!(
                cache_name = %self.name,
                key = %key,
                error = %e,
                "sync publish failed, continuing"
            );
        }
    }
}

#[async_trait]
impl Cache for CompositeCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CacheKind {
        CacheKind::Composite
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if !self.l1_routed(key) {
            return self.l2.get(key).await;
        }
        if let Some(value) = self.l1.get(key).await? {
            return Ok(Some(value));
        }
        // L1 exists() distinguishes a cached null from a plain miss; only a
        // plain miss falls through to L2.
        if self.l1.exists(key).await? {
            return Ok(None);
        }
        match self.l2.get(key).await? {
            Some(value) => {
                tracing::debug!(cache_name = %self.name, key = %key, "promoting L2 hit into L1");
                self.l1.put(key, value.clone()).await?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn get_or_load(&self, key: &str, loader: Arc<ValueLoader>) -> Result<Option<Value>> {
        let result = if self.l1_routed(key) {
            // Nest the L2 protocol inside L1's single-flight slot. A miss
            // from L2 (including its cached null) comes back as Value::Null
            // so L1 stores its own sentinel with the shorter null TTL.
            let l2 = Arc::clone(&self.l2);
            let user_loader = Arc::clone(&loader);
            let key_owned = key.to_string();
            let l2_loader = ValueLoader::new(&self.name, key, move || {
                let l2 = Arc::clone(&l2);
                let user_loader = Arc::clone(&user_loader);
                let key = key_owned.clone();
                async move {
                    match l2.get_or_load(&key, user_loader).await {
                        Ok(Some(value)) => Ok(value),
                        Ok(None) => Ok(Value::Null),
                        Err(e) => Err(anyhow::Error::new(e)),
                    }
                }
            });
            self.l1
                .get_or_load(key, l2_loader)
                .await
                .map_err(|e| e.unwrap_nested())
        } else {
            self.l2.get_or_load(key, Arc::clone(&loader)).await
        };

        if result.is_ok() && loader.should_publish() {
            self.publish(key, SyncOp::Refresh).await;
        }
        result
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.l2.put(key, value.clone()).await?;
        if self.l1_routed(key) {
            self.l1.put(key, value).await?;
        }
        self.publish(key, SyncOp::Refresh).await;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Value) -> Result<Option<Value>> {
        let previous = self.l2.put_if_absent(key, value.clone()).await?;
        if previous.is_none() {
            if self.l1_routed(key) {
                self.l1.put(key, value).await?;
            }
            self.publish(key, SyncOp::Refresh).await;
        }
        Ok(previous)
    }

    async fn evict(&self, key: &str) -> Result<()> {
        // L2 first: evicting L1 first would open a window where a reader
        // re-promotes the doomed L2 entry.
        self.l2.evict(key).await?;
        self.l1.evict(key).await?;
        self.publish(key, SyncOp::Evict).await;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.l1.clear_local(None).await?;
        // The backing store may not support clearing a cache name; its
        // refusal propagates after the local copies are already gone.
        self.l2.clear().await?;
        self.publish("", SyncOp::Clear).await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if self.l1_routed(key) && self.l1.exists(key).await? {
            return Ok(true);
        }
        self.l2.exists(key).await
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Value>> {
        // Single-key reads consult L1; the batch path goes straight to the
        // backing store where it resolves in one round trip.
        self.l2.batch_get(keys).await
    }

    async fn batch_put(&self, entries: Vec<(String, Value)>) -> Result<()> {
        self.l2.batch_put(entries.clone()).await?;
        for (key, value) in entries {
            if self.l1_routed(&key) {
                self.l1.put(&key, value).await?;
            }
            self.publish(&key, SyncOp::Refresh).await;
        }
        Ok(())
    }

    async fn clear_local(&self, key: Option<&str>) -> Result<()> {
        self.l1.clear_local(key).await
    }

    async fn refresh(&self, key: &str) -> Result<()> {
        self.l1.refresh(key).await
    }
}
