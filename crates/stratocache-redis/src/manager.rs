//! Engine front door: builds and owns the configured caches.
//!
//! A [`CacheManager`] is created once from a [`CacheConfig`], resolves the
//! pluggable components (hot-key detector, sync policy), starts the sync
//! listener, and hands out caches by name. A cache name resolves to one
//! shared instance for the manager's lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use stratocache_core::builder::{CacheBuilder, LocalCacheBuilder, NoneCacheBuilder};
use stratocache_core::cache::{Cache, CacheKind};
use stratocache_core::config::CacheConfig;
use stratocache_core::error::{CacheError, Result};
use stratocache_core::hotkey::{HotKeyDetector, NoopHotKeyDetector, StaticHotKeyDetector};
use stratocache_core::listener::{CacheExpiredListener, NoopExpiredListener};
use stratocache_core::registry::{CacheRegistry, ComponentRegistry};
use stratocache_core::sync::{CacheSyncPolicy, NoopSyncPolicy};

use crate::builder::{CompositeCacheBuilder, RedisCacheBuilder};
use crate::create_pool;
use crate::sync::RedisSyncPolicy;

pub struct CacheManager {
    config: CacheConfig,
    registry: Arc<CacheRegistry>,
    builders: HashMap<CacheKind, Arc<dyn CacheBuilder>>,
    sync: Arc<dyn CacheSyncPolicy>,
    /// Serializes first-time construction so concurrent callers for one
    /// cache name end up with the same instance.
    build_lock: tokio::sync::Mutex<()>,
}

impl CacheManager {
    pub fn builder(config: CacheConfig) -> CacheManagerBuilder {
        CacheManagerBuilder::new(config)
    }

    pub fn instance_id(&self) -> &str {
        self.sync.instance_id()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The already-built cache for a name, if any.
    pub fn get(&self, cache_name: &str) -> Option<Arc<dyn Cache>> {
        self.registry.get(cache_name)
    }

    /// The cache for a name, building it on first use from its configured
    /// tier kind.
    pub async fn get_or_create(&self, cache_name: &str) -> Result<Arc<dyn Cache>> {
        if let Some(cache) = self.registry.get(cache_name) {
            return Ok(cache);
        }
        let _guard = self.build_lock.lock().await;
        if let Some(cache) = self.registry.get(cache_name) {
            return Ok(cache);
        }

        let kind = self.config.settings(cache_name).kind;
        let builder = self.builders.get(&kind).ok_or_else(|| {
            CacheError::config(format!("no builder registered for cache kind '{kind}'"))
        })?;
        let cache = builder.build(cache_name, &self.config).await?;
        tracing::info!(cache_name = %cache_name, kind = %kind, "cache created");
        self.registry.register(Arc::clone(&cache));
        Ok(cache)
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Stop the sync listener and drop every built cache.
    pub async fn shutdown(&self) -> Result<()> {
        self.sync.disconnect().await?;
        self.registry.clear();
        Ok(())
    }
}

pub struct CacheManagerBuilder {
    config: CacheConfig,
    expired_listener: Arc<dyn CacheExpiredListener>,
    hot_key_detectors: ComponentRegistry<dyn HotKeyDetector>,
    sync_override: Option<Arc<dyn CacheSyncPolicy>>,
}

impl CacheManagerBuilder {
    pub fn new(config: CacheConfig) -> Self {
        let mut hot_key_detectors: ComponentRegistry<dyn HotKeyDetector> =
            ComponentRegistry::new("hot-key detector");
        hot_key_detectors.register("none", Arc::new(NoopHotKeyDetector));
        hot_key_detectors.register(
            "static",
            Arc::new(StaticHotKeyDetector::new(config.hot_key.keys.clone())),
        );
        Self {
            config,
            expired_listener: Arc::new(NoopExpiredListener),
            hot_key_detectors,
            sync_override: None,
        }
    }

    pub fn with_expired_listener(mut self, listener: Arc<dyn CacheExpiredListener>) -> Self {
        self.expired_listener = listener;
        self
    }

    /// Register a hot-key detector under a name selectable through the
    /// `hot_key.kind` setting.
    pub fn register_hot_key_detector(
        mut self,
        name: impl Into<String>,
        detector: Arc<dyn HotKeyDetector>,
    ) -> Self {
        self.hot_key_detectors.register(name, detector);
        self
    }

    /// Replace the config-resolved sync policy entirely.
    pub fn with_sync_policy(mut self, sync: Arc<dyn CacheSyncPolicy>) -> Self {
        self.sync_override = Some(sync);
        self
    }

    pub async fn build(self) -> Result<CacheManager> {
        let config = self.config;
        let pool = create_pool(&config.redis)?;
        let registry = Arc::new(CacheRegistry::new());
        let hot_key = self.hot_key_detectors.resolve(&config.hot_key.kind)?;

        let sync: Arc<dyn CacheSyncPolicy> = match self.sync_override {
            Some(sync) => sync,
            None => match config.sync.kind.as_str() {
                "none" => Arc::new(NoopSyncPolicy::new(&config.instance_id)),
                "redis" => Arc::new(RedisSyncPolicy::new(
                    &config.instance_id,
                    &config.sync.topic,
                    config.sync.async_publish,
                    &config.redis.url,
                    pool.clone(),
                    Arc::clone(&registry),
                )?),
                other => {
                    return Err(CacheError::config(format!(
                        "unknown sync policy kind '{other}' (known: \"none\", \"redis\")"
                    )));
                }
            },
        };
        sync.connect().await?;

        let standalone_local = LocalCacheBuilder::new()
            .with_expired_listener(Arc::clone(&self.expired_listener))
            .with_sync(Arc::clone(&sync));
        let composite_local =
            LocalCacheBuilder::new().with_expired_listener(Arc::clone(&self.expired_listener));

        let mut builders: HashMap<CacheKind, Arc<dyn CacheBuilder>> = HashMap::new();
        builders.insert(CacheKind::None, Arc::new(NoneCacheBuilder));
        builders.insert(CacheKind::Local, Arc::new(standalone_local));
        builders.insert(
            CacheKind::Redis,
            Arc::new(RedisCacheBuilder::new(pool.clone(), Arc::clone(&hot_key))),
        );
        builders.insert(
            CacheKind::Composite,
            Arc::new(CompositeCacheBuilder::new(
                pool,
                hot_key,
                composite_local,
                Some(Arc::clone(&sync)),
            )),
        );

        Ok(CacheManager {
            config,
            registry,
            builders,
            sync,
            build_lock: tokio::sync::Mutex::new(()),
        })
    }
}
