//! Builders for the Redis-backed tier variants.

use std::sync::Arc;

use async_trait::async_trait;

use stratocache_core::builder::{CacheBuilder, LocalCacheBuilder};
use stratocache_core::cache::{Cache, CacheKind};
use stratocache_core::composite::CompositeCache;
use stratocache_core::config::{CacheConfig, CacheSpec, normalize_ttl};
use stratocache_core::error::Result;
use stratocache_core::hotkey::HotKeyDetector;
use stratocache_core::sync::CacheSyncPolicy;

use crate::cache::RedisCache;

/// Builds standalone backing-store (L2) caches.
pub struct RedisCacheBuilder {
    pool: deadpool_redis::Pool,
    hot_key: Arc<dyn HotKeyDetector>,
}

impl RedisCacheBuilder {
    pub fn new(pool: deadpool_redis::Pool, hot_key: Arc<dyn HotKeyDetector>) -> Self {
        Self { pool, hot_key }
    }
}

#[async_trait]
impl CacheBuilder for RedisCacheBuilder {
    fn kind(&self) -> CacheKind {
        CacheKind::Redis
    }

    async fn build(&self, cache_name: &str, config: &CacheConfig) -> Result<Arc<dyn Cache>> {
        Ok(Arc::new(RedisCache::new(
            cache_name,
            config.spec(cache_name),
            config.redis.clone(),
            self.pool.clone(),
            Arc::clone(&self.hot_key),
        )))
    }
}

/// Builds composite caches: a local tier in front of the Redis tier.
///
/// The inner tiers get no sync policy; the composite publishes for the
/// pair.
pub struct CompositeCacheBuilder {
    pool: deadpool_redis::Pool,
    hot_key: Arc<dyn HotKeyDetector>,
    local: LocalCacheBuilder,
    sync: Option<Arc<dyn CacheSyncPolicy>>,
}

impl CompositeCacheBuilder {
    pub fn new(
        pool: deadpool_redis::Pool,
        hot_key: Arc<dyn HotKeyDetector>,
        local: LocalCacheBuilder,
        sync: Option<Arc<dyn CacheSyncPolicy>>,
    ) -> Self {
        Self {
            pool,
            hot_key,
            local,
            sync,
        }
    }

    /// Spec both tiers run with. The store-wide default TTL is folded in
    /// here: if only `redis.default_ttl_ms` is set, L2 would expire entries
    /// while a promoted L1 copy lives forever, so the tiers must see the
    /// same effective TTL.
    fn effective_spec(&self, cache_name: &str, config: &CacheConfig) -> CacheSpec {
        let mut spec = config.spec(cache_name);
        spec.ttl = spec.ttl.or(normalize_ttl(config.redis.default_ttl_ms));
        spec
    }
}

#[async_trait]
impl CacheBuilder for CompositeCacheBuilder {
    fn kind(&self) -> CacheKind {
        CacheKind::Composite
    }

    async fn build(&self, cache_name: &str, config: &CacheConfig) -> Result<Arc<dyn Cache>> {
        let spec = self.effective_spec(cache_name, config);
        let l1 = self.local.build_inner(cache_name, spec.clone());
        let l2 = Arc::new(RedisCache::new(
            cache_name,
            spec,
            config.redis.clone(),
            self.pool.clone(),
            Arc::clone(&self.hot_key),
        ));
        Ok(CompositeCache::new(
            cache_name,
            config.settings(cache_name).composite.clone(),
            l1,
            l2,
            self.sync.clone(),
        ))
    }

    fn parse_spec(&self, cache_name: &str, config: &CacheConfig) -> CacheSpec {
        self.effective_spec(cache_name, config)
    }
}
