//! Tier construction seam.
//!
//! Each tier variant registers a builder; the cache manager resolves the
//! configured [`CacheKind`] for a cache name and delegates construction.
//! Builders carry the shared components (listeners, sync policy) so the
//! caches they produce are wired consistently.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{Cache, CacheKind};
use crate::config::{CacheConfig, CacheSpec};
use crate::error::Result;
use crate::listener::{CacheExpiredListener, NoopExpiredListener};
use crate::local::LocalCache;
use crate::none::NoneCache;
use crate::sync::CacheSyncPolicy;

/// Builds one cache instance for a cache name.
#[async_trait]
pub trait CacheBuilder: Send + Sync {
    /// The tier variant this builder produces.
    fn kind(&self) -> CacheKind;

    /// Build the cache for `cache_name` using its resolved settings.
    async fn build(&self, cache_name: &str, config: &CacheConfig) -> Result<Arc<dyn Cache>>;

    /// The settings the built cache will run with.
    fn parse_spec(&self, cache_name: &str, config: &CacheConfig) -> CacheSpec {
        config.spec(cache_name)
    }
}

/// Builds pass-through caches.
#[derive(Debug, Default)]
pub struct NoneCacheBuilder;

#[async_trait]
impl CacheBuilder for NoneCacheBuilder {
    fn kind(&self) -> CacheKind {
        CacheKind::None
    }

    async fn build(&self, cache_name: &str, _config: &CacheConfig) -> Result<Arc<dyn Cache>> {
        Ok(Arc::new(NoneCache::new(cache_name)))
    }
}

/// Builds standalone local (L1) caches.
pub struct LocalCacheBuilder {
    expired_listener: Arc<dyn CacheExpiredListener>,
    /// Standalone L1 caches publish their own sync notifications; inside a
    /// composite the outer tier does, so composites build their L1 without
    /// this.
    sync: Option<Arc<dyn CacheSyncPolicy>>,
}

impl Default for LocalCacheBuilder {
    fn default() -> Self {
        Self {
            expired_listener: Arc::new(NoopExpiredListener),
            sync: None,
        }
    }
}

impl LocalCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expired_listener(mut self, listener: Arc<dyn CacheExpiredListener>) -> Self {
        self.expired_listener = listener;
        self
    }

    pub fn with_sync(mut self, sync: Arc<dyn CacheSyncPolicy>) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Build the L1 half of a composite: the caller hands in the resolved
    /// spec so both tiers run with the same one, no sync publication.
    pub fn build_inner(&self, cache_name: &str, spec: CacheSpec) -> Arc<LocalCache> {
        LocalCache::new(cache_name, spec, Arc::clone(&self.expired_listener), None)
    }
}

#[async_trait]
impl CacheBuilder for LocalCacheBuilder {
    fn kind(&self) -> CacheKind {
        CacheKind::Local
    }

    async fn build(&self, cache_name: &str, config: &CacheConfig) -> Result<Arc<dyn Cache>> {
        Ok(LocalCache::new(
            cache_name,
            config.spec(cache_name),
            Arc::clone(&self.expired_listener),
            self.sync.clone(),
        ))
    }
}
