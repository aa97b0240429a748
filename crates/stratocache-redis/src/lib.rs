//! Redis backing store for stratocache.
//!
//! Provides the L2 [`RedisCache`] tier, the [`DistributedLock`] guarding
//! cluster-wide loads, the [`RedisSyncPolicy`] broadcasting key changes
//! over pub/sub, and the [`CacheManager`] that wires everything together
//! from a [`CacheConfig`](stratocache_core::config::CacheConfig).

use std::time::Duration;

use stratocache_core::config::RedisSettings;
use stratocache_core::error::{CacheError, Result};

pub mod builder;
pub mod cache;
pub mod lock;
pub mod manager;
pub mod sync;

pub use builder::{CompositeCacheBuilder, RedisCacheBuilder};
pub use cache::RedisCache;
pub use lock::DistributedLock;
pub use manager::{CacheManager, CacheManagerBuilder};
pub use sync::RedisSyncPolicy;

/// Create the shared connection pool from the backing-store settings.
///
/// The pool connects lazily; a bad URL fails here, an unreachable server
/// fails on first use.
pub fn create_pool(settings: &RedisSettings) -> Result<deadpool_redis::Pool> {
    let mut config = deadpool_redis::Config::from_url(&settings.url);
    let mut pool_config = deadpool_redis::PoolConfig::new(settings.pool_size);
    pool_config.timeouts.wait = Some(Duration::from_millis(settings.timeout_ms));
    pool_config.timeouts.create = Some(Duration::from_millis(settings.timeout_ms));
    config.pool = Some(pool_config);
    config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| CacheError::config(format!("redis pool: {e}")))
}
