//! Core abstractions of the stratocache two-tier caching engine.
//!
//! This crate defines the [`Cache`] contract and the tiers that need no
//! backing store: the pass-through [`NoneCache`], the in-process
//! [`LocalCache`], and the [`CompositeCache`] that stacks a local tier in
//! front of any backing store. The Redis backing store and its sync
//! transport live in `stratocache-redis`.

pub mod builder;
pub mod cache;
pub mod composite;
pub mod config;
pub mod error;
pub mod hotkey;
pub mod listener;
pub mod loader;
pub mod local;
pub mod none;
pub mod registry;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use builder::{CacheBuilder, LocalCacheBuilder, NoneCacheBuilder};
pub use cache::{Cache, CacheExt, CacheKind};
pub use composite::CompositeCache;
pub use config::{
    CacheConfig, CacheSettings, CacheSpec, CompositeSettings, HotKeySettings, RedisSettings,
    SyncSettings,
};
pub use error::{CacheError, Result};
pub use hotkey::{HotKeyDetector, NoopHotKeyDetector, StaticHotKeyDetector};
pub use listener::{CacheExpiredListener, EvictionCause, NoopExpiredListener};
pub use loader::ValueLoader;
pub use local::LocalCache;
pub use none::NoneCache;
pub use registry::{CacheRegistry, ComponentRegistry};
pub use store::StoreValue;
pub use sync::{CacheSyncPolicy, NoopSyncPolicy, SyncMessage, SyncOp};
