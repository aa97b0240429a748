//! Explicit, owned registries.
//!
//! Built caches are keyed by cache name in a [`CacheRegistry`] held by the
//! cache manager and the sync listener — never ambient global state.
//! Pluggable components (sync policies, hot-key detectors) resolve through
//! a [`ComponentRegistry`] mapping a configuration string to an instance,
//! populated once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::cache::Cache;
use crate::error::{CacheError, Result};

/// Registry of built caches, keyed by cache name.
#[derive(Default)]
pub struct CacheRegistry {
    caches: DashMap<String, Arc<dyn Cache>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cache: Arc<dyn Cache>) {
        self.caches.insert(cache.name().to_string(), cache);
    }

    pub fn get(&self, cache_name: &str) -> Option<Arc<dyn Cache>> {
        self.caches.get(cache_name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, cache_name: &str) -> Option<Arc<dyn Cache>> {
        self.caches.remove(cache_name).map(|(_, cache)| cache)
    }

    pub fn names(&self) -> Vec<String> {
        self.caches.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Drop every built cache. Dropping a cache aborts its background
    /// tasks.
    pub fn clear(&self) {
        self.caches.clear();
    }
}

/// Maps a configuration string to a component instance.
pub struct ComponentRegistry<T: ?Sized> {
    entries: HashMap<String, Arc<T>>,
    what: &'static str,
}

impl<T: ?Sized> ComponentRegistry<T> {
    pub fn new(what: &'static str) -> Self {
        Self {
            entries: HashMap::new(),
            what,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, component: Arc<T>) -> &mut Self {
        self.entries.insert(name.into(), component);
        self
    }

    /// Resolve a configured component name.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` for names nothing was registered
    /// under.
    pub fn resolve(&self, name: &str) -> Result<Arc<T>> {
        self.entries.get(name).cloned().ok_or_else(|| {
            CacheError::config(format!(
                "no {} registered under '{name}' (known: {:?})",
                self.what,
                self.entries.keys().collect::<Vec<_>>()
            ))
        })
    }
}
