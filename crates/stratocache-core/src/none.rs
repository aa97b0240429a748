//! Pass-through tier: stores nothing, every read recomputes.
//!
//! Useful for disabling caching for a cache name without touching call
//! sites.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::{Cache, CacheKind};
use crate::error::{CacheError, Result};
use crate::loader::ValueLoader;

pub struct NoneCache {
    name: String,
}

impl NoneCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Cache for NoneCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CacheKind {
        CacheKind::None
    }

    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn get_or_load(&self, key: &str, loader: Arc<ValueLoader>) -> Result<Option<Value>> {
        let value = loader
            .load()
            .await
            .map_err(|e| CacheError::loader(&self.name, key, e))?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn put(&self, _key: &str, _value: Value) -> Result<()> {
        Ok(())
    }

    async fn put_if_absent(&self, _key: &str, _value: Value) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn evict(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }
}
