//! Backing-store (L2) tier on Redis.
//!
//! Every cache name shares one flat keyspace; an entry's physical key is
//! `"<cacheName>:<key>"`. Hot keys can be duplicated: writes fan out to
//! every copy (`"<cacheName>:<key><index>"`) on top of the base key, reads
//! pick one copy at random, spreading the traffic over cluster shards.
//!
//! Loads can be guarded by a distributed lock so that, cluster-wide, at
//! most one process runs the loader for a key at a time. In try-lock mode
//! a competing load fails fast with `LockContention` instead of queueing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;

use stratocache_core::cache::{Cache, CacheKind};
use stratocache_core::config::{CacheSpec, RedisSettings, normalize_ttl};
use stratocache_core::error::{CacheError, Result};
use stratocache_core::hotkey::HotKeyDetector;
use stratocache_core::loader::ValueLoader;
use stratocache_core::store::{StoreValue, resolve_expire_time};

use crate::lock::DistributedLock;

pub struct RedisCache {
    name: String,
    spec: CacheSpec,
    settings: RedisSettings,
    pool: deadpool_redis::Pool,
    lock: DistributedLock,
    hot_key: Arc<dyn HotKeyDetector>,
}

impl RedisCache {
    pub fn new(
        name: impl Into<String>,
        spec: CacheSpec,
        settings: RedisSettings,
        pool: deadpool_redis::Pool,
        hot_key: Arc<dyn HotKeyDetector>,
    ) -> Self {
        let lock = DistributedLock::new(
            pool.clone(),
            Duration::from_millis(settings.lock_ttl_ms),
            Duration::from_millis(settings.lock_retry_ms),
        );
        Self {
            name: name.into(),
            spec,
            settings,
            pool,
            lock,
            hot_key,
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

    /// Physical base key: `"<cacheName>:<key>"`.
    fn build_key(&self, key: &str) -> String {
        format!("{}:{}", self.name, key)
    }

    fn lock_key(&self, base_key: &str) -> String {
        format!("{base_key}:lock")
    }

    /// Duplicate copy count for a key, if duplication applies: static
    /// configuration first (per-key, per-cache-name, all-keys default),
    /// then the hot-key detector at the default size.
    fn duplicate_size(&self, key: &str) -> Option<usize> {
        if !self.settings.duplicate {
            return None;
        }
        let base_key = self.build_key(key);
        if let Some(size) = self
            .settings
            .configured_duplicate_size(&self.name, &base_key)
        {
            return Some(size);
        }
        let build = |k: &str| self.build_key(k);
        self.hot_key
            .is_hot_key(key, &build)
            .then_some(self.settings.default_duplicate_size)
            .filter(|size| *size > 0)
    }

    /// Keys a write touches: the base key plus every duplicate copy.
    fn write_keys(&self, key: &str) -> Vec<String> {
        let base_key = self.build_key(key);
        let mut keys = match self.duplicate_size(key) {
            Some(size) => {
                let mut copies = Vec::with_capacity(size + 1);
                copies.extend((0..size).map(|i| format!("{base_key}{i}")));
                copies
            }
            None => Vec::with_capacity(1),
        };
        keys.insert(0, base_key);
        keys
    }

    /// Key a read goes to: a random duplicate copy when duplication is on,
    /// the base key otherwise.
    fn read_key(&self, key: &str) -> String {
        let base_key = self.build_key(key);
        match self.duplicate_size(key) {
            Some(size) => {
                let index = rand::thread_rng().gen_range(0..size);
                format!("{base_key}{index}")
            }
            None => base_key,
        }
    }

    /// Effective entry TTL: the cache spec's TTL, falling back to the
    /// store-wide default, with the null sentinel overridden to its own
    /// shorter TTL.
    fn entry_ttl(&self, stored: &StoreValue) -> Option<Duration> {
        let ttl = self.spec.ttl.or(normalize_ttl(self.settings.default_ttl_ms));
        resolve_expire_time(stored, ttl, self.spec.null_value_ttl)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::store(format!("redis pool: {e}")))
    }

    async fn read_stored(&self, key: &str) -> Result<Option<StoreValue>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.read_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::store(format!("redis get: {e}")))?;
        raw.map(|r| StoreValue::from_wire(&r).map_err(CacheError::from))
            .transpose()
    }

    async fn write_stored(&self, key: &str, stored: &StoreValue) -> Result<()> {
        let wire = stored.to_wire()?;
        let ttl = self.entry_ttl(stored);
        let keys = self.write_keys(key);
        tracing::debug!(
            cache_name = %self.name,
            key = %key,
            copies = keys.len(),
            ttl_ms = ttl.map(|d| d.as_millis() as u64),
            "redis put"
        );

        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        for physical_key in &keys {
            let cmd = pipe.cmd("SET").arg(physical_key).arg(&wire);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl.as_millis() as u64);
            }
            cmd.ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::store(format!("redis set: {e}")))
    }

    async fn delete_all_copies(&self, key: &str) -> Result<()> {
        let keys = self.write_keys(key);
        tracing::debug!(
            cache_name = %self.name,
            key = %key,
            copies = keys.len(),
            "redis evict"
        );
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(&keys)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::store(format!("redis del: {e}")))
    }

    /// Run the loader and store its result. Null with null caching off is
    /// returned to the caller but never stored.
    async fn load_and_store(&self, key: &str, loader: &Arc<ValueLoader>) -> Result<Option<Value>> {
        let value = loader
            .load()
            .await
            .map_err(|e| CacheError::loader(&self.name, key, e))?;
        match StoreValue::encode(value, self.spec.allow_null_values) {
            Some(stored) => {
                self.write_stored(key, &stored).await?;
                Ok(stored.decode())
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CacheKind {
        CacheKind::Redis
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.validate_key(key)?;
        Ok(self.read_stored(key).await?.and_then(StoreValue::decode))
    }

    async fn get_or_load(&self, key: &str, loader: Arc<ValueLoader>) -> Result<Option<Value>> {
        self.validate_key(key)?;
        if let Some(stored) = self.read_stored(key).await? {
            return Ok(stored.decode());
        }
        if !self.settings.lock {
            return self.load_and_store(key, &loader).await;
        }

        let lock_key = self.lock_key(&self.build_key(key));
        let token = if self.settings.try_lock {
            self.lock
                .try_acquire(&lock_key)
                .await?
                .ok_or_else(|| CacheError::lock_contention(&self.name, key))?
        } else {
            self.lock.acquire(&lock_key).await?
        };

        // Another process may have loaded while we waited for the lock.
        let result = match self.read_stored(key).await {
            Ok(Some(stored)) => Ok(stored.decode()),
            Ok(None) => self.load_and_store(key, &loader).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.lock.release(&lock_key, &token).await {
            tracing::warn!(
                cache_name = %self.name,
                key = %key,
                error = %e,
                "lock release failed, lock will expire on its own"
            );
        }
        result
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.validate_key(key)?;
        match StoreValue::encode(value, self.spec.allow_null_values) {
            Some(stored) => self.write_stored(key, &stored).await,
            None => self.delete_all_copies(key).await,
        }
    }

    async fn put_if_absent(&self, key: &str, value: Value) -> Result<Option<Value>> {
        self.validate_key(key)?;
        let Some(stored) = StoreValue::encode(value, self.spec.allow_null_values) else {
            return self.get(key).await;
        };
        let wire = stored.to_wire()?;
        let ttl = self.entry_ttl(&stored);
        let base_key = self.build_key(key);
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(&base_key).arg(&wire).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        let reply: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::store(format!("redis set nx: {e}")))?;
        if reply.is_some() {
            // Won the base key: the duplicate copies follow the winner.
            let copies = &self.write_keys(key)[1..];
            if !copies.is_empty() {
                let mut pipe = redis::pipe();
                for physical_key in copies {
                    let cmd = pipe.cmd("SET").arg(physical_key).arg(&wire).arg("NX");
                    if let Some(ttl) = ttl {
                        cmd.arg("PX").arg(ttl.as_millis() as u64);
                    }
                    cmd.ignore();
                }
                pipe.query_async::<()>(&mut conn)
                    .await
                    .map_err(|e| CacheError::store(format!("redis set nx: {e}")))?;
            }
            return Ok(None);
        }

        // Lost the race: report what is there now.
        let existing: Option<String> = redis::cmd("GET")
            .arg(&base_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::store(format!("redis get: {e}")))?;
        existing
            .map(|r| StoreValue::from_wire(&r).map_err(CacheError::from))
            .transpose()
            .map(|stored| stored.and_then(StoreValue::decode))
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.validate_key(key)?;
        self.delete_all_copies(key).await
    }

    async fn clear(&self) -> Result<()> {
        // The flat keyspace keeps no per-cache-name index; scanning for
        // a prefix across a production keyspace is not an option.
        Err(CacheError::unsupported("clear", "redis"))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.validate_key(key)?;
        let mut conn = self.connection().await?;
        redis::cmd("EXISTS")
            .arg(self.read_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::store(format!("redis exists: {e}")))
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Value>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        for key in keys {
            self.validate_key(key)?;
        }
        let physical_keys: Vec<String> = keys.iter().map(|k| self.read_key(k)).collect();
        let mut conn = self.connection().await?;
        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&physical_keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::store(format!("redis mget: {e}")))?;

        let mut values = Vec::with_capacity(keys.len());
        for raw in raws.into_iter().flatten() {
            if let Some(value) = StoreValue::from_wire(&raw)?.decode() {
                values.push(value);
            }
        }
        Ok(values)
    }

    async fn batch_put(&self, entries: Vec<(String, Value)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            self.validate_key(&key)?;
            match StoreValue::encode(value, self.spec.allow_null_values) {
                Some(stored) => {
                    let wire = stored.to_wire()?;
                    let ttl = self.entry_ttl(&stored);
                    // Duplication applies to batch writes exactly as to
                    // single writes: every copy gets the new value.
                    for physical_key in self.write_keys(&key) {
                        let cmd = pipe.cmd("SET").arg(physical_key).arg(&wire);
                        if let Some(ttl) = ttl {
                            cmd.arg("PX").arg(ttl.as_millis() as u64);
                        }
                        cmd.ignore();
                    }
                }
                None => {
                    pipe.cmd("DEL").arg(self.write_keys(&key)).ignore();
                }
            }
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::store(format!("redis batch put: {e}")))
    }
}
