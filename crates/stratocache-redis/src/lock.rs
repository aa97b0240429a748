//! Redis-backed distributed lock for the cluster-wide load guard.
//!
//! Acquisition is `SET key token NX PX ttl`; release is a compare-and-delete
//! script so one holder can never delete another holder's lock after its own
//! TTL ran out. The TTL bounds how long a crashed holder blocks its peers —
//! there is no fencing beyond that, which is acceptable for a cache load
//! guard where the worst case is a redundant loader run.

use std::time::Duration;

use stratocache_core::error::{CacheError, Result};

/// `if get(key) == token then del(key)`, atomically.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct DistributedLock {
    pool: deadpool_redis::Pool,
    ttl: Duration,
    retry_interval: Duration,
}

impl DistributedLock {
    pub fn new(pool: deadpool_redis::Pool, ttl: Duration, retry_interval: Duration) -> Self {
        Self {
            pool,
            ttl,
            retry_interval,
        }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::store(format!("redis pool: {e}")))
    }

    /// One acquisition attempt. Returns the holder token on success and
    /// `None` when another holder owns the lock.
    pub async fn try_acquire(&self, lock_key: &str) -> Result<Option<String>> {
        let token = uuid::Uuid::new_v4().to_string();
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(lock_key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::store(format!("lock acquire: {e}")))?;
        Ok(reply.map(|_| token))
    }

    /// Acquire, retrying until the current holder releases or its TTL
    /// expires.
    pub async fn acquire(&self, lock_key: &str) -> Result<String> {
        loop {
            if let Some(token) = self.try_acquire(lock_key).await? {
                return Ok(token);
            }
            tracing::trace!(lock_key = %lock_key, "lock held elsewhere, retrying");
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Release the lock if `token` still owns it. Returns whether the lock
    /// was actually deleted; `false` means the TTL already expired and
    /// someone else may hold it now.
    pub async fn release(&self, lock_key: &str, token: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(lock_key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::store(format!("lock release: {e}")))?;
        Ok(deleted == 1)
    }
}
