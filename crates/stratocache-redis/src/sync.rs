//! Cross-process synchronization over Redis pub/sub.
//!
//! Every process publishes key-change notifications to one topic and
//! listens on the same topic, applying peer notifications to the local
//! tiers of its registered caches. Delivery is fire-and-forget: a process
//! that is down during a broadcast misses it and converges through TTL
//! expiry instead.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use stratocache_core::error::{CacheError, Result};
use stratocache_core::registry::CacheRegistry;
use stratocache_core::sync::{CacheSyncPolicy, SyncMessage, SyncOp};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

pub struct RedisSyncPolicy {
    instance_id: String,
    topic: String,
    async_publish: bool,
    pool: deadpool_redis::Pool,
    /// Dedicated client for the subscriber connection: a pub/sub
    /// connection cannot issue regular commands, so it must not come from
    /// the shared pool.
    client: redis::Client,
    registry: Arc<CacheRegistry>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RedisSyncPolicy {
    pub fn new(
        instance_id: impl Into<String>,
        topic: impl Into<String>,
        async_publish: bool,
        url: &str,
        pool: deadpool_redis::Pool,
        registry: Arc<CacheRegistry>,
    ) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::config(format!("redis sync url: {e}")))?;
        Ok(Self {
            instance_id: instance_id.into(),
            topic: topic.into(),
            async_publish,
            pool,
            client,
            registry,
            listener: Mutex::new(None),
        })
    }

    async fn publish_message(
        pool: &deadpool_redis::Pool,
        topic: &str,
        message: &SyncMessage,
    ) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = pool
            .get()
            .await
            .map_err(|e| CacheError::sync(format!("redis pool: {e}")))?;
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::sync(format!("publish: {e}")))?;
        tracing::debug!(
            cache_name = %message.cache_name,
            key = %message.key,
            op = ?message.op,
            receivers,
            "sync message published"
        );
        Ok(())
    }

    /// Apply one peer notification to the named cache's local tier.
    async fn apply(registry: &CacheRegistry, message: &SyncMessage) {
        let Some(cache) = registry.get(&message.cache_name) else {
            tracing::trace!(
                cache_name = %message.cache_name,
                "sync message for unknown cache name, ignoring"
            );
            return;
        };
        let result = match message.op {
            SyncOp::Refresh => cache.refresh(&message.key).await,
            SyncOp::Evict => cache.clear_local(Some(&message.key)).await,
            SyncOp::Clear => cache.clear_local(None).await,
        };
        if let Err(e) = result {
            tracing::warn!(
                cache_name = %message.cache_name,
                key = %message.key,
                op = ?message.op,
                error = %e,
                "failed to apply sync message"
            );
        }
    }

    /// One subscribe-and-drain session. Returns when the connection drops.
    async fn listen_session(
        client: &redis::Client,
        topic: &str,
        instance_id: &str,
        registry: &CacheRegistry,
    ) -> std::result::Result<(), redis::RedisError> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        tracing::info!(topic = %topic, "sync listener subscribed");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable sync payload, skipping");
                    continue;
                }
            };
            let message: SyncMessage = match serde_json::from_str(&payload) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, payload = %payload, "malformed sync message, skipping");
                    continue;
                }
            };
            if message.is_from(instance_id) {
                continue;
            }
            tracing::debug!(
                cache_name = %message.cache_name,
                key = %message.key,
                op = ?message.op,
                from = %message.instance_id,
                "sync message received"
            );
            Self::apply(registry, &message).await;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheSyncPolicy for RedisSyncPolicy {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn connect(&self) -> Result<()> {
        let mut guard = self
            .listener
            .lock()
            .map_err(|_| CacheError::sync("listener state poisoned"))?;
        if guard.is_some() {
            return Ok(());
        }

        let client = self.client.clone();
        let topic = self.topic.clone();
        let instance_id = self.instance_id.clone();
        let registry = Arc::clone(&self.registry);
        let handle = tokio::spawn(async move {
            let mut delay = INITIAL_RECONNECT_DELAY;
            loop {
                match Self::listen_session(&client, &topic, &instance_id, &registry).await {
                    Ok(()) => {
                        tracing::warn!(topic = %topic, "sync subscription ended, reconnecting");
                        delay = INITIAL_RECONNECT_DELAY;
                    }
                    Err(e) => {
                        tracing::warn!(
                            topic = %topic,
                            error = %e,
                            delay_secs = delay.as_secs(),
                            "sync listener error, reconnecting after backoff"
                        );
                    }
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
        });
        *guard = Some(handle);
        Ok(())
    }

    async fn publish(&self, cache_name: &str, key: &str, op: SyncOp) -> Result<()> {
        let message = SyncMessage::new(cache_name, key, &self.instance_id, op);
        if self.async_publish {
            let pool = self.pool.clone();
            let topic = self.topic.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::publish_message(&pool, &topic, &message).await {
                    tracing::warn!(
                        cache_name = %message.cache_name,
                        key = %message.key,
                        error = %e,
                        "async sync publish failed"
                    );
                }
            });
            Ok(())
        } else {
            Self::publish_message(&self.pool, &self.topic, &message).await
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let handle = self
            .listener
            .lock()
            .map_err(|_| CacheError::sync("listener state poisoned"))?
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!(topic = %self.topic, "sync listener stopped");
        }
        Ok(())
    }
}

impl Drop for RedisSyncPolicy {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock()
            && let Some(handle) = guard.take()
        {
            handle.abort();
        }
    }
}
