//! Cross-process cache synchronization contract.
//!
//! Each process owns no authority over its peers' L1 state except through
//! the messages broadcast here. Transport is pluggable; the Redis pub/sub
//! implementation lives in the `stratocache-redis` crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What a peer should do with its local copy of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOp {
    /// Re-run the stored loader recipe (or drop the copy when there is
    /// none). Published after a loader actually executed and after writes.
    Refresh,
    /// Drop the local copy of one key.
    Evict,
    /// Drop every local copy of the cache name.
    Clear,
}

/// Wire payload broadcast on the sync channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub cache_name: String,
    pub key: String,
    /// Id of the publishing process, for self-echo suppression.
    pub instance_id: String,
    pub op: SyncOp,
}

impl SyncMessage {
    pub fn new(
        cache_name: impl Into<String>,
        key: impl Into<String>,
        instance_id: impl Into<String>,
        op: SyncOp,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: key.into(),
            instance_id: instance_id.into(),
            op,
        }
    }

    /// Whether this message was published by the given instance.
    pub fn is_from(&self, instance_id: &str) -> bool {
        self.instance_id == instance_id
    }
}

/// Publish/subscribe policy propagating key-change notifications between
/// process instances.
///
/// A publish failure must never fail the cache operation that triggered
/// it; callers log and swallow the error.
#[async_trait]
pub trait CacheSyncPolicy: Send + Sync {
    /// Id of this process instance, stamped into outgoing messages.
    fn instance_id(&self) -> &str;

    /// Transition Disconnected -> Listening: start receiving peer
    /// notifications and applying them to local tiers.
    async fn connect(&self) -> Result<()>;

    /// Broadcast one key-change notification.
    async fn publish(&self, cache_name: &str, key: &str, op: SyncOp) -> Result<()>;

    /// Transition Listening -> Disconnected: stop the listener.
    async fn disconnect(&self) -> Result<()>;
}

/// Default policy: no cross-process synchronization.
#[derive(Debug, Default)]
pub struct NoopSyncPolicy {
    instance_id: String,
}

impl NoopSyncPolicy {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }
}

#[async_trait]
impl CacheSyncPolicy for NoopSyncPolicy {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, _cache_name: &str, _key: &str, _op: SyncOp) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
