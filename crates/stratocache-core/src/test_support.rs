//! Shared fixtures for in-crate tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::sync::{CacheSyncPolicy, SyncMessage, SyncOp};

/// Sync policy that records every published message.
pub(crate) struct RecordingSyncPolicy {
    instance_id: String,
    messages: Mutex<Vec<SyncMessage>>,
}

impl RecordingSyncPolicy {
    pub(crate) fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn count(&self, op: SyncOp) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.op == op)
            .count()
    }
}

#[async_trait]
impl CacheSyncPolicy for RecordingSyncPolicy {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, cache_name: &str, key: &str, op: SyncOp) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(SyncMessage::new(cache_name, key, &self.instance_id, op));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
