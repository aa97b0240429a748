//! Wrapper around the caller's "compute the value" function.
//!
//! The wrapper records whether the computation actually ran, which is what
//! decides whether a sync notification is published afterwards: a pure
//! cache hit must never broadcast, or read traffic would amplify into
//! cluster-wide write traffic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use serde_json::Value;

/// Boxed async computation producing the value for one key.
///
/// `Value::Null` means the lookup legitimately found nothing.
pub type LoaderFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A user-supplied loader plus bookkeeping for the sync protocol.
pub struct ValueLoader {
    cache_name: String,
    key: String,
    loader: LoaderFn,
    /// Set once the loader has run to completion.
    invoked: AtomicBool,
    /// Allows a caller to veto publication even when the loader ran.
    publish: AtomicBool,
}

impl ValueLoader {
    pub fn new<F, Fut>(
        cache_name: impl Into<String>,
        key: impl Into<String>,
        loader: F,
    ) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Arc::new(Self {
            cache_name: cache_name.into(),
            key: key.into(),
            loader: Box::new(move || Box::pin(loader())),
            invoked: AtomicBool::new(false),
            publish: AtomicBool::new(true),
        })
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Run the wrapped computation. The invoked flag is only set on
    /// success, so a failed load never triggers a sync publication.
    pub async fn load(&self) -> anyhow::Result<Value> {
        let value = (self.loader)().await?;
        self.invoked.store(true, Ordering::SeqCst);
        tracing::debug!(
            cache_name = %self.cache_name,
            key = %self.key,
            "value loader executed"
        );
        Ok(value)
    }

    /// Whether the computation actually ran (vs served from cache).
    pub fn was_invoked(&self) -> bool {
        self.invoked.load(Ordering::SeqCst)
    }

    pub fn set_publish(&self, publish: bool) {
        self.publish.store(publish, Ordering::SeqCst);
    }

    /// A sync message should go out only when the loader ran and
    /// publication was not vetoed.
    pub fn should_publish(&self) -> bool {
        self.was_invoked() && self.publish.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ValueLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueLoader")
            .field("cache_name", &self.cache_name)
            .field("key", &self.key)
            .field("invoked", &self.was_invoked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_invoked_flag_set_on_success() {
        let loader = ValueLoader::new("user", "u1", || async { Ok(json!("Alice")) });
        assert!(!loader.was_invoked());
        assert!(!loader.should_publish());

        let value = loader.load().await.unwrap();
        assert_eq!(value, json!("Alice"));
        assert!(loader.was_invoked());
        assert!(loader.should_publish());
    }

    #[tokio::test]
    async fn test_invoked_flag_not_set_on_failure() {
        let loader = ValueLoader::new("user", "u1", || async {
            Err(anyhow::anyhow!("db unavailable"))
        });
        assert!(loader.load().await.is_err());
        assert!(!loader.was_invoked());
        assert!(!loader.should_publish());
    }

    #[tokio::test]
    async fn test_publish_veto() {
        let loader = ValueLoader::new("user", "u1", || async { Ok(json!(1)) });
        loader.set_publish(false);
        loader.load().await.unwrap();
        assert!(loader.was_invoked());
        assert!(!loader.should_publish());
    }
}
