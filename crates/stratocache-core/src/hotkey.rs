//! Hot-key detection.
//!
//! A pure predicate consulted before applying the duplication strategy on
//! a write. Pluggable so an external telemetry feed can drive it; the
//! default detector reports nothing hot, keeping the feature dependency
//! free.

use std::collections::HashSet;

/// Decides whether a key receives disproportionate traffic and should be
/// spread across duplicate physical keys.
pub trait HotKeyDetector: Send + Sync {
    /// Pure predicate, no side effects. `key_builder` maps the raw key to
    /// the full backing-store key so detectors can match on either form.
    fn is_hot_key(&self, key: &str, key_builder: &dyn Fn(&str) -> String) -> bool;
}

/// Default detector: nothing is ever hot.
#[derive(Debug, Default)]
pub struct NoopHotKeyDetector;

impl HotKeyDetector for NoopHotKeyDetector {
    fn is_hot_key(&self, _key: &str, _key_builder: &dyn Fn(&str) -> String) -> bool {
        false
    }
}

/// Detector backed by a static configuration list of built keys.
#[derive(Debug, Default)]
pub struct StaticHotKeyDetector {
    keys: HashSet<String>,
}

impl StaticHotKeyDetector {
    pub fn new(keys: HashSet<String>) -> Self {
        Self { keys }
    }
}

impl HotKeyDetector for StaticHotKeyDetector {
    fn is_hot_key(&self, key: &str, key_builder: &dyn Fn(&str) -> String) -> bool {
        self.keys.contains(&key_builder(key))
    }
}
