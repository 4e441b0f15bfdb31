//! The client's path-to-instance cache.
//!
//! A path is bound to an instance by the first `stat` that succeeds and
//! stays bound for the client's lifetime; there is no invalidation. If a
//! later remove deletes the path on that instance, subsequent operations
//! correctly surface `ENOENT`.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Concurrent map from absolute path to instance index. Read on every RPC,
/// written by `stat`.
#[derive(Debug, Default)]
pub struct PathCache {
    inner: RwLock<HashMap<String, usize>>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The instance bound to `path`, if any.
    pub fn get(&self, path: &str) -> Option<usize> {
        self.inner.read().get(path).copied()
    }

    /// Bind `path` to `instance`, replacing any previous binding.
    pub fn insert(&self, path: &str, instance: usize) {
        self.inner.write().insert(path.to_string(), instance);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
