//! Per-call execution context and the process-wide result cache.
//!
//! The context is built for every invocation and handed to the function by value, so
//! concurrent calls never observe each other's permissions or targets.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::cluster::{ClusterTransport, NodeInfo};

/// Authorization and runtime context of one invocation
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub rbac_permissions: Map<String, Value>,
    pub broadcasting: bool,
    pub nodes: Vec<String>,
    pub current_user: Option<String>,
    pub origin_module: String,
    /// Node executing the function
    pub node: NodeInfo,
    /// Transport handed over when the request names a local client argument
    pub local_client: Option<Arc<dyn ClusterTransport>>,
    pub cache: Arc<ContextCache>,
}

impl ExecutionContext {
    /// Cached value for `key`, computed once per call
    pub fn cached<F>(&self, key: &str, compute: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        self.cache.get_or_insert_with(key, compute)
    }
}

/// Cache for computations reused within a call
#[derive(Debug, Default)]
pub struct ContextCache {
    entries: DashMap<String, Value>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get_or_insert_with<F>(&self, key: &str, compute: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        self.entries
            .entry(key.to_string())
            .or_insert_with(compute)
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Clear the cache when the returned guard drops, whatever the call outcome
    pub fn reset_on_drop(self: &Arc<Self>) -> CacheReset {
        CacheReset {
            cache: Arc::clone(self),
        }
    }
}

/// Clears a [`ContextCache`] on drop
#[derive(Debug)]
pub struct CacheReset {
    cache: Arc<ContextCache>,
}

impl Drop for CacheReset {
    fn drop(&mut self) {
        self.cache.clear();
    }
}
