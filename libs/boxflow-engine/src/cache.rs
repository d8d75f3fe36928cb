//! In-memory result cache for subscription runs.
//!
//! The key covers every input that affects the result: source URL,
//! user-agent tri-state, request headers, tag filters and mode. Never key
//! by profile identity alone.

use std::collections::HashMap;
use std::sync::RwLock;

use boxflow_api::model::{PipelineContext, PipelineMode, ServersResult, SubscriptionSource};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    url: String,
    user_agent: Option<String>,
    headers: String,
    tag_filters: String,
    mode: PipelineMode,
}

impl CacheKey {
    pub fn for_run(source: &SubscriptionSource, ctx: &PipelineContext) -> Self {
        // headers is a BTreeMap, so this serialization is deterministic.
        let headers = serde_json::to_string(&source.headers).unwrap_or_default();
        let tag_filters = ctx
            .metadata
            .get("tag_filters")
            .map(|v| v.to_string())
            .unwrap_or_default();
        Self {
            url: source.url.clone(),
            user_agent: source.user_agent.clone(),
            headers,
            tag_filters,
            mode: ctx.mode,
        }
    }
}

/// Concurrent map from cache key to run result. Writers take the write
/// lock, readers the read lock; the lock is released before the cached
/// artifact is returned.
#[derive(Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<CacheKey, ServersResult>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<ServersResult> {
        let guard = match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("result cache read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, result: ServersResult) {
        let mut guard = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("result cache write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.insert(key, result);
    }

    pub fn remove(&self, key: &CacheKey) {
        if let Ok(mut guard) = self.entries.write() {
            guard.remove(key);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.write() {
            guard.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
