// src/cache.rs
// Sliding advisory cache (§5): a bounded map of recently seen
// `currentMessageHash -> (conversationId, branchId, requestId)` entries used
// to short-circuit store lookups. A miss always falls back to the store;
// this cache is never authoritative.

use crate::model::{ConversationId, RequestId};
use moka::sync::Cache;

/// Default capacity from §5: "bounded size (≤ 50 000)".
pub const DEFAULT_CAPACITY: u64 = 50_000;

#[derive(Debug, Clone)]
pub struct CachedLinkage {
    pub conversation_id: ConversationId,
    pub branch_id: String,
    pub request_id: RequestId,
}

pub struct HashCache {
    inner: Cache<String, CachedLinkage>,
}

impl HashCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::new(capacity),
        }
    }

    pub fn lookup(&self, hash: &str) -> Option<CachedLinkage> {
        self.inner.get(hash)
    }

    pub fn insert(&self, hash: String, linkage: CachedLinkage) {
        self.inner.insert(hash, linkage);
    }
}

impl Default for HashCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn miss_then_hit_after_insert() {
        let cache = HashCache::new(10);
        assert!(cache.lookup("abc").is_none());
        cache.insert(
            "abc".to_string(),
            CachedLinkage {
                conversation_id: ConversationId(Uuid::new_v4()),
                branch_id: "main".to_string(),
                request_id: RequestId(Uuid::new_v4()),
            },
        );
        assert!(cache.lookup("abc").is_some());
    }
}
