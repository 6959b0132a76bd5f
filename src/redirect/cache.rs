//! Lookup cache - request URL to filtered candidate list

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use super::matcher::Candidate;

/// Cache of filtered candidates keyed by the exact request URL
#[async_trait]
pub trait RedirectCache: Send + Sync {
    async fn get(&self, url: &str) -> Option<Vec<Candidate>>;

    async fn put(&self, url: &str, candidates: Vec<Candidate>);

    /// Drop every entry
    async fn clear(&self);
}

/// In-process LRU cache, empty at startup. Holds at most `capacity` URLs;
/// the least recently used entry is evicted first.
pub struct MemoryRedirectCache {
    entries: Mutex<LruCache<String, Vec<Candidate>>>,
}

impl MemoryRedirectCache {
    /// A zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl RedirectCache for MemoryRedirectCache {
    async fn get(&self, url: &str) -> Option<Vec<Candidate>> {
        self.entries.lock().await.get(url).cloned()
    }

    async fn put(&self, url: &str, candidates: Vec<Candidate>) {
        self.entries.lock().await.put(url.to_string(), candidates);
    }

    async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        entries.clear();
        tracing::debug!("Redirect cache cleared ({} entries)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_clear() {
        let cache = MemoryRedirectCache::new(16);
        assert!(cache.get("/old").await.is_none());

        cache.put("/old", Vec::new()).await;
        assert_eq!(cache.get("/old").await, Some(Vec::new()));
        assert!(cache.get("/old?x=1").await.is_none());
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.get("/old").await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_size_is_capped() {
        let cache = MemoryRedirectCache::new(100);
        for i in 0..5_000 {
            cache.put(&format!("/missing?junk={}", i), Vec::new()).await;
        }
        assert_eq!(cache.len().await, 100);
        assert!(cache.get("/missing?junk=4999").await.is_some());
        assert!(cache.get("/missing?junk=0").await.is_none());
    }

    #[tokio::test]
    async fn test_recently_read_entry_survives_eviction() {
        let cache = MemoryRedirectCache::new(2);
        cache.put("/a", Vec::new()).await;
        cache.put("/b", Vec::new()).await;
        assert!(cache.get("/a").await.is_some());

        cache.put("/c", Vec::new()).await;
        assert!(cache.get("/a").await.is_some());
        assert!(cache.get("/b").await.is_none());
    }

    #[tokio::test]
    async fn test_zero_capacity_keeps_one_entry() {
        let cache = MemoryRedirectCache::new(0);
        cache.put("/a", Vec::new()).await;
        cache.put("/b", Vec::new()).await;
        assert_eq!(cache.len().await, 1);
    }
}
