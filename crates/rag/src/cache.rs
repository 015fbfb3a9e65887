//! Retrieval cache
//!
//! Bounded LRU keyed by `(query digest, k, weights, index fingerprint)`.
//! Keying on the fingerprint means an index reload invalidates every entry
//! without an explicit flush.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use sqlscout_core::RetrievalResult;

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct RetrievalCache {
    inner: Mutex<LruCache<[u8; 32], Arc<RetrievalResult>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RetrievalCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key(
        query: &str,
        k: usize,
        vector_weight: f32,
        lexical_weight: f32,
        auto_adjust: bool,
        hybrid: bool,
        fingerprint: &str,
    ) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update([0u8]);
        hasher.update(k.to_le_bytes());
        hasher.update(vector_weight.to_bits().to_le_bytes());
        hasher.update(lexical_weight.to_bits().to_le_bytes());
        hasher.update([auto_adjust as u8, hybrid as u8]);
        hasher.update(fingerprint.as_bytes());
        hasher.finalize().into()
    }

    pub fn get(&self, key: &[u8; 32]) -> Option<Arc<RetrievalResult>> {
        let found = self.inner.lock().get(key).cloned();
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn put(&self, key: [u8; 32], value: Arc<RetrievalResult>) {
        self.inner.lock().put(key, value);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_stats() {
        let cache = RetrievalCache::new(4);
        let key = RetrievalCache::key("q", 4, 0.7, 0.3, true, true, "fp");

        assert!(cache.get(&key).is_none());
        cache.put(key, Arc::new(RetrievalResult::default()));
        assert!(cache.get(&key).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_fingerprint_changes_key() {
        let a = RetrievalCache::key("q", 4, 0.7, 0.3, true, true, "fp-1");
        let b = RetrievalCache::key("q", 4, 0.7, 0.3, true, true, "fp-2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_capacity_bound() {
        let cache = RetrievalCache::new(1);
        let k1 = RetrievalCache::key("a", 1, 0.7, 0.3, true, true, "fp");
        let k2 = RetrievalCache::key("b", 1, 0.7, 0.3, true, true, "fp");
        cache.put(k1, Arc::new(RetrievalResult::default()));
        cache.put(k2, Arc::new(RetrievalResult::default()));
        assert!(cache.get(&k1).is_none());
        assert!(cache.get(&k2).is_some());
    }
}
