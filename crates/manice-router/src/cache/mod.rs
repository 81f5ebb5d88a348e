//! Response Cache - bounded, insertion-ordered, FIFO eviction
//!
//! Keys are SHA-256 digests of `(tier, enhanced prompt)`. There is no TTL and
//! no recency tracking: once the bound is exceeded the oldest insertions go
//! first. Re-inserting a live key replaces its value in place and keeps its
//! original position.

use manice_llm::{GenerationResult, ModelTier};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache key derived from the tier and the enhanced prompt
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(tier: ModelTier, prompt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tier.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(prompt.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bound: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Entries {
    order: VecDeque<CacheKey>,
    values: HashMap<CacheKey, GenerationResult>,
}

impl Entries {
    fn evict_to(&mut self, bound: usize) -> usize {
        let mut evicted = 0;
        while self.values.len() > bound {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.values.remove(&oldest);
            evicted += 1;
        }
        evicted
    }
}

/// In-memory result cache shared by all requests of one router
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<Entries>,
    bound: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(bound: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            bound,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<GenerationResult> {
        let found = self.entries.lock().values.get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Store a result, then evict down to the bound
    pub fn put(&self, key: CacheKey, value: GenerationResult) {
        let mut entries = self.entries.lock();
        if entries.values.insert(key.clone(), value).is_none() {
            entries.order.push_back(key);
        }
        let evicted = entries.evict_to(self.bound);
        if evicted > 0 {
            tracing::debug!(evicted, remaining = entries.values.len(), "Response cache trimmed");
        }
    }

    /// Remove oldest entries until the size is within the bound
    pub fn evict_to_bound(&self) -> usize {
        self.entries.lock().evict_to(self.bound)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().values.contains_key(key)
    }

    /// Keys from oldest to newest
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.lock().order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.order.clear();
        entries.values.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        CacheStats {
            entries: self.len(),
            bound: self.bound,
            hits,
            misses,
            hit_rate,
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manice_llm::ProviderKind;

    fn result(content: &str) -> GenerationResult {
        GenerationResult {
            content: content.to_string(),
            model_used: "phi3-mini".to_string(),
            provider: ProviderKind::Ollama,
            tokens_used: 1,
            latency_seconds: 0.5,
            metadata: serde_json::Map::new(),
        }
    }

    fn key(i: usize) -> CacheKey {
        CacheKey::new(ModelTier::Small, &format!("prompt {}", i))
    }

    #[test]
    fn test_key_depends_on_tier_and_prompt() {
        assert_eq!(CacheKey::new(ModelTier::Large, "p"), CacheKey::new(ModelTier::Large, "p"));
        assert_ne!(CacheKey::new(ModelTier::Large, "p"), CacheKey::new(ModelTier::Small, "p"));
        assert_ne!(CacheKey::new(ModelTier::Large, "p"), CacheKey::new(ModelTier::Large, "q"));
        assert_eq!(CacheKey::new(ModelTier::Small, "p").as_str().len(), 64);
    }

    #[test]
    fn test_get_and_put() {
        let cache = ResponseCache::new(4);
        assert!(cache.get(&key(0)).is_none());

        cache.put(key(0), result("zero"));
        assert_eq!(cache.get(&key(0)).unwrap().content, "zero");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_fifo_eviction_keeps_newest() {
        let bound = 3;
        let extra = 2;
        let cache = ResponseCache::new(bound);
        for i in 0..bound + extra {
            cache.put(key(i), result(&i.to_string()));
            assert!(cache.len() <= bound);
        }

        assert_eq!(cache.len(), bound);
        for i in 0..extra {
            assert!(!cache.contains(&key(i)), "entry {} should be evicted", i);
        }
        let expected: Vec<CacheKey> = (extra..bound + extra).map(key).collect();
        assert_eq!(cache.keys(), expected);
    }

    #[test]
    fn test_reads_do_not_refresh_position() {
        let cache = ResponseCache::new(2);
        cache.put(key(0), result("0"));
        cache.put(key(1), result("1"));
        // Not LRU: touching the oldest entry does not save it
        assert!(cache.get(&key(0)).is_some());
        cache.put(key(2), result("2"));
        assert!(!cache.contains(&key(0)));
        assert!(cache.contains(&key(1)));
    }

    #[test]
    fn test_reinsert_keeps_position() {
        let cache = ResponseCache::new(2);
        cache.put(key(0), result("old"));
        cache.put(key(1), result("1"));
        cache.put(key(0), result("new"));
        assert_eq!(cache.keys(), vec![key(0), key(1)]);
        assert_eq!(cache.get(&key(0)).unwrap().content, "new");

        cache.put(key(2), result("2"));
        assert_eq!(cache.keys(), vec![key(1), key(2)]);
    }

    #[test]
    fn test_zero_bound_stores_nothing() {
        let cache = ResponseCache::new(0);
        cache.put(key(0), result("0"));
        assert!(cache.is_empty());
        assert_eq!(cache.evict_to_bound(), 0);
    }

    #[test]
    fn test_clear() {
        let cache = ResponseCache::default();
        cache.put(key(0), result("0"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
    }
}
