use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::{MetadataFilter, SimilarityMatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    results: Vec<SimilarityMatch>,
    stored_at: Instant,
    access_count: u64,
}

/// TTL cache of query results keyed by [`QueryCache::key`].
///
/// A poisoned lock disables the cache for that call only; lookups miss and
/// inserts are dropped.
#[derive(Debug)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl QueryCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn key(vector: &[f32], k: usize, threshold: f32, filter: &MetadataFilter) -> String {
        let mut hasher = blake3::Hasher::new();
        for value in vector {
            hasher.update(&value.to_le_bytes());
        }
        hasher.update(b"|t");
        hasher.update(&threshold.to_le_bytes());
        hasher.update(format!("|k{k}|").as_bytes());
        hasher.update(
            serde_json::to_string(filter)
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.finalize().to_hex().to_string()
    }

    pub fn get(&self, key: &str) -> Option<Vec<SimilarityMatch>> {
        let mut entries = self.lock()?;

        let expired = match entries.get_mut(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                entry.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.results.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: String, results: Vec<SimilarityMatch>) {
        let Some(mut entries) = self.lock() else {
            return;
        };

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let evicted = evict_least_used_quartile(&mut entries);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!(evicted, remaining = entries.len(), "evicted query cache entries");
        }

        entries.insert(
            key,
            CacheEntry {
                results,
                stored_at: Instant::now(),
                access_count: 0,
            },
        );
    }

    pub fn clear(&self) {
        if let Some(mut entries) = self.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, HashMap<String, CacheEntry>>> {
        match self.entries.lock() {
            Ok(entries) => Some(entries),
            Err(_) => {
                tracing::warn!("query cache lock poisoned, bypassing cache");
                None
            }
        }
    }
}

/// Drops the quarter of entries with the fewest hits, oldest first.
fn evict_least_used_quartile(entries: &mut HashMap<String, CacheEntry>) -> usize {
    let mut ranked = entries
        .iter()
        .map(|(key, entry)| (entry.access_count, entry.stored_at, key.clone()))
        .collect::<Vec<_>>();
    ranked.sort();

    let evict = (ranked.len() / 4).max(1);
    for (_, _, key) in ranked.into_iter().take(evict) {
        entries.remove(&key);
    }
    evict
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde_json::json;

    use super::*;
    use crate::Metadata;

    fn result(id: &str) -> Vec<SimilarityMatch> {
        vec![SimilarityMatch {
            id: id.to_owned(),
            score: 0.9,
            distance: 0.1,
            metadata: Metadata::new(),
        }]
    }

    #[test]
    fn key_depends_on_every_query_input() {
        let filter = MetadataFilter::new();
        let base = QueryCache::key(&[1.0, 0.5], 10, 0.75, &filter);

        assert_ne!(base, QueryCache::key(&[1.0, 0.5], 10, 0.7501, &filter));
        assert_ne!(base, QueryCache::key(&[1.0, 0.6], 10, 0.75, &filter));
        assert_ne!(base, QueryCache::key(&[1.0, 0.5], 11, 0.75, &filter));
        assert_ne!(base, QueryCache::key(&[1.0, 0.5], 10, 0.85, &filter));

        let mut narrowed = MetadataFilter::new();
        narrowed.insert("kind".to_owned(), json!("function"));
        assert_ne!(base, QueryCache::key(&[1.0, 0.5], 10, 0.75, &narrowed));
    }

    #[test]
    fn expired_entries_are_dropped_on_lookup() {
        let cache = QueryCache::new(10, Duration::from_millis(10));
        cache.insert("q".to_owned(), result("a"));
        assert_eq!(cache.get("q"), Some(result("a")));

        thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("q"), None);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn full_cache_evicts_least_accessed_quartile() {
        let cache = QueryCache::new(4, Duration::from_secs(60));
        for key in ["a", "b", "c", "d"] {
            cache.insert(key.to_owned(), result(key));
        }
        for key in ["a", "b", "d"] {
            assert!(cache.get(key).is_some());
        }

        cache.insert("e".to_owned(), result("e"));

        assert_eq!(cache.len(), 4);
        assert!(cache.get("c").is_none());
        for key in ["a", "b", "d", "e"] {
            assert!(cache.get(key).is_some(), "{key} should survive eviction");
        }
        assert_eq!(cache.stats().evictions, 1);
    }
}
