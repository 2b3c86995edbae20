//! In-memory LRU memo of successful provider results, with TTL.
//! Key: blake3 hash of (from | to | text). Fallback results are never stored,
//! so a degraded provider is retried on the next request.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use super::Language;

struct CacheEntry {
    translated_text: String,
    inserted_at: Instant,
}

pub struct TranslationMemo {
    inner: Mutex<LruCache<[u8; 32], CacheEntry>>,
    ttl: Duration,
}

impl TranslationMemo {
    /// A zero capacity is bumped to one entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn compute_key(from: Language, to: Language, text: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(from.code().as_bytes());
        hasher.update(b"|");
        hasher.update(to.code().as_bytes());
        hasher.update(b"|");
        hasher.update(text.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Returns None if absent or expired.
    pub fn get(&self, key: &[u8; 32]) -> Option<String> {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.translated_text.clone());
            }
            cache.pop(key);
        }
        None
    }

    pub fn insert(&self, key: [u8; 32], translated_text: String) {
        self.inner.lock().put(
            key,
            CacheEntry {
                translated_text,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
