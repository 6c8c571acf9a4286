//! In-process caches: a single-mutex LRU with per-entry TTL, plus the key
//! builders used by the embedding and query-result caches. Eviction picks
//! the entry with the oldest `last_accessed`, which is plain LRU here and
//! matches the patient-index eviction rule.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use tracing::debug;

pub const EMBEDDING_CACHE_CAPACITY: usize = 1000;
pub const EMBEDDING_CACHE_TTL: Duration = Duration::from_secs(300);
pub const QUERY_RESULT_CACHE_CAPACITY: usize = 100;
pub const QUERY_RESULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const PATIENT_INDEX_CACHE_CAPACITY: usize = 5;
pub const PATIENT_INDEX_CACHE_TTL: Duration = Duration::from_secs(1800);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_accessed: Instant,
}

/// Capacity- and TTL-bounded cache behind one mutex.
pub struct TtlLruCache<V> {
    label: &'static str,
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

/// Object-safe view used by the background sweeper.
pub trait Sweep: Send + Sync {
    /// Remove expired entries, returning how many were dropped.
    fn sweep(&self) -> usize;
    fn label(&self) -> &'static str;
}

impl<V: Clone + Send> TtlLruCache<V> {
    pub fn new(label: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            label,
            capacity: capacity.max(1),
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let expired = entries
            .get(key)
            .is_some_and(|entry| entry.inserted_at.elapsed() >= self.ttl);
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get_mut(key).map(|entry| {
            entry.last_accessed = Instant::now();
            entry.value.clone()
        })
    }

    pub fn insert(&self, key: String, value: V) {
        let now = Instant::now();
        let mut entries = self.lock();

        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(key, _)| key.clone());
            if let Some(evicted) = oldest {
                entries.remove(&evicted);
                debug!(cache = self.label, key = %evicted, "evicted least recently used entry");
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                last_accessed: now,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().remove(key).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<V: Clone + Send + Sync> Sweep for TtlLruCache<V> {
    fn sweep(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        let dropped = before.saturating_sub(entries.len());
        if dropped > 0 {
            debug!(cache = self.label, dropped, "swept expired cache entries");
        }
        dropped
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Cache key for one embedding input: SHA-256 of the trimmed, lowercased
/// text, so trivially different spellings of the same input share a vector.
pub fn embedding_cache_key(text: &str) -> String {
    sha256_hex(&text.trim().to_lowercase())
}

/// Cache key for a full query result. `filters` must be a
/// `serde_json::Value`; its object keys serialize in sorted order, which
/// makes the serialization canonical.
pub fn query_result_cache_key(
    query: &str,
    patient_id: &str,
    filters: &serde_json::Value,
) -> String {
    let canonical_filters = filters.to_string();
    sha256_hex(&format!(
        "{}|{patient_id}|{canonical_filters}",
        query.trim().to_lowercase()
    ))
}
