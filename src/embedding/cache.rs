//! Content-addressed embedding cache.
//!
//! Keys are `SHA-256(model_id || "\0" || normalized_text)`. The cache is
//! write-through, bounded in bytes with LRU eviction by access time, and
//! persistable: vectors go to a packed binary file (4-byte dimension prefix
//! per value), access-time metadata to a JSON index next to it.

use crate::error::{Error, Result};
use crate::types::now_ms;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

pub const VECTORS_FILE: &str = "embeddings.bin";
pub const INDEX_FILE: &str = "embeddings.index.json";

/// Fixed per-entry overhead besides the vector payload.
const ENTRY_OVERHEAD: u64 = 32 + 4 + 16;

pub type CacheKey = [u8; 32];

/// Derive the cache key for a model/text pair.
pub fn cache_key(model_id: &str, normalized_text: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized_text.as_bytes());
    hasher.finalize().into()
}

struct CacheEntry {
    vector: Vec<f32>,
    last_access_ms: i64,
    created_ms: i64,
}

impl CacheEntry {
    fn byte_size(&self) -> u64 {
        ENTRY_OVERHEAD + (self.vector.len() * 4) as u64
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    total_bytes: u64,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Size-bounded LRU vector cache.
///
/// Readers and writers serialize through one lock; hit/miss counters are
/// atomic so stats reads never take it.
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
    max_bytes: u64,
    ttl_ms: Option<i64>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(max_bytes: u64, ttl_ms: Option<i64>) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_bytes,
            ttl_ms,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a vector, refreshing its access time on hit.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<f32>> {
        let now = now_ms();
        let mut inner = self.inner.lock();

        if let Some(ttl) = self.ttl_ms {
            if let Some(entry) = inner.entries.get(key) {
                if now - entry.created_ms > ttl {
                    let stale = inner.entries.remove(key).map(|e| e.byte_size()).unwrap_or(0);
                    inner.total_bytes = inner.total_bytes.saturating_sub(stale);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access_ms = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.vector.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a vector, evicting least-recently-accessed entries past the
    /// size bound.
    pub fn put(&self, key: CacheKey, vector: Vec<f32>) {
        let now = now_ms();
        let entry = CacheEntry {
            vector,
            last_access_ms: now,
            created_ms: now,
        };
        let size = entry.byte_size();

        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.insert(key, entry) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.byte_size());
        }
        inner.total_bytes += size;
        self.evict_over_bound(&mut inner);
    }

    fn evict_over_bound(&self, inner: &mut CacheInner) {
        while inner.total_bytes > self.max_bytes && !inner.entries.is_empty() {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access_ms)
                .map(|(k, _)| *k);
            let Some(key) = oldest else { break };
            if let Some(entry) = inner.entries.remove(&key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.byte_size());
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Persist vectors and the access-time index under `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let inner = self.inner.lock();

        let mut packed = Vec::new();
        let mut index: HashMap<String, i64> = HashMap::with_capacity(inner.entries.len());
        for (key, entry) in &inner.entries {
            packed.write_all(key).map_err(Error::from)?;
            packed
                .write_all(&(entry.vector.len() as u32).to_le_bytes())
                .map_err(Error::from)?;
            for value in &entry.vector {
                packed.write_all(&value.to_le_bytes()).map_err(Error::from)?;
            }
            index.insert(hex(key), entry.last_access_ms);
        }

        std::fs::write(dir.join(VECTORS_FILE), packed)?;
        std::fs::write(dir.join(INDEX_FILE), serde_json::to_vec(&index)?)?;
        Ok(())
    }

    /// Load a previously saved cache. Missing files yield an empty cache.
    pub fn load(dir: &Path, max_bytes: u64, ttl_ms: Option<i64>) -> Result<Self> {
        let cache = Self::new(max_bytes, ttl_ms);
        let vectors_path = dir.join(VECTORS_FILE);
        if !vectors_path.exists() {
            return Ok(cache);
        }

        let index: HashMap<String, i64> = match std::fs::read(dir.join(INDEX_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };

        let data = std::fs::read(&vectors_path)?;
        let mut reader = data.as_slice();
        let now = now_ms();

        let mut inner = cache.inner.lock();
        loop {
            let mut key = [0u8; 32];
            match reader.read_exact(&mut key) {
                Ok(()) => {}
                Err(_) => break,
            }
            let mut dim_bytes = [0u8; 4];
            reader
                .read_exact(&mut dim_bytes)
                .map_err(|e| Error::storage_with("truncated embedding cache", e))?;
            let dim = u32::from_le_bytes(dim_bytes) as usize;

            let mut vector = Vec::with_capacity(dim);
            for _ in 0..dim {
                let mut value = [0u8; 4];
                reader
                    .read_exact(&mut value)
                    .map_err(|e| Error::storage_with("truncated embedding cache", e))?;
                vector.push(f32::from_le_bytes(value));
            }

            let last_access_ms = index.get(&hex(&key)).copied().unwrap_or(now);
            let entry = CacheEntry {
                vector,
                last_access_ms,
                created_ms: last_access_ms,
            };
            inner.total_bytes += entry.byte_size();
            inner.entries.insert(key, entry);
        }
        cache.evict_over_bound(&mut inner);
        drop(inner);
        Ok(cache)
    }
}

fn hex(key: &CacheKey) -> String {
    let mut out = String::with_capacity(64);
    for byte in key {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
