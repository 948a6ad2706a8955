//! Embedding engine.
//!
//! Maps text deterministically to unit-length vectors of a fixed per-model
//! dimension. Batching is adaptive, lookups are cache-backed, and inference
//! runs off the async loop in blocking workers. An optional parallel path
//! splits large batches across workers; small batches stay single-threaded to
//! avoid pool overhead.

pub mod cache;

use crate::error::{Error, Result};
use cache::{cache_key, EmbeddingCache};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Batches below this many texts skip the worker pool.
pub const PARALLEL_MIN_TEXTS: usize = 10;

/// Inclusive bounds for the adaptive batch size.
const BATCH_MIN: usize = 16;
const BATCH_MAX: usize = 64;

/// Tolerance on the unit-norm invariant.
pub const NORM_EPSILON: f32 = 1e-4;

/// A deterministic text-to-vector model.
///
/// Implementations are blocking; the engine wraps calls in
/// `spawn_blocking` so the event loop never stalls on inference.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dimension(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Normalization applied before hashing and embedding: strip trailing
/// whitespace, collapse interior runs, preserve case.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_whitespace = false;
    for c in text.trim_end().chars() {
        if c.is_whitespace() {
            if !in_whitespace && !out.is_empty() {
                out.push(' ');
            }
            in_whitespace = true;
        } else {
            out.push(c);
            in_whitespace = false;
        }
    }
    out
}

/// Scale a vector to unit L2 norm in place. Zero vectors get a fixed basis
/// component so the invariant holds for degenerate input.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        if let Some(first) = vector.first_mut() {
            *first = 1.0;
        }
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

/// Cosine similarity of two unit vectors, mapped to [0, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    ((dot + 1.0) / 2.0).clamp(0.0, 1.0)
}

// ============================================================================
// Providers
// ============================================================================

/// Deterministic feature-hashing embedder.
///
/// Tokens and token bigrams are hashed into a fixed number of signed buckets
/// and the result is L2-normalized. No model download, bitwise reproducible;
/// the default provider for tests and offline operation.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        // Code-aware tokenization: identifiers split on case and underscore
        // boundaries so related names land in shared buckets.
        let tokens: Vec<String> = crate::search::bm25::tokenize(text)
            .map(|t| t.to_ascii_lowercase())
            .collect();

        for token in &tokens {
            self.bump(&mut vector, token.as_bytes());
        }
        for pair in tokens.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            self.bump(&mut vector, joined.as_bytes());
        }

        l2_normalize(&mut vector);
        vector
    }

    fn bump(&self, vector: &mut [f32], bytes: &[u8]) {
        let hash = fnv1a(bytes);
        let index = (hash % self.dimension as u64) as usize;
        let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// fastembed-backed embedder (all-MiniLM-L6-v2, dimension 384).
#[cfg(feature = "model")]
pub struct FastEmbedder {
    model: fastembed::TextEmbedding,
    model_id: String,
}

#[cfg(feature = "model")]
impl FastEmbedder {
    pub const DIMENSION: usize = 384;

    pub fn new() -> Result<Self> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
        )
        .map_err(|e| Error::embedding(format!("failed to initialize embedding model: {e}")))?;
        Ok(Self {
            model,
            model_id: "all-minilm-l6-v2".to_string(),
        })
    }
}

#[cfg(feature = "model")]
impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        Self::DIMENSION
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| Error::embedding(format!("inference failed: {e}")))?;
        for vector in &mut vectors {
            l2_normalize(vector);
        }
        Ok(vectors)
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Default)]
pub struct EngineStats {
    pub texts_embedded: AtomicU64,
    pub cache_hits: AtomicU64,
    pub batches: AtomicU64,
}

/// Cache-backed, batched embedding front end.
pub struct EmbeddingEngine {
    embedder: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
    parallel: bool,
    stats: EngineStats,
}

impl EmbeddingEngine {
    pub fn new(embedder: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>, parallel: bool) -> Self {
        Self {
            embedder,
            cache,
            parallel,
            stats: EngineStats::default(),
        }
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Embed a batch of texts, preserving input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model_id = self.embedder.model_id().to_string();
        let normalized: Vec<String> = texts.iter().map(|t| normalize_text(t)).collect();

        // Cache pass: resolve hits, collect misses.
        let mut results: Vec<Option<Vec<f32>>> = vec![None; normalized.len()];
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();
        for (i, text) in normalized.iter().enumerate() {
            let key = cache_key(&model_id, text);
            if let Some(vector) = self.cache.get(&key) {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                results[i] = Some(vector);
            } else {
                miss_indices.push(i);
                miss_texts.push(text.clone());
            }
        }

        if !miss_texts.is_empty() {
            let vectors = self.embed_misses(miss_texts.clone()).await?;
            for ((i, text), mut vector) in miss_indices.iter().zip(miss_texts).zip(vectors) {
                if vector.len() != self.dimension() {
                    return Err(Error::embedding(format!(
                        "model returned dimension {}, expected {}",
                        vector.len(),
                        self.dimension()
                    )));
                }
                l2_normalize(&mut vector);
                self.cache.put(cache_key(&model_id, &text), vector.clone());
                results[*i] = Some(vector);
            }
            self.stats
                .texts_embedded
                .fetch_add(miss_indices.len() as u64, Ordering::Relaxed);
        }

        Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::embedding("no embedding produced"))
    }

    async fn embed_misses(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let batch_size = adaptive_batch_size(&texts);
        let batches: Vec<Vec<String>> = texts
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        if self.parallel && texts.len() >= PARALLEL_MIN_TEXTS && batches.len() > 1 {
            let handles: Vec<_> = batches
                .into_iter()
                .map(|batch| {
                    let embedder = Arc::clone(&self.embedder);
                    tokio::task::spawn_blocking(move || embedder.embed_batch(&batch))
                })
                .collect();
            let joined = futures::future::try_join_all(handles)
                .await
                .map_err(|e| Error::embedding(format!("worker panicked: {e}")))?;
            let mut out = Vec::with_capacity(texts.len());
            for vectors in joined {
                out.extend(vectors?);
                self.stats.batches.fetch_add(1, Ordering::Relaxed);
            }
            Ok(out)
        } else {
            let embedder = Arc::clone(&self.embedder);
            let batch_count = batches.len() as u64;
            let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut out = Vec::new();
                for batch in &batches {
                    out.extend(embedder.embed_batch(batch)?);
                }
                Ok(out)
            })
            .await
            .map_err(|e| Error::embedding(format!("worker panicked: {e}")))??;
            self.stats.batches.fetch_add(batch_count, Ordering::Relaxed);
            Ok(vectors)
        }
    }
}

/// Batch size in [16, 64], shrinking as mean text length grows.
fn adaptive_batch_size(texts: &[String]) -> usize {
    if texts.is_empty() {
        return BATCH_MIN;
    }
    let mean_len = texts.iter().map(|t| t.len()).sum::<usize>() / texts.len();
    if mean_len <= 256 {
        BATCH_MAX
    } else if mean_len <= 1024 {
        32
    } else {
        BATCH_MIN
    }
}
