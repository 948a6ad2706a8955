//! BM25 (Okapi) lexical index.
//!
//! One inverted index per project over the concatenation of
//! `file_path + "\n" + signature + "\n" + content` per unit. Deletions are
//! tombstoned and merged opportunistically; persistence is append-only
//! segments that replay into the in-memory postings on load. On cold start
//! with missing segments the caller rebuilds from vector-store payloads.

use crate::config::Bm25Config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Rewrite segments once this fraction of documents is tombstoned.
const MERGE_TOMBSTONE_RATIO: f64 = 0.25;

/// Scoring variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Bm25Variant {
    #[default]
    Okapi,
    /// Okapi with `plus_delta` added to the term-frequency numerator.
    Plus,
}

/// One lexical hit.
#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub id: String,
    pub score: f32,
    pub matched_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocStats {
    id: String,
    len: u32,
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Segment {
    docs: Vec<DocStats>,
}

/// Project-scoped BM25 index.
#[derive(Debug)]
pub struct Bm25Index {
    params: Bm25Config,
    variant: Bm25Variant,
    docs: Vec<DocStats>,
    doc_index: HashMap<String, u32>,
    postings: HashMap<String, Vec<(u32, u32)>>,
    tombstones: HashSet<u32>,
    total_len: u64,
    /// First doc position not yet written to a segment.
    persisted_upto: usize,
}

impl Bm25Index {
    pub fn new(params: Bm25Config, variant: Bm25Variant) -> Self {
        Self {
            params,
            variant,
            docs: Vec::new(),
            doc_index: HashMap::new(),
            postings: HashMap::new(),
            tombstones: HashSet::new(),
            total_len: 0,
            persisted_upto: 0,
        }
    }

    /// Concatenated document text for one unit.
    pub fn unit_text(file_path: &str, signature: &str, content: &str) -> String {
        format!("{file_path}\n{signature}\n{content}")
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.docs.len() - self.tombstones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add or replace one document.
    pub fn add(&mut self, id: &str, text: &str) {
        if self.doc_index.contains_key(id) {
            self.remove(id);
        }

        let position = self.docs.len() as u32;
        let mut len = 0u32;
        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            *tf.entry(token.to_ascii_lowercase()).or_default() += 1;
            len += 1;
        }
        for (term, count) in tf {
            self.postings.entry(term).or_default().push((position, count));
        }

        self.doc_index.insert(id.to_string(), position);
        self.total_len += len as u64;
        self.docs.push(DocStats {
            id: id.to_string(),
            len,
            text: text.to_string(),
        });
    }

    /// Tombstone one document. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(position) = self.doc_index.remove(id) else {
            return false;
        };
        if self.tombstones.insert(position) {
            self.total_len = self
                .total_len
                .saturating_sub(self.docs[position as usize].len as u64);
        }
        self.maybe_merge();
        true
    }

    fn tombstone_ratio(&self) -> f64 {
        if self.docs.is_empty() {
            return 0.0;
        }
        self.tombstones.len() as f64 / self.docs.len() as f64
    }

    fn maybe_merge(&mut self) {
        if self.tombstone_ratio() > MERGE_TOMBSTONE_RATIO {
            self.merge();
        }
    }

    /// Drop tombstoned documents and rebuild postings.
    pub fn merge(&mut self) {
        let live: Vec<DocStats> = self
            .docs
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.tombstones.contains(&(*i as u32)))
            .map(|(_, d)| d.clone())
            .collect();

        let params = self.params;
        let variant = self.variant;
        *self = Self::new(params, variant);
        for doc in live {
            self.add(&doc.id, &doc.text);
        }
        // Everything must be re-persisted after a merge.
        self.persisted_upto = 0;
    }

    /// Okapi-BM25 / BM25+ scoring over the query terms.
    pub fn query(&self, text: &str, limit: usize) -> Vec<Bm25Hit> {
        if limit == 0 || self.is_empty() {
            return Vec::new();
        }

        let n_docs = self.len() as f32;
        let avg_len = (self.total_len as f32 / n_docs.max(1.0)).max(1e-6);
        let delta = match self.variant {
            Bm25Variant::Okapi => 0.0,
            Bm25Variant::Plus => self.params.plus_delta,
        };

        let mut terms: Vec<String> = tokenize(text)
            .map(|t| t.to_ascii_lowercase())
            .collect();
        terms.sort_unstable();
        terms.dedup();

        let mut scores: HashMap<u32, f32> = HashMap::new();
        let mut matched: HashMap<u32, Vec<String>> = HashMap::new();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings
                .iter()
                .filter(|(position, _)| !self.tombstones.contains(position))
                .count() as f32;
            if df == 0.0 {
                continue;
            }
            let idf = ((n_docs - df + 0.5) / (df + 0.5) + 1.0).ln();

            for &(position, tf) in postings {
                if self.tombstones.contains(&position) {
                    continue;
                }
                let doc = &self.docs[position as usize];
                let norm = 1.0 - self.params.b + self.params.b * (doc.len as f32 / avg_len);
                let tf_adjusted = tf as f32 + delta;
                let score =
                    idf * (tf_adjusted * (self.params.k1 + 1.0)) / (tf_adjusted + self.params.k1 * norm);

                *scores.entry(position).or_default() += score;
                matched.entry(position).or_default().push(term.clone());
            }
        }

        let mut hits: Vec<Bm25Hit> = scores
            .into_iter()
            .map(|(position, score)| Bm25Hit {
                id: self.docs[position as usize].id.clone(),
                score,
                matched_terms: matched.remove(&position).unwrap_or_default(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        hits
    }

    /// Stored text for a document, if live.
    pub fn text_of(&self, id: &str) -> Option<&str> {
        self.doc_index
            .get(id)
            .map(|&position| self.docs[position as usize].text.as_str())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn segment_path(dir: &Path, project: &str, n: usize) -> PathBuf {
        dir.join(format!("{project}.seg-{n:04}.bm25"))
    }

    fn tombstone_path(dir: &Path, project: &str) -> PathBuf {
        dir.join(format!("{project}.tombstones.json"))
    }

    fn segment_files(dir: &Path, project: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{project}.seg-");
        let mut files = Vec::new();
        if !dir.exists() {
            return Ok(files);
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(&prefix) && name.ends_with(".bm25") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Append documents added since the last save as one new segment and
    /// rewrite the tombstone list. A merge collapses everything into
    /// segment zero.
    pub fn save(&mut self, dir: &Path, project: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        if self.persisted_upto == 0 {
            // Full rewrite (first save or post-merge): drop stale segments.
            for path in Self::segment_files(dir, project)? {
                let _ = std::fs::remove_file(path);
            }
        }

        if self.persisted_upto < self.docs.len() {
            let segment = Segment {
                docs: self.docs[self.persisted_upto..].to_vec(),
            };
            let n = Self::segment_files(dir, project)?.len();
            let bytes = bincode::serialize(&segment)
                .map_err(|e| Error::storage_with("segment serialization failed", e))?;
            std::fs::write(Self::segment_path(dir, project, n), bytes)?;
            self.persisted_upto = self.docs.len();
        }

        // A replaced document tombstones its old position while the id stays
        // live; only ids with no live copy go to the tombstone file.
        let tombstoned_ids: Vec<&str> = self
            .tombstones
            .iter()
            .map(|&position| self.docs[position as usize].id.as_str())
            .filter(|id| !self.doc_index.contains_key(*id))
            .collect();
        std::fs::write(
            Self::tombstone_path(dir, project),
            serde_json::to_vec(&tombstoned_ids)?,
        )?;
        Ok(())
    }

    /// Replay segments from disk. Returns None when no segments exist (the
    /// caller then rebuilds from the vector store).
    pub fn load(
        dir: &Path,
        project: &str,
        params: Bm25Config,
        variant: Bm25Variant,
    ) -> Result<Option<Self>> {
        let files = Self::segment_files(dir, project)?;
        if files.is_empty() {
            return Ok(None);
        }

        let mut index = Self::new(params, variant);
        for path in files {
            let bytes = std::fs::read(&path)?;
            let segment: Segment = bincode::deserialize(&bytes)
                .map_err(|e| Error::storage_with("corrupt bm25 segment", e))?;
            for doc in segment.docs {
                index.add(&doc.id, &doc.text);
            }
        }

        if let Ok(bytes) = std::fs::read(Self::tombstone_path(dir, project)) {
            let ids: Vec<String> = serde_json::from_slice(&bytes).unwrap_or_default();
            for id in ids {
                index.remove(&id);
            }
        }
        index.persisted_upto = index.docs.len();
        Ok(Some(index))
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Per-project BM25 indexes behind single-writer/many-reader locks.
///
/// Lexical search is project-scoped by construction; there is no cross-project
/// inverted index. Projects load lazily from their segments.
pub struct Lexicon {
    dir: Option<PathBuf>,
    params: Bm25Config,
    variant: Bm25Variant,
    indexes: dashmap::DashMap<String, std::sync::Arc<parking_lot::RwLock<Bm25Index>>>,
}

impl Lexicon {
    pub fn in_memory(params: Bm25Config, variant: Bm25Variant) -> Self {
        Self {
            dir: None,
            params,
            variant,
            indexes: dashmap::DashMap::new(),
        }
    }

    pub fn open(dir: &Path, params: Bm25Config, variant: Bm25Variant) -> Self {
        Self {
            dir: Some(dir.to_path_buf()),
            params,
            variant,
            indexes: dashmap::DashMap::new(),
        }
    }

    /// Get the project's index, loading segments on first touch. Returns
    /// whether the index had to start empty (caller may rebuild from the
    /// vector store).
    pub fn project(
        &self,
        project: &str,
    ) -> (std::sync::Arc<parking_lot::RwLock<Bm25Index>>, bool) {
        if let Some(existing) = self.indexes.get(project) {
            return (existing.clone(), false);
        }

        let mut cold = true;
        let index = match &self.dir {
            Some(dir) => match Bm25Index::load(dir, project, self.params, self.variant) {
                Ok(Some(index)) => {
                    cold = false;
                    index
                }
                Ok(None) => Bm25Index::new(self.params, self.variant),
                Err(e) => {
                    tracing::warn!(project, "failed to load bm25 segments, starting empty: {e}");
                    Bm25Index::new(self.params, self.variant)
                }
            },
            None => Bm25Index::new(self.params, self.variant),
        };
        let index = std::sync::Arc::new(parking_lot::RwLock::new(index));
        self.indexes.insert(project.to_string(), index.clone());
        (index, cold)
    }

    /// Project keys currently loaded in memory.
    pub fn loaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.indexes.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn save(&self, project: &str) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        if let Some(index) = self.indexes.get(project) {
            index.write().save(dir, project)?;
        }
        Ok(())
    }

    pub fn save_all(&self) -> Result<()> {
        for entry in self.indexes.iter() {
            self.save(entry.key())?;
        }
        Ok(())
    }
}

/// Code-aware tokenizer: splits on non-word characters, then on
/// camelCase/snake_case boundaries, keeping the full identifier as well.
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .flat_map(split_identifier)
}

fn split_identifier(s: &str) -> Vec<&str> {
    if s.is_empty() {
        return Vec::new();
    }

    let mut tokens = Vec::new();
    let bytes = s.as_bytes();
    let mut start = 0;

    for i in 1..bytes.len() {
        let prev = bytes[i - 1] as char;
        let curr = bytes[i] as char;
        let boundary = curr == '_' || (prev.is_ascii_lowercase() && curr.is_ascii_uppercase());
        if boundary {
            if start < i && bytes[start] != b'_' {
                tokens.push(&s[start..i]);
            }
            start = if curr == '_' { i + 1 } else { i };
        }
    }

    if start < s.len() && bytes[start] != b'_' {
        tokens.push(&s[start..]);
    }
    if tokens.len() > 1 {
        tokens.push(s);
    }
    tokens
}
