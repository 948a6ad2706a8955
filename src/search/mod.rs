//! Hybrid search and re-ranking.
//!
//! Three modes (semantic, keyword, hybrid), three fusion strategies
//! (weighted min-max blend, reciprocal rank fusion, cascade), then a
//! multi-signal re-rank: fused similarity, recency decay, usage, optional
//! keyword overlap and redundancy penalty, project-context multipliers, and
//! optional MMR diversification. Final scores live in [0, 1], sorted
//! descending with ties broken by unit id.

pub mod bm25;

pub use bm25::{tokenize, Bm25Hit, Bm25Index, Bm25Variant};

use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::store::{Payload, ScoredPoint};
use crate::types::{ConfidenceLabel, SearchResult};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{HashMap, HashSet};

/// RRF rank constant.
const RRF_K: f32 = 60.0;

/// Cascade pass threshold as a fraction of the top lexical score. Absolute
/// BM25 scores shift with corpus statistics, so the cutoff is scale-free.
const CASCADE_FRACTION_OF_MAX: f32 = 0.5;

/// Half-life of the recency decay, in days.
const RECENCY_HALF_LIFE_DAYS: f64 = 7.0;

/// Usage signal saturates at this access count.
const USAGE_SATURATION: f64 = 100.0;

/// Maximum accepted query length in bytes.
pub const MAX_QUERY_BYTES: usize = 1024;

/// Maximum result limit; larger requests clamp without error.
pub const MAX_LIMIT: usize = 100;

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "semantic" => Ok(Self::Semantic),
            "keyword" => Ok(Self::Keyword),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::validation(format!("unknown search mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionStrategy {
    Weighted,
    Rrf,
    Cascade,
}

impl FusionStrategy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "weighted" => Ok(Self::Weighted),
            "rrf" => Ok(Self::Rrf),
            "cascade" => Ok(Self::Cascade),
            other => Err(Error::validation(format!("unknown fusion strategy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Relevance,
    Complexity,
    Size,
    Recency,
    Importance,
}

impl SortBy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "relevance" => Ok(Self::Relevance),
            "complexity" => Ok(Self::Complexity),
            "size" => Ok(Self::Size),
            "recency" => Ok(Self::Recency),
            "importance" => Ok(Self::Importance),
            other => Err(Error::validation(format!("unknown sort_by: {other}"))),
        }
    }
}

/// A validated search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub fusion: FusionStrategy,
    pub alpha: f32,
    pub limit: usize,
    pub project: Option<String>,
    pub language: Option<String>,
    pub file_pattern: Option<String>,
    pub exclude_patterns: Vec<String>,
    pub complexity_min: Option<u32>,
    pub complexity_max: Option<u32>,
    pub line_count_min: Option<u64>,
    pub line_count_max: Option<u64>,
    pub modified_after: Option<i64>,
    pub modified_before: Option<i64>,
    pub sort_by: SortBy,
    pub diversify: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::Hybrid,
            fusion: FusionStrategy::Weighted,
            alpha: 0.5,
            limit: 10,
            project: None,
            language: None,
            file_pattern: None,
            exclude_patterns: Vec::new(),
            complexity_min: None,
            complexity_max: None,
            line_count_min: None,
            line_count_max: None,
            modified_after: None,
            modified_before: None,
            sort_by: SortBy::Relevance,
            diversify: false,
        }
    }

    /// Enforce declared constraints; clamps the limit rather than failing.
    pub fn validate(&mut self) -> Result<()> {
        if self.query.len() > MAX_QUERY_BYTES {
            return Err(Error::validation(format!(
                "query is {} bytes, limit is {MAX_QUERY_BYTES}",
                self.query.len()
            )));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(Error::validation(format!("alpha {} outside [0, 1]", self.alpha)));
        }
        self.limit = self.limit.min(MAX_LIMIT);
        Ok(())
    }

    /// Post-retrieval payload filters (glob, range, and time predicates are
    /// evaluated engine-side; the store only sees equality filters).
    pub fn matches_payload(&self, payload: &Payload, globs: &CompiledGlobs) -> bool {
        if let Some(language) = &self.language {
            if payload.language.as_deref() != Some(language.as_str()) {
                return false;
            }
        }
        let file_path = payload.file_path.as_deref().unwrap_or("");
        if let Some(include) = &globs.include {
            if !include.is_match(file_path) {
                return false;
            }
        }
        if globs.exclude.is_match(file_path) && !file_path.is_empty() {
            return false;
        }

        let line_count = match (payload.start_line, payload.end_line) {
            (Some(start), Some(end)) => end.saturating_sub(start) + 1,
            _ => 0,
        };
        if let Some(min) = self.line_count_min {
            if line_count < min {
                return false;
            }
        }
        if let Some(max) = self.line_count_max {
            if line_count > max {
                return false;
            }
        }

        if self.complexity_min.is_some() || self.complexity_max.is_some() {
            let complexity = branch_complexity(&payload.content);
            if let Some(min) = self.complexity_min {
                if complexity < min {
                    return false;
                }
            }
            if let Some(max) = self.complexity_max {
                if complexity > max {
                    return false;
                }
            }
        }

        if let Some(after) = self.modified_after {
            if payload.updated_at < after {
                return false;
            }
        }
        if let Some(before) = self.modified_before {
            if payload.updated_at > before {
                return false;
            }
        }
        true
    }

    pub fn compile_globs(&self) -> Result<CompiledGlobs> {
        let include = match &self.file_pattern {
            Some(pattern) => {
                let glob = Glob::new(pattern)
                    .map_err(|e| Error::validation(format!("bad file_pattern: {e}")))?;
                let mut builder = GlobSetBuilder::new();
                builder.add(glob);
                Some(builder.build().map_err(|e| Error::validation(e.to_string()))?)
            }
            None => None,
        };
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude_patterns {
            builder.add(
                Glob::new(pattern)
                    .map_err(|e| Error::validation(format!("bad exclude pattern: {e}")))?,
            );
        }
        Ok(CompiledGlobs {
            include,
            exclude: builder.build().map_err(|e| Error::validation(e.to_string()))?,
        })
    }
}

pub struct CompiledGlobs {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

/// Cheap cyclomatic-style proxy: one plus the number of branching tokens.
pub fn branch_complexity(content: &str) -> u32 {
    let mut count = 1u32;
    for token in tokenize(content) {
        if matches!(
            token,
            "if" | "elif" | "else" | "for" | "while" | "match" | "case" | "when" | "catch"
                | "except" | "and" | "or"
        ) {
            count += 1;
        }
    }
    count + content.matches("&&").count() as u32 + content.matches("||").count() as u32
}

// ============================================================================
// Project weighting
// ============================================================================

/// Session-level project multipliers applied before final ranking.
#[derive(Debug, Clone, Default)]
pub struct ProjectWeighting {
    pub active: Option<String>,
    pub archived: HashSet<String>,
}

impl ProjectWeighting {
    pub fn multiplier(&self, project: &str) -> f32 {
        if self.archived.contains(project) {
            0.1
        } else if self.active.as_deref() == Some(project) {
            2.0
        } else if self.active.is_some() {
            0.3
        } else {
            1.0
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

struct Candidate {
    id: String,
    payload: Payload,
    semantic: Option<f32>,
    lexical_raw: Option<f32>,
    semantic_rank: Option<usize>,
    lexical_rank: Option<usize>,
    matched_terms: Vec<String>,
    fused: f32,
}

/// Fusion and re-ranking over already-retrieved candidates. Retrieval itself
/// (embedding, ANN, BM25) is orchestrated by the caller so the gate can
/// short-circuit before any embedding work.
pub struct SearchEngine {
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn overfetch(&self, limit: usize) -> usize {
        (limit.max(1)) * self.config.overfetch_multiplier.max(1)
    }

    /// Fuse, re-rank, and trim.
    ///
    /// `semantic` comes from the vector side (scores already in [0, 1]),
    /// `lexical` from BM25 with payloads resolved. Either side may be empty
    /// depending on the mode.
    pub fn rank(
        &self,
        request: &SearchRequest,
        semantic: Vec<ScoredPoint>,
        lexical: Vec<(Bm25Hit, Payload)>,
        weighting: &ProjectWeighting,
        now_ms: i64,
    ) -> Vec<SearchResult> {
        if request.query.trim().is_empty() {
            return Vec::new();
        }

        let mut candidates: HashMap<String, Candidate> = HashMap::new();
        for (rank, point) in semantic.into_iter().enumerate() {
            candidates.insert(
                point.id.clone(),
                Candidate {
                    id: point.id,
                    payload: point.payload,
                    semantic: Some(point.score),
                    lexical_raw: None,
                    semantic_rank: Some(rank),
                    lexical_rank: None,
                    matched_terms: Vec::new(),
                    fused: 0.0,
                },
            );
        }
        for (rank, (hit, payload)) in lexical.into_iter().enumerate() {
            match candidates.get_mut(&hit.id) {
                Some(candidate) => {
                    candidate.lexical_raw = Some(hit.score);
                    candidate.lexical_rank = Some(rank);
                    candidate.matched_terms = hit.matched_terms;
                }
                None => {
                    candidates.insert(
                        hit.id.clone(),
                        Candidate {
                            id: hit.id,
                            payload,
                            semantic: None,
                            lexical_raw: Some(hit.score),
                            semantic_rank: None,
                            lexical_rank: Some(rank),
                            matched_terms: hit.matched_terms,
                            fused: 0.0,
                        },
                    );
                }
            }
        }
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<Candidate> = candidates.into_values().collect();
        match request.fusion {
            FusionStrategy::Weighted => fuse_weighted(&mut candidates, request.alpha),
            FusionStrategy::Rrf => fuse_rrf(&mut candidates),
            FusionStrategy::Cascade => fuse_cascade(&mut candidates, request.limit),
        }

        self.rerank(request, &mut candidates, weighting, now_ms);

        let mut selected = if request.diversify {
            self.select_mmr(candidates, request.limit)
        } else {
            candidates.sort_by(|a, b| {
                b.fused
                    .partial_cmp(&a.fused)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            candidates.truncate(request.limit);
            candidates
        };

        if request.sort_by != SortBy::Relevance {
            sort_candidates(&mut selected, request.sort_by);
        }

        selected
            .into_iter()
            .map(|candidate| {
                let score_final = candidate.fused.clamp(0.0, 1.0);
                SearchResult {
                    unit_id: candidate.id,
                    content: candidate.payload.content.clone(),
                    metadata: payload_metadata(&candidate.payload),
                    score_semantic: candidate.semantic.unwrap_or(0.0),
                    score_lexical: candidate.lexical_raw.unwrap_or(0.0),
                    score_final,
                    matched_terms: candidate.matched_terms,
                    confidence_label: ConfidenceLabel::from_score(score_final),
                }
            })
            .collect()
    }

    /// Multi-signal re-rank plus project multipliers.
    fn rerank(
        &self,
        request: &SearchRequest,
        candidates: &mut [Candidate],
        weighting: &ProjectWeighting,
        now_ms: i64,
    ) {
        let weights = self.config.rerank_weights;
        let query_terms: HashSet<String> = tokenize(&request.query)
            .map(|t| t.to_ascii_lowercase())
            .collect();

        for candidate in candidates.iter_mut() {
            let recency = recency_score(now_ms, candidate.payload.last_accessed);
            let usage = usage_score(candidate.payload.access_count);
            let keyword = if weights.keyword > 0.0 {
                keyword_overlap(&query_terms, &candidate.payload.content)
            } else {
                0.0
            };

            let mut score = weights.similarity * candidate.fused
                + weights.recency * recency
                + weights.usage * usage
                + weights.keyword * keyword;

            score *= weighting.multiplier(&candidate.payload.project);
            candidate.fused = score;
        }

        // Redundancy penalty is greedy against already-selected (higher
        // ranked) results.
        if weights.diversity > 0.0 {
            let mut order: Vec<usize> = (0..candidates.len()).collect();
            order.sort_by(|&a, &b| {
                candidates[b]
                    .fused
                    .partial_cmp(&candidates[a].fused)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let mut selected_tokens: Vec<HashSet<String>> = Vec::new();
            for index in order {
                let tokens: HashSet<String> = tokenize(&candidates[index].payload.content)
                    .map(|t| t.to_ascii_lowercase())
                    .collect();
                let redundancy = selected_tokens
                    .iter()
                    .map(|prior| jaccard(&tokens, prior))
                    .fold(0.0f32, f32::max);
                candidates[index].fused -= weights.diversity * redundancy;
                selected_tokens.push(tokens);
            }
        }

        // The multiplier can push past 1.0; renormalize instead of clamping
        // so relative order inside the boosted set survives.
        let max = candidates.iter().map(|c| c.fused).fold(0.0f32, f32::max);
        if max > 1.0 {
            for candidate in candidates.iter_mut() {
                candidate.fused /= max;
            }
        }
        for candidate in candidates.iter_mut() {
            candidate.fused = candidate.fused.clamp(0.0, 1.0);
        }
    }

    /// Greedy MMR selection: maximize λ·score − (1−λ)·max similarity to the
    /// already selected set.
    fn select_mmr(&self, mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
        let lambda = self.config.mmr_lambda.clamp(0.0, 1.0);
        let mut token_sets: Vec<HashSet<String>> = candidates
            .iter()
            .map(|c| {
                tokenize(&c.payload.content)
                    .map(|t| t.to_ascii_lowercase())
                    .collect()
            })
            .collect();

        let mut selected = Vec::new();
        let mut selected_tokens: Vec<HashSet<String>> = Vec::new();

        while selected.len() < limit && !candidates.is_empty() {
            let mut best_index = 0;
            let mut best_value = f32::MIN;
            for (index, candidate) in candidates.iter().enumerate() {
                let redundancy = selected_tokens
                    .iter()
                    .map(|prior| jaccard(&token_sets[index], prior))
                    .fold(0.0f32, f32::max);
                let value = lambda * candidate.fused - (1.0 - lambda) * redundancy;
                if value > best_value
                    || (value == best_value && candidate.id < candidates[best_index].id)
                {
                    best_value = value;
                    best_index = index;
                }
            }
            selected.push(candidates.remove(best_index));
            selected_tokens.push(token_sets.remove(best_index));
        }
        selected
    }
}

// ============================================================================
// Fusion strategies
// ============================================================================

fn fuse_weighted(candidates: &mut [Candidate], alpha: f32) {
    let semantic: Vec<f32> = candidates.iter().filter_map(|c| c.semantic).collect();
    let lexical: Vec<f32> = candidates.iter().filter_map(|c| c.lexical_raw).collect();
    let (semantic_min, semantic_max) = min_max(&semantic);
    let (lexical_min, lexical_max) = min_max(&lexical);

    for candidate in candidates.iter_mut() {
        let s = candidate
            .semantic
            .map(|v| normalize(v, semantic_min, semantic_max))
            .unwrap_or(0.0);
        let l = candidate
            .lexical_raw
            .map(|v| normalize(v, lexical_min, lexical_max))
            .unwrap_or(0.0);
        candidate.fused = alpha * s + (1.0 - alpha) * l;
    }
}

fn fuse_rrf(candidates: &mut [Candidate]) {
    for candidate in candidates.iter_mut() {
        let mut score = 0.0;
        if let Some(rank) = candidate.semantic_rank {
            score += 1.0 / (RRF_K + rank as f32 + 1.0);
        }
        if let Some(rank) = candidate.lexical_rank {
            score += 1.0 / (RRF_K + rank as f32 + 1.0);
        }
        candidate.fused = score;
    }
    // RRF scores are tiny; rescale into [0, 1] for the contract.
    let max = candidates.iter().map(|c| c.fused).fold(0.0f32, f32::max);
    if max > 0.0 {
        for candidate in candidates.iter_mut() {
            candidate.fused /= max;
        }
    }
}

/// BM25 first; when fewer than `limit` hits pass the fraction-of-max
/// threshold, semantic results fill the remainder.
fn fuse_cascade(candidates: &mut [Candidate], limit: usize) {
    let lexical_max = candidates
        .iter()
        .filter_map(|c| c.lexical_raw)
        .fold(0.0f32, f32::max);
    let threshold = lexical_max * CASCADE_FRACTION_OF_MAX;

    let mut passed = 0;
    for candidate in candidates.iter_mut() {
        match candidate.lexical_raw {
            Some(score) if lexical_max > 0.0 && score >= threshold => {
                candidate.fused = score / lexical_max;
                passed += 1;
            }
            _ => candidate.fused = 0.0,
        }
    }

    if passed < limit {
        // Fill with semantic hits, ranked strictly below the lexical pass.
        let floor = candidates
            .iter()
            .filter(|c| c.fused > 0.0)
            .map(|c| c.fused)
            .fold(1.0f32, f32::min);
        for candidate in candidates.iter_mut() {
            if candidate.fused == 0.0 {
                if let Some(semantic) = candidate.semantic {
                    candidate.fused = semantic * floor * 0.99;
                }
            }
        }
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Exponential decay with a 7-day half-life.
pub fn recency_score(now_ms: i64, last_accessed_ms: i64) -> f32 {
    if last_accessed_ms <= 0 {
        return 0.0;
    }
    let age_days = (now_ms - last_accessed_ms).max(0) as f64 / (24.0 * 3600.0 * 1000.0);
    (0.5f64.powf(age_days / RECENCY_HALF_LIFE_DAYS)) as f32
}

/// log(1 + count), saturating at `USAGE_SATURATION` accesses.
pub fn usage_score(access_count: u64) -> f32 {
    let raw = (1.0 + access_count as f64).ln() / (1.0 + USAGE_SATURATION).ln();
    raw.min(1.0) as f32
}

fn keyword_overlap(query_terms: &HashSet<String>, content: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms: HashSet<String> =
        tokenize(content).map(|t| t.to_ascii_lowercase()).collect();
    let shared = query_terms.intersection(&content_terms).count();
    shared as f32 / query_terms.len() as f32
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union.max(1) as f32
}

fn min_max(values: &[f32]) -> (f32, f32) {
    let min = values.iter().copied().fold(f32::MAX, f32::min);
    let max = values.iter().copied().fold(f32::MIN, f32::max);
    (min, max)
}

fn normalize(value: f32, min: f32, max: f32) -> f32 {
    if max <= min {
        // A single-point distribution normalizes to full strength.
        return 1.0;
    }
    (value - min) / (max - min)
}

fn sort_candidates(candidates: &mut [Candidate], sort_by: SortBy) {
    let key = |c: &Candidate| -> f64 {
        match sort_by {
            SortBy::Relevance => c.fused as f64,
            SortBy::Complexity => branch_complexity(&c.payload.content) as f64,
            SortBy::Size => c.payload.content.len() as f64,
            SortBy::Recency => c.payload.last_accessed as f64,
            SortBy::Importance => c.payload.importance,
        }
    };
    candidates.sort_by(|a, b| {
        key(b)
            .partial_cmp(&key(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn payload_metadata(payload: &Payload) -> HashMap<String, serde_json::Value> {
    let mut metadata = payload.metadata.clone();
    let mut put = |key: &str, value: serde_json::Value| {
        metadata.insert(key.to_string(), value);
    };
    put("project", serde_json::json!(payload.project));
    if let Some(v) = &payload.file_path {
        put("file_path", serde_json::json!(v));
    }
    if let Some(v) = &payload.language {
        put("language", serde_json::json!(v));
    }
    if let Some(v) = &payload.unit_type {
        put("unit_type", serde_json::json!(v));
    }
    if let Some(v) = &payload.qualified_name {
        put("qualified_name", serde_json::json!(v));
    }
    if let Some(v) = &payload.category {
        put("category", serde_json::json!(v));
    }
    put("lifecycle_state", serde_json::json!(payload.lifecycle_state));
    put("importance", serde_json::json!(payload.importance));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RerankWeights;
    use crate::types::now_ms;

    fn engine() -> SearchEngine {
        SearchEngine::new(SearchConfig::default())
    }

    fn payload(project: &str, content: &str) -> Payload {
        Payload {
            project: project.to_string(),
            content: content.to_string(),
            lifecycle_state: "ACTIVE".to_string(),
            last_accessed: now_ms(),
            updated_at: now_ms(),
            created_at: now_ms(),
            ..Default::default()
        }
    }

    fn scored(id: &str, score: f32, content: &str) -> ScoredPoint {
        ScoredPoint {
            id: id.to_string(),
            score,
            payload: payload("p", content),
        }
    }

    fn hit(id: &str, score: f32, content: &str) -> (Bm25Hit, Payload) {
        (
            Bm25Hit {
                id: id.to_string(),
                score,
                matched_terms: vec!["term".to_string()],
            },
            payload("p", content),
        )
    }

    #[test]
    fn weighted_fusion_blends_both_sides() {
        let request = SearchRequest::new("term");
        let results = engine().rank(
            &request,
            vec![
                scored("a", 0.9, "alpha"),
                scored("b", 0.85, "beta"),
                scored("d", 0.1, "delta"),
            ],
            vec![hit("b", 5.0, "beta"), hit("c", 1.0, "gamma")],
            &ProjectWeighting::default(),
            now_ms(),
        );
        // b is present in both lists and tops the blend.
        assert_eq!(results[0].unit_id, "b");
        for result in &results {
            assert!((0.0..=1.0).contains(&result.score_final));
        }
        for pair in results.windows(2) {
            assert!(pair[0].score_final >= pair[1].score_final);
        }
    }

    #[test]
    fn rrf_rewards_agreement() {
        let mut request = SearchRequest::new("term");
        request.fusion = FusionStrategy::Rrf;
        let results = engine().rank(
            &request,
            vec![scored("both", 0.8, "x"), scored("sem", 0.9, "y")],
            vec![hit("both", 3.0, "x"), hit("lex", 2.0, "z")],
            &ProjectWeighting::default(),
            now_ms(),
        );
        assert_eq!(results[0].unit_id, "both");
    }

    #[test]
    fn cascade_prefers_lexical_pass() {
        let mut request = SearchRequest::new("term");
        request.fusion = FusionStrategy::Cascade;
        request.limit = 3;
        let results = engine().rank(
            &request,
            vec![scored("sem_only", 0.99, "semantic hit")],
            vec![hit("strong_lex", 8.0, "a"), hit("weak_lex", 1.0, "b")],
            &ProjectWeighting::default(),
            now_ms(),
        );
        assert_eq!(results[0].unit_id, "strong_lex");
        // The weak lexical hit fails the fraction-of-max pass; the semantic
        // fill ranks below the passing hit.
        let sem_position = results.iter().position(|r| r.unit_id == "sem_only").unwrap();
        assert!(sem_position > 0);
    }

    #[test]
    fn empty_query_returns_nothing() {
        let request = SearchRequest::new("   ");
        let results = engine().rank(
            &request,
            vec![scored("a", 0.9, "x")],
            vec![],
            &ProjectWeighting::default(),
            now_ms(),
        );
        assert!(results.is_empty());
    }

    #[test]
    fn limit_zero_is_empty_without_error() {
        let mut request = SearchRequest::new("term");
        request.limit = 0;
        let results = engine().rank(
            &request,
            vec![scored("a", 0.9, "x")],
            vec![],
            &ProjectWeighting::default(),
            now_ms(),
        );
        assert!(results.is_empty());
    }

    #[test]
    fn limit_clamps_to_max() {
        let mut request = SearchRequest::new("term");
        request.limit = 5000;
        request.validate().unwrap();
        assert_eq!(request.limit, MAX_LIMIT);
    }

    #[test]
    fn oversized_query_is_rejected() {
        let mut request = SearchRequest::new("q".repeat(MAX_QUERY_BYTES + 1));
        assert!(request.validate().is_err());
    }

    #[test]
    fn active_project_outranks_others() {
        let request = SearchRequest::new("term");
        let mut semantic = vec![
            ScoredPoint {
                id: "other".to_string(),
                score: 0.9,
                payload: payload("other_project", "x"),
            },
            ScoredPoint {
                id: "mine".to_string(),
                score: 0.7,
                payload: payload("my_project", "y"),
            },
        ];
        semantic.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

        let weighting = ProjectWeighting {
            active: Some("my_project".to_string()),
            archived: HashSet::new(),
        };
        let results = engine().rank(&request, semantic, vec![], &weighting, now_ms());
        assert_eq!(results[0].unit_id, "mine");
    }

    #[test]
    fn archived_projects_sink() {
        let request = SearchRequest::new("term");
        let weighting = ProjectWeighting {
            active: Some("a".to_string()),
            archived: HashSet::from(["old".to_string()]),
        };
        let results = engine().rank(
            &request,
            vec![
                ScoredPoint {
                    id: "arch".to_string(),
                    score: 0.95,
                    payload: payload("old", "x"),
                },
                ScoredPoint {
                    id: "live".to_string(),
                    score: 0.5,
                    payload: payload("b", "y"),
                },
                ScoredPoint {
                    id: "junk".to_string(),
                    score: 0.1,
                    payload: payload("c", "z"),
                },
            ],
            vec![],
            &weighting,
            now_ms(),
        );
        assert_eq!(results[0].unit_id, "live");
    }

    #[test]
    fn recency_decays_with_half_life() {
        let now = now_ms();
        let week = 7 * 24 * 3600 * 1000;
        let fresh = recency_score(now, now);
        let week_old = recency_score(now, now - week);
        assert!((fresh - 1.0).abs() < 0.01);
        assert!((week_old - 0.5).abs() < 0.01);
        assert_eq!(recency_score(now, 0), 0.0);
    }

    #[test]
    fn usage_score_saturates() {
        assert_eq!(usage_score(0), 0.0);
        assert!(usage_score(10) < usage_score(100));
        assert_eq!(usage_score(1000), 1.0);
    }

    #[test]
    fn recent_usage_breaks_near_ties() {
        let engine = SearchEngine::new(SearchConfig {
            rerank_weights: RerankWeights::default(),
            ..Default::default()
        });
        let request = SearchRequest::new("term");
        let now = now_ms();

        let mut hot = payload("p", "hot unit");
        hot.access_count = 50;
        hot.last_accessed = now;
        let mut cold = payload("p", "cold unit");
        cold.access_count = 0;
        cold.last_accessed = now - 90 * 24 * 3600 * 1000;

        let results = engine.rank(
            &request,
            vec![
                ScoredPoint { id: "cold".into(), score: 0.82, payload: cold },
                ScoredPoint { id: "hot".into(), score: 0.80, payload: hot },
                ScoredPoint {
                    id: "junk".into(),
                    score: 0.1,
                    payload: payload("p", "unrelated"),
                },
            ],
            vec![],
            &ProjectWeighting::default(),
            now,
        );
        assert_eq!(results[0].unit_id, "hot");
    }

    #[test]
    fn mmr_diversifies_near_duplicates() {
        let mut request = SearchRequest::new("term");
        request.diversify = true;
        request.limit = 2;
        let results = engine().rank(
            &request,
            vec![
                scored("dup1", 0.95, "identical tokens in this body"),
                scored("dup2", 0.94, "identical tokens in this body"),
                scored("novel", 0.70, "completely different subject matter"),
                scored("junk", 0.10, "noise floor entry"),
            ],
            vec![],
            &ProjectWeighting::default(),
            now_ms(),
        );
        let ids: Vec<_> = results.iter().map(|r| r.unit_id.as_str()).collect();
        assert!(ids.contains(&"dup1"));
        assert!(ids.contains(&"novel"));
    }

    #[test]
    fn confidence_labels_follow_thresholds() {
        let request = SearchRequest::new("term");
        let results = engine().rank(
            &request,
            vec![scored("top", 0.95, "x")],
            vec![hit("top", 9.0, "x")],
            &ProjectWeighting::default(),
            now_ms(),
        );
        assert_eq!(results[0].confidence_label, ConfidenceLabel::Excellent);
    }

    #[test]
    fn payload_filters_apply() {
        let mut request = SearchRequest::new("term");
        request.language = Some("python".to_string());
        request.file_pattern = Some("src/**/*.py".to_string());
        let globs = request.compile_globs().unwrap();

        let mut matching = payload("p", "body");
        matching.language = Some("python".to_string());
        matching.file_path = Some("src/pkg/mod.py".to_string());
        assert!(request.matches_payload(&matching, &globs));

        let mut wrong_language = matching.clone();
        wrong_language.language = Some("rust".to_string());
        assert!(!request.matches_payload(&wrong_language, &globs));

        let mut wrong_path = matching.clone();
        wrong_path.file_path = Some("tests/test_mod.py".to_string());
        assert!(!request.matches_payload(&wrong_path, &globs));
    }

    #[test]
    fn line_count_filter() {
        let mut request = SearchRequest::new("term");
        request.line_count_min = Some(5);
        let globs = request.compile_globs().unwrap();

        let mut small = payload("p", "x");
        small.start_line = Some(1);
        small.end_line = Some(2);
        assert!(!request.matches_payload(&small, &globs));

        let mut big = payload("p", "x");
        big.start_line = Some(1);
        big.end_line = Some(10);
        assert!(request.matches_payload(&big, &globs));
    }

    #[test]
    fn ties_break_by_unit_id() {
        let request = SearchRequest::new("term");
        let results = engine().rank(
            &request,
            vec![scored("b", 0.8, "same"), scored("a", 0.8, "same")],
            vec![],
            &ProjectWeighting::default(),
            now_ms(),
        );
        assert_eq!(results[0].unit_id, "a");
        assert_eq!(results[1].unit_id, "b");
    }
}
