//! Core server façade.
//!
//! Thin coordinator binding the operation set expected by the MCP and CLI
//! shells to the underlying components: memory CRUD, retrieval, indexing,
//! structural queries, project context, and status. Every operation
//! validates its inputs, checks the read-only flag for writes, and delegates.

use crate::change;
use crate::config::{Config, DATA_DIR};
use crate::embedding::cache::EmbeddingCache;
use crate::embedding::{Embedder, EmbeddingEngine, HashEmbedder};
use crate::error::{Error, Result};
use crate::gate::RetrievalGate;
use crate::graph::CallGraphStore;
use crate::indexer::{IndexOptions, IndexReport, Indexer};
use crate::parsing::ParserRegistry;
use crate::search::bm25::{Bm25Variant, Lexicon};
use crate::search::{Bm25Hit, ProjectWeighting, SearchEngine, SearchMode, SearchRequest};
use crate::store::codec::{self, KIND_CODE};
use crate::store::pool::StorePool;
use crate::store::{FieldValue, Filter, LocalVectorStore, Payload, ScoredPoint, VectorStore};
use crate::types::{
    new_id, now_ms, sha256_hex, ContextLevel, FunctionNode, LifecycleState, MemoryCategory,
    MemoryUnit, Scope, SearchResult,
};
use crate::usage::{LifecyclePolicy, TransitionReport, UsageTracker};
use crate::watcher::{self, WatcherHandle};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Single collection holding code units and memories.
pub const COLLECTION: &str = "units";

// ============================================================================
// Requests
// ============================================================================

/// Input for `store`.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreMemoryRequest {
    pub content: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_context_level")]
    pub context_level: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: f32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_category() -> String {
    "fact".to_string()
}
fn default_context_level() -> String {
    "user".to_string()
}
fn default_scope() -> String {
    "global".to_string()
}
fn default_importance() -> f32 {
    0.5
}

/// Partial update for `update`; absent fields stay unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMemoryRequest {
    pub content: Option<String>,
    pub category: Option<String>,
    pub importance: Option<f32>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Listing filters for `list`/`retrieve`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRequest {
    pub project: Option<String>,
    pub category: Option<String>,
    pub context_level: Option<String>,
    pub tag: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_list_limit() -> usize {
    50
}

/// Aggregate status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub code_units: usize,
    pub memories: usize,
    pub projects: Vec<String>,
    pub active_project: Option<String>,
    pub bm25_documents: usize,
    pub graph_functions: usize,
    pub graph_edges: usize,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub cache: crate::embedding::cache::CacheStats,
    pub pool: crate::store::pool::PoolStatsSnapshot,
    pub gated_queries: u64,
    pub index_failures: u64,
    pub usage_pending: usize,
    pub watcher_running: bool,
    pub read_only: bool,
}

// ============================================================================
// Consent registry
// ============================================================================

/// Per-project opt-in registry for cross-project reads.
pub struct ConsentRegistry {
    entries: DashMap<String, i64>,
    path: Option<PathBuf>,
}

impl ConsentRegistry {
    fn open(path: PathBuf) -> Self {
        let entries = DashMap::new();
        if let Ok(bytes) = std::fs::read(&path) {
            if let Ok(map) = serde_json::from_slice::<HashMap<String, i64>>(&bytes) {
                for (project, at) in map {
                    entries.insert(project, at);
                }
            }
        }
        Self {
            entries,
            path: Some(path),
        }
    }

    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let map: HashMap<String, i64> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        if let Ok(bytes) = serde_json::to_vec_pretty(&map) {
            let _ = std::fs::write(path, bytes);
        }
    }

    pub fn opt_in(&self, project: &str) {
        self.entries.insert(project.to_string(), now_ms());
        self.persist();
    }

    pub fn opt_out(&self, project: &str) -> bool {
        let removed = self.entries.remove(project).is_some();
        self.persist();
        removed
    }

    pub fn contains(&self, project: &str) -> bool {
        self.entries.contains_key(project)
    }

    pub fn list(&self) -> Vec<(String, i64)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        out.sort();
        out
    }
}

// ============================================================================
// Server
// ============================================================================

pub struct CoreServer {
    config: Config,
    embeddings: Arc<EmbeddingEngine>,
    pool: Arc<StorePool>,
    lexicon: Arc<Lexicon>,
    graph: Arc<CallGraphStore>,
    indexer: Arc<Indexer>,
    engine: SearchEngine,
    usage: Arc<UsageTracker>,
    lifecycle: LifecyclePolicy,
    gate: RetrievalGate,
    consent: ConsentRegistry,
    active_project: RwLock<Option<String>>,
    archived_projects: RwLock<HashSet<String>>,
    watcher: tokio::sync::Mutex<Option<WatcherHandle>>,
    root: PathBuf,
}

impl CoreServer {
    /// Open (or create) the engine under a workspace root, choosing the
    /// embedding provider from configuration.
    pub fn open(root: &Path, config: Config) -> Result<Arc<Self>> {
        let embedder = Self::default_embedder(&config);
        Self::open_with_embedder(root, config, embedder)
    }

    #[cfg(feature = "model")]
    fn default_embedder(config: &Config) -> Arc<dyn Embedder> {
        if config.embeddings.model_id == "hash-embedder" {
            return Arc::new(HashEmbedder::new(config.embeddings.dimension));
        }
        match crate::embedding::FastEmbedder::new() {
            Ok(model) => Arc::new(model),
            Err(e) => {
                tracing::warn!("embedding model unavailable, using hash embedder: {e}");
                Arc::new(HashEmbedder::new(config.embeddings.dimension))
            }
        }
    }

    #[cfg(not(feature = "model"))]
    fn default_embedder(config: &Config) -> Arc<dyn Embedder> {
        Arc::new(HashEmbedder::new(config.embeddings.dimension))
    }

    /// Open with an explicit embedding provider (tests inject the
    /// deterministic hash embedder here).
    pub fn open_with_embedder(
        root: &Path,
        config: Config,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<Self>> {
        let data_dir = root.join(DATA_DIR);
        std::fs::create_dir_all(&data_dir)?;

        let dimension = embedder.dimension();
        let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::open(&data_dir.join("store"))?);
        store.ensure_collection(COLLECTION, dimension)?;
        let pool = StorePool::new(store, config.storage.pool.clone());

        let cache_dir = config
            .embeddings
            .cache_path
            .clone()
            .unwrap_or_else(|| data_dir.join("embeddings"));
        let cache = EmbeddingCache::load(
            &cache_dir,
            config.embeddings.cache_max_bytes,
            config.embeddings.cache_ttl_ms,
        )
        .unwrap_or_else(|e| {
            tracing::warn!("embedding cache unreadable, starting empty: {e}");
            EmbeddingCache::new(config.embeddings.cache_max_bytes, config.embeddings.cache_ttl_ms)
        });
        let embeddings = Arc::new(EmbeddingEngine::new(
            embedder,
            Arc::new(cache),
            config.embeddings.parallel,
        ));

        let variant = if config.search.bm25.plus_delta > 0.0 {
            Bm25Variant::Plus
        } else {
            Bm25Variant::Okapi
        };
        let lexicon = Arc::new(Lexicon::open(
            &data_dir.join("bm25"),
            config.search.bm25,
            variant,
        ));
        let graph = Arc::new(CallGraphStore::open(&data_dir.join("graph"))?);

        let registry =
            Arc::new(ParserRegistry::with_max_file_bytes(config.indexing.max_file_bytes));
        let indexer = Arc::new(Indexer::new(
            Arc::clone(&registry),
            Arc::clone(&embeddings),
            Arc::clone(&pool),
            Arc::clone(&lexicon),
            Arc::clone(&graph),
            COLLECTION,
            data_dir.clone(),
            config.indexing.parallel_workers.resolve(),
            Duration::from_millis(config.search.embed_timeout_ms),
        ));

        let server = Arc::new(Self {
            engine: SearchEngine::new(config.search.clone()),
            usage: Arc::new(UsageTracker::new(config.lifecycle.flush_threshold)),
            lifecycle: LifecyclePolicy::new(config.lifecycle.clone()),
            gate: RetrievalGate::new(&config.retrieval_gate),
            consent: ConsentRegistry::open(data_dir.join("consent.json")),
            active_project: RwLock::new(None),
            archived_projects: RwLock::new(HashSet::new()),
            watcher: tokio::sync::Mutex::new(None),
            root: root.to_path_buf(),
            embeddings,
            pool,
            lexicon,
            graph,
            indexer,
            config,
        });
        Ok(server)
    }

    /// Default project name: the workspace directory name.
    pub fn default_project(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "default".to_string())
    }

    fn require_writable(&self) -> Result<()> {
        if self.config.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    fn resolve_project(&self, project: Option<&str>) -> String {
        project
            .map(String::from)
            .or_else(|| self.active_project.read().clone())
            .unwrap_or_else(|| self.default_project())
    }

    fn lexical_project_key(project: Option<&str>) -> String {
        project.map(String::from).unwrap_or_else(|| "_global".to_string())
    }

    // ------------------------------------------------------------------
    // Memory operations
    // ------------------------------------------------------------------

    pub async fn store(&self, request: StoreMemoryRequest) -> Result<String> {
        self.require_writable()?;

        let now = now_ms();
        let memory = MemoryUnit {
            id: new_id(),
            content: request.content,
            category: MemoryCategory::parse(&request.category)?,
            context_level: ContextLevel::parse(&request.context_level)?,
            scope: Scope::parse(&request.scope)?,
            project: request.project,
            tags: request.tags,
            importance: request.importance,
            embedding: Vec::new(),
            metadata: request.metadata,
            lifecycle_state: LifecycleState::Active,
            created_at: now,
            updated_at: now,
            last_accessed: now,
        };
        memory.validate()?;

        let vector = self.embeddings.embed_one(&memory.content).await?;
        let point = codec::memory_to_point(&memory, vector);

        let pooled = self.pool.acquire().await?;
        let key = Self::lexical_project_key(memory.project.as_deref());
        let (bm25, _) = self.lexicon.project(&key);
        {
            let mut bm25 = bm25.write();
            pooled.store().upsert(COLLECTION, vec![point])?;
            bm25.add(&memory.id, &memory.content);
        }
        pooled.store().flush()?;
        self.lexicon.save(&key)?;
        Ok(memory.id)
    }

    pub async fn get(&self, id: &str) -> Result<MemoryUnit> {
        let pooled = self.pool.acquire().await?;
        let point = pooled
            .store()
            .get(COLLECTION, id)?
            .ok_or_else(|| Error::not_found(format!("memory {id}")))?;
        if codec::is_code_unit(&point.payload) {
            return Err(Error::not_found(format!("memory {id}")));
        }
        codec::point_to_memory(&point).map_err(|_| Error::not_found(format!("memory {id}")))
    }

    pub async fn update(&self, id: &str, patch: UpdateMemoryRequest) -> Result<MemoryUnit> {
        self.require_writable()?;
        let mut memory = self.get(id).await?;

        let content_changed = match &patch.content {
            Some(content) if *content != memory.content => {
                memory.content = content.clone();
                true
            }
            _ => false,
        };
        if let Some(category) = &patch.category {
            memory.category = MemoryCategory::parse(category)?;
        }
        if let Some(importance) = patch.importance {
            memory.importance = importance;
        }
        if let Some(tags) = patch.tags {
            memory.tags = tags;
        }
        if let Some(metadata) = patch.metadata {
            memory.metadata.extend(metadata);
        }
        memory.updated_at = now_ms();
        memory.validate()?;

        // Content change re-embeds; otherwise the stored vector stands.
        let vector = if content_changed || memory.embedding.is_empty() {
            self.embeddings.embed_one(&memory.content).await?
        } else {
            memory.embedding.clone()
        };

        let point = codec::memory_to_point(&memory, vector);
        let pooled = self.pool.acquire().await?;
        let key = Self::lexical_project_key(memory.project.as_deref());
        let (bm25, _) = self.lexicon.project(&key);
        {
            let mut bm25 = bm25.write();
            pooled.store().upsert(COLLECTION, vec![point])?;
            if content_changed {
                bm25.add(&memory.id, &memory.content);
            }
        }
        pooled.store().flush()?;
        Ok(memory)
    }

    pub async fn list(&self, request: ListRequest) -> Result<Vec<MemoryUnit>> {
        let mut filter = Filter::new();
        if let Some(project) = &request.project {
            filter = filter.eq("project", project.as_str());
        }
        if let Some(category) = &request.category {
            MemoryCategory::parse(category)?;
            filter = filter.eq("category", category.as_str());
        }
        if let Some(level) = &request.context_level {
            ContextLevel::parse(level)?;
            filter = filter.eq("context_level", level.as_str());
        }
        if let Some(tag) = &request.tag {
            filter = filter.eq("tags", tag.as_str());
        }

        let pooled = self.pool.acquire().await?;
        let mut memories = Vec::new();
        let mut cursor = None;
        loop {
            let (page, next) = pooled.store().scroll(COLLECTION, &filter, cursor, 256)?;
            for point in &page {
                if codec::is_code_unit(&point.payload) {
                    continue;
                }
                if let Ok(memory) = codec::point_to_memory(point) {
                    memories.push(memory);
                }
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        memories.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        // Offset past the end is an empty page, not an error.
        Ok(memories
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect())
    }

    /// `retrieve` is filter-driven listing, importance first.
    pub async fn retrieve(&self, request: ListRequest) -> Result<Vec<MemoryUnit>> {
        let mut memories = self
            .list(ListRequest {
                offset: 0,
                limit: usize::MAX,
                ..request.clone()
            })
            .await?;
        memories.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        Ok(memories
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.require_writable()?;
        // Verifies existence and kind.
        let memory = self.get(id).await?;
        let pooled = self.pool.acquire().await?;
        let key = Self::lexical_project_key(memory.project.as_deref());
        let (bm25, _) = self.lexicon.project(&key);
        {
            let mut bm25 = bm25.write();
            pooled.store().delete(COLLECTION, &[id.to_string()])?;
            bm25.remove(id);
        }
        pooled.store().flush()?;
        Ok(())
    }

    pub async fn bulk_delete(&self, ids: &[String]) -> Result<usize> {
        self.require_writable()?;
        let pooled = self.pool.acquire().await?;

        // Resolve each point's lexical key before the delete so the lexical
        // docs come out with the stored ones.
        let mut lexical: Vec<(String, String)> = Vec::new();
        for id in ids {
            if let Some(point) = pooled.store().get(COLLECTION, id)? {
                let key = if point.payload.project.is_empty() {
                    "_global".to_string()
                } else {
                    point.payload.project.clone()
                };
                lexical.push((id.clone(), key));
            }
        }

        let deleted = pooled.store().delete(COLLECTION, ids)?;
        for (id, key) in lexical {
            let (bm25, _) = self.lexicon.project(&key);
            bm25.write().remove(&id);
        }
        pooled.store().flush()?;
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    pub async fn search(&self, mut request: SearchRequest) -> Result<Vec<SearchResult>> {
        request.validate()?;
        if request.query.trim().is_empty() || request.limit == 0 {
            return Ok(Vec::new());
        }
        // The gate runs before any embedding work; that ordering is the
        // entire value of having it.
        if !self.gate.should_retrieve(&request.query) {
            tracing::debug!(query = %request.query, "query gated");
            return Ok(Vec::new());
        }

        let project = request
            .project
            .clone()
            .or_else(|| self.active_project.read().clone());
        let projects: Vec<String> = match &project {
            Some(p) => vec![p.clone()],
            None => Vec::new(),
        };
        self.search_projects(&request, &projects).await
    }

    /// Search the active project plus every opted-in project.
    pub async fn search_across_opted_in(
        &self,
        mut request: SearchRequest,
    ) -> Result<Vec<SearchResult>> {
        request.validate()?;
        if request.query.trim().is_empty() || request.limit == 0 {
            return Ok(Vec::new());
        }
        if !self.gate.should_retrieve(&request.query) {
            return Ok(Vec::new());
        }

        let mut projects: Vec<String> = self.consent.list().into_iter().map(|(p, _)| p).collect();
        if let Some(active) = self.active_project.read().clone() {
            if !projects.contains(&active) {
                projects.push(active);
            }
        }
        if projects.is_empty() {
            return Ok(Vec::new());
        }
        request.project = None;
        self.search_projects(&request, &projects).await
    }

    async fn search_projects(
        &self,
        request: &SearchRequest,
        projects: &[String],
    ) -> Result<Vec<SearchResult>> {
        let globs = request.compile_globs()?;
        let overfetch = self.engine.overfetch(request.limit);

        let mut store_filter = Filter::new();
        if !projects.is_empty() {
            store_filter = store_filter.any_of(
                "project",
                projects.iter().map(|p| FieldValue::from(p.as_str())),
            );
        }

        // Dense side.
        let semantic: Vec<ScoredPoint> = if request.mode != SearchMode::Keyword {
            let vector = tokio::time::timeout(
                Duration::from_millis(self.config.search.embed_timeout_ms),
                self.embeddings.embed_one(&request.query),
            )
            .await
            .map_err(|_| Error::Timeout {
                operation: "query embedding".to_string(),
                elapsed_ms: self.config.search.embed_timeout_ms,
            })??;

            let pooled = self.pool.acquire().await?;
            pooled
                .store()
                .search(COLLECTION, &vector, &store_filter, overfetch)?
                .into_iter()
                .filter(|point| request.matches_payload(&point.payload, &globs))
                .collect()
        } else {
            Vec::new()
        };

        // Lexical side, merged across the queried projects.
        let lexical: Vec<(Bm25Hit, Payload)> = if request.mode != SearchMode::Semantic {
            let pooled = self.pool.acquire().await?;
            let mut hits: Vec<(Bm25Hit, Payload)> = Vec::new();
            let keys: Vec<String> = if projects.is_empty() {
                // Unscoped search: every loaded index plus the global bucket.
                let mut keys = self.lexicon.loaded_keys();
                if !keys.iter().any(|k| k == "_global") {
                    keys.push("_global".to_string());
                }
                keys
            } else {
                projects
                    .iter()
                    .map(|p| Self::lexical_project_key(Some(p)))
                    .collect()
            };
            for key in keys {
                let (bm25, cold) = self.lexicon.project(&key);
                if cold {
                    // Segments were missing; rebuild from store payloads.
                    self.rebuild_lexical(&key, &bm25, pooled.store())?;
                }
                let project_hits = { bm25.read().query(&request.query, overfetch) };
                for hit in project_hits {
                    let Some(point) = pooled.store().get(COLLECTION, &hit.id)? else {
                        continue;
                    };
                    if !projects.is_empty() && !projects.contains(&point.payload.project) {
                        continue;
                    }
                    if request.matches_payload(&point.payload, &globs) {
                        hits.push((hit, point.payload));
                    }
                }
            }
            hits.sort_by(|a, b| {
                b.0.score
                    .partial_cmp(&a.0.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            hits.truncate(overfetch);
            hits
        } else {
            Vec::new()
        };

        let weighting = ProjectWeighting {
            active: self.active_project.read().clone(),
            archived: self.archived_projects.read().clone(),
        };
        let results = self
            .engine
            .rank(request, semantic, lexical, &weighting, now_ms());

        // Usage bookkeeping; flush inline when the buffer is due.
        let ids: Vec<String> = results.iter().map(|r| r.unit_id.clone()).collect();
        let fingerprint = sha256_hex(request.query.as_bytes())[..16].to_string();
        if self.usage.record_access(&ids, &fingerprint) {
            let pooled = self.pool.acquire().await?;
            if let Err(e) = self.usage.flush(pooled.store(), COLLECTION) {
                tracing::warn!("usage flush failed: {e}");
            }
        }
        Ok(results)
    }

    /// Replay a lexical index from the stored payloads of one project key
    /// (the `_global` bucket maps to project-less memories).
    fn rebuild_lexical(
        &self,
        key: &str,
        bm25: &Arc<parking_lot::RwLock<crate::search::Bm25Index>>,
        store: &dyn VectorStore,
    ) -> Result<()> {
        let project = if key == "_global" { "" } else { key };
        let filter = Filter::new().eq("project", project);
        let mut index = bm25.write();
        let mut cursor = None;
        loop {
            let (page, next) = store.scroll(COLLECTION, &filter, cursor, 512)?;
            for point in &page {
                let payload = &point.payload;
                let text = if codec::is_code_unit(payload) {
                    crate::search::Bm25Index::unit_text(
                        payload.file_path.as_deref().unwrap_or(""),
                        payload.signature.as_deref().unwrap_or(""),
                        &payload.content,
                    )
                } else {
                    payload.content.clone()
                };
                index.add(&point.id, &text);
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        if !index.is_empty() {
            tracing::info!(key, docs = index.len(), "rebuilt lexical index from store");
        }
        Ok(())
    }

    /// Dense-only similarity lookup for a content blob.
    pub async fn find_similar(
        &self,
        content: &str,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        if content.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let limit = limit.min(crate::search::MAX_LIMIT);
        let vector = self.embeddings.embed_one(content).await?;

        let mut filter = Filter::new();
        if let Some(project) = project {
            filter = filter.eq("project", project);
        }
        let pooled = self.pool.acquire().await?;
        let points = pooled.store().search(COLLECTION, &vector, &filter, limit)?;
        Ok(points
            .into_iter()
            .map(|point| SearchResult {
                unit_id: point.id.clone(),
                content: point.payload.content.clone(),
                metadata: Default::default(),
                score_semantic: point.score,
                score_lexical: 0.0,
                score_final: point.score,
                matched_terms: Vec::new(),
                confidence_label: crate::types::ConfidenceLabel::from_score(point.score),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    pub async fn index(&self, path: &Path, options: IndexOptions) -> Result<IndexReport> {
        self.require_writable()?;
        let project = self.resolve_project(None);
        self.indexer.index(&project, path, options).await
    }

    pub async fn index_project(
        &self,
        project: &str,
        path: &Path,
        options: IndexOptions,
    ) -> Result<IndexReport> {
        self.require_writable()?;
        self.indexer.index(project, path, options).await
    }

    /// Drop everything stored for a project, then rebuild from disk.
    pub async fn reindex(&self, project: &str, path: &Path) -> Result<IndexReport> {
        self.require_writable()?;
        {
            let pooled = self.pool.acquire().await?;
            let filter = Filter::new().eq("project", project).eq("scope", KIND_CODE);
            pooled.store().delete_by_filter(COLLECTION, &filter)?;
        }
        self.graph.reset_project(project);
        self.indexer
            .index(
                project,
                path,
                IndexOptions {
                    recursive: true,
                    exclude_globs: self.config.indexing.exclude_patterns.clone(),
                    ..Default::default()
                },
            )
            .await
    }

    /// Turn the file watcher on or off for a root.
    pub async fn watch(&self, root: &Path, enable: bool) -> Result<bool> {
        let mut slot = self.watcher.lock().await;
        if !enable {
            if let Some(handle) = slot.take() {
                handle.stop();
            }
            return Ok(false);
        }
        self.require_writable()?;
        if slot.is_some() {
            return Ok(true);
        }
        let handle = watcher::watch(
            self.resolve_project(None),
            root.to_path_buf(),
            self.config.indexing.file_watcher.debounce_ms,
            Arc::clone(&self.indexer),
        )
        .await?;
        *slot = Some(handle);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Structural queries
    // ------------------------------------------------------------------

    fn resolve_function(&self, project: &str, name: &str) -> Result<String> {
        if self.graph.get_function(project, name).is_some() {
            return Ok(name.to_string());
        }
        let matches = self.graph.find_by_name(project, name);
        match matches.len() {
            0 => Err(Error::not_found(format!("function {name} in {project}"))),
            1 => Ok(matches.into_iter().next().expect("len checked")),
            _ => Err(Error::validation(format!(
                "ambiguous function name {name}: {}",
                matches.join(", ")
            ))),
        }
    }

    pub fn callers(
        &self,
        project: Option<&str>,
        name: &str,
        max_depth: usize,
        include_indirect: bool,
    ) -> Result<Vec<FunctionNode>> {
        let project = self.resolve_project(project);
        let qualified = self.resolve_function(&project, name)?;
        Ok(self.graph.callers(&project, &qualified, max_depth, include_indirect))
    }

    pub fn callees(
        &self,
        project: Option<&str>,
        name: &str,
        max_depth: usize,
        include_indirect: bool,
    ) -> Result<Vec<FunctionNode>> {
        let project = self.resolve_project(project);
        let qualified = self.resolve_function(&project, name)?;
        Ok(self.graph.callees(&project, &qualified, max_depth, include_indirect))
    }

    pub fn call_chain(
        &self,
        project: Option<&str>,
        from: &str,
        to: &str,
        max_depth: usize,
        max_paths: usize,
    ) -> Result<Vec<Vec<String>>> {
        let project = self.resolve_project(project);
        let from = self.resolve_function(&project, from)?;
        let to = self.resolve_function(&project, to)?;
        Ok(self.graph.call_chain(&project, &from, &to, max_depth, max_paths))
    }

    pub fn dependencies(&self, project: Option<&str>, file: &str) -> Vec<String> {
        let project = self.resolve_project(project);
        self.graph.dependencies(&project, file)
    }

    pub fn dependents(&self, project: Option<&str>, file: &str) -> Vec<String> {
        let project = self.resolve_project(project);
        self.graph.dependents(&project, file)
    }

    // ------------------------------------------------------------------
    // Project context
    // ------------------------------------------------------------------

    pub fn switch_project(&self, project: &str) -> Result<()> {
        if project.is_empty() {
            return Err(Error::validation("project must not be empty"));
        }
        *self.active_project.write() = Some(project.to_string());
        Ok(())
    }

    pub fn active_project(&self) -> Option<String> {
        self.active_project.read().clone()
    }

    pub fn opt_in(&self, project: &str) -> Result<()> {
        if project.is_empty() {
            return Err(Error::validation("project must not be empty"));
        }
        self.consent.opt_in(project);
        Ok(())
    }

    pub fn opt_out(&self, project: &str) -> bool {
        self.consent.opt_out(project)
    }

    pub fn list_opted_in(&self) -> Vec<(String, i64)> {
        self.consent.list()
    }

    pub fn set_project_archived(&self, project: &str, archived: bool) {
        let mut set = self.archived_projects.write();
        if archived {
            set.insert(project.to_string());
        } else {
            set.remove(project);
        }
    }

    // ------------------------------------------------------------------
    // Status and maintenance
    // ------------------------------------------------------------------

    pub async fn status(&self) -> Result<StatusReport> {
        let pooled = self.pool.acquire().await?;
        let code_filter = Filter::new().eq("scope", KIND_CODE);
        let code_units = pooled.store().count(COLLECTION, &code_filter)?;
        let total = pooled.store().count(COLLECTION, &Filter::new())?;

        let mut projects = HashSet::new();
        let mut cursor = None;
        loop {
            let (page, next) = pooled.store().scroll(COLLECTION, &Filter::new(), cursor, 512)?;
            for point in &page {
                if !point.payload.project.is_empty() {
                    projects.insert(point.payload.project.clone());
                }
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        let mut projects: Vec<String> = projects.into_iter().collect();
        projects.sort();

        let (graph_functions, graph_edges) = {
            let mut functions = 0;
            let mut edges = 0;
            for project in &projects {
                let (f, e) = self.graph.stats(project);
                functions += f;
                edges += e;
            }
            (functions, edges)
        };

        let bm25_documents = projects
            .iter()
            .map(|p| self.lexicon.project(p).0.read().len())
            .sum();

        Ok(StatusReport {
            code_units,
            memories: total - code_units,
            active_project: self.active_project.read().clone(),
            projects,
            bm25_documents,
            graph_functions,
            graph_edges,
            embedding_model: self.embeddings.model_id().to_string(),
            embedding_dimension: self.embeddings.dimension(),
            cache: self.embeddings.cache().stats(),
            pool: self.pool.stats(),
            gated_queries: self.gate.gated_count(),
            index_failures: self.indexer.failures.load(Ordering::Relaxed),
            usage_pending: self.usage.pending(),
            watcher_running: self
                .watcher
                .try_lock()
                .map(|w| w.as_ref().map(|h| h.is_running()).unwrap_or(false))
                .unwrap_or(true),
            read_only: self.config.read_only,
        })
    }

    pub async fn metrics(&self) -> Result<HashMap<String, serde_json::Value>> {
        let status = self.status().await?;
        Ok(HashMap::from([
            ("code_units".to_string(), serde_json::json!(status.code_units)),
            ("memories".to_string(), serde_json::json!(status.memories)),
            ("bm25_documents".to_string(), serde_json::json!(status.bm25_documents)),
            ("graph_functions".to_string(), serde_json::json!(status.graph_functions)),
            ("graph_edges".to_string(), serde_json::json!(status.graph_edges)),
            ("cache_hits".to_string(), serde_json::json!(status.cache.hits)),
            ("cache_misses".to_string(), serde_json::json!(status.cache.misses)),
            ("pool_acquired".to_string(), serde_json::json!(status.pool.acquired)),
            ("pool_timeouts".to_string(), serde_json::json!(status.pool.acquire_timeouts)),
            ("gated_queries".to_string(), serde_json::json!(status.gated_queries)),
            ("index_failures".to_string(), serde_json::json!(status.index_failures)),
            ("usage_pending".to_string(), serde_json::json!(status.usage_pending)),
        ]))
    }

    /// Weighted aggregate in [0, 1]: pool health, store reachability,
    /// failure pressure, watcher liveness.
    pub async fn health_score(&self) -> f32 {
        let pool_ok = self.pool.health_fast();
        let store_ok = match self.pool.acquire().await {
            Ok(pooled) => pooled.store().count(COLLECTION, &Filter::new()).is_ok(),
            Err(_) => false,
        };
        let failures = self.indexer.failures.load(Ordering::Relaxed);
        let failure_score = 1.0 / (1.0 + failures as f32 / 10.0);
        let watcher_score = if self.config.indexing.file_watcher.enabled {
            self.watcher
                .try_lock()
                .map(|w| w.as_ref().map(|h| h.is_running()).unwrap_or(false))
                .map(|running| if running { 1.0 } else { 0.0 })
                .unwrap_or(1.0)
        } else {
            1.0
        };

        0.4 * pool_ok as u8 as f32
            + 0.3 * store_ok as u8 as f32
            + 0.2 * failure_score
            + 0.1 * watcher_score
    }

    /// Periodic maintenance: usage flush, lifecycle transitions, persistence.
    pub async fn run_maintenance(&self) -> Result<TransitionReport> {
        let pooled = self.pool.acquire().await?;
        if let Err(e) = self.usage.flush(pooled.store(), COLLECTION) {
            tracing::warn!("usage flush failed: {e}");
        }
        let report = self
            .lifecycle
            .run_transitions(pooled.store(), COLLECTION, now_ms())?;
        pooled.store().flush()?;
        if let Some(cache_dir) = self
            .config
            .embeddings
            .cache_path
            .clone()
            .or_else(|| Some(self.root.join(DATA_DIR).join("embeddings")))
        {
            if let Err(e) = self.embeddings.cache().save(&cache_dir) {
                tracing::warn!("embedding cache save failed: {e}");
            }
        }
        self.lexicon.save_all()?;
        self.graph.flush()?;
        Ok(report)
    }

    /// Rename-aware change summary between the stored snapshots and a new
    /// walk, exposed for reconciliation tooling.
    pub fn classify_changes(
        old: &HashMap<String, crate::types::FileSnapshot>,
        new: &HashMap<String, crate::types::FileSnapshot>,
    ) -> change::FileChanges {
        change::diff_files(old, new)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
