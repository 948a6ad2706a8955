//! Incremental indexing pipeline.
//!
//! Orchestrates parsing, unit diffing, embedding, and the per-file write
//! transaction against the vector store, lexical index, and call graph.
//! Per-file writes serialize under a per-path lock; directory passes run
//! files concurrently under a semaphore with no cross-file ordering. A file
//! whose content hash matches the snapshot table is a no-op.

pub mod snapshot;

use crate::change::{self, UnitChanges};
use crate::discovery::FileDiscovery;
use crate::embedding::EmbeddingEngine;
use crate::error::{Error, Result};
use crate::graph::CallGraphStore;
use crate::parsing::{Diagnostic, ParseResult, ParserRegistry, ParsedUnit};
use crate::search::bm25::{Bm25Index, Lexicon};
use crate::store::codec::{self, KIND_CODE};
use crate::store::pool::StorePool;
use crate::store::{Filter, Point};
use crate::types::{
    now_ms, sha256_hex, CallSite, FunctionNode, LifecycleState, SemanticUnit, UnitType,
};
use dashmap::DashMap;
use snapshot::{snapshot_of, SnapshotTable};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// Progress callback invoked after each file commits.
pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub file: String,
    pub units_added: usize,
    pub units_updated: usize,
    pub units_removed: usize,
    pub elapsed_ms: u64,
}

/// Options for an index pass.
#[derive(Clone, Default)]
pub struct IndexOptions {
    pub recursive: bool,
    pub exclude_globs: Vec<String>,
    pub progress: Option<ProgressFn>,
    pub cancel: Option<CancellationToken>,
}

/// Aggregate result of an index pass. Per-file failures land in `errors`
/// without failing the pass.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub files_indexed: usize,
    /// Unchanged files short-circuited by the snapshot table.
    pub files_skipped: usize,
    pub files_removed: usize,
    pub units_added: usize,
    pub units_updated: usize,
    pub units_removed: usize,
    pub errors: Vec<(String, String)>,
    pub elapsed_ms: u64,
}

/// Outcome of indexing one file.
#[derive(Debug, Clone, Default)]
pub struct FileOutcome {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// True when the content hash matched and nothing was written.
    pub unchanged: bool,
}

pub struct Indexer {
    registry: Arc<ParserRegistry>,
    embeddings: Arc<EmbeddingEngine>,
    pool: Arc<StorePool>,
    lexicon: Arc<Lexicon>,
    graph: Arc<CallGraphStore>,
    collection: String,
    data_dir: PathBuf,
    file_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    tables: DashMap<String, Arc<Mutex<SnapshotTable>>>,
    concurrency: usize,
    embed_timeout: Duration,
    pub failures: AtomicU64,
}

impl Indexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ParserRegistry>,
        embeddings: Arc<EmbeddingEngine>,
        pool: Arc<StorePool>,
        lexicon: Arc<Lexicon>,
        graph: Arc<CallGraphStore>,
        collection: impl Into<String>,
        data_dir: PathBuf,
        concurrency: usize,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            embeddings,
            pool,
            lexicon,
            graph,
            collection: collection.into(),
            data_dir,
            file_locks: DashMap::new(),
            tables: DashMap::new(),
            concurrency: concurrency.max(1),
            embed_timeout,
            failures: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    fn table(&self, project: &str) -> Arc<Mutex<SnapshotTable>> {
        self.tables
            .entry(project.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SnapshotTable::load(&self.data_dir, project)))
            })
            .clone()
    }

    fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.file_locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Index a file or directory tree.
    pub async fn index(
        self: &Arc<Self>,
        project: &str,
        root: &Path,
        options: IndexOptions,
    ) -> Result<IndexReport> {
        let started = Instant::now();
        let mut report = if root.is_dir() {
            self.index_directory(project, root, &options).await?
        } else {
            let parent = root.parent().unwrap_or(Path::new(".")).to_path_buf();
            let mut report = IndexReport::default();
            self.apply_file_outcome(project, &parent, root, &options, &mut report)
                .await;
            self.lexicon.save(project)?;
            self.graph.flush()?;
            {
                let pooled = self.pool.acquire().await?;
                pooled.store().flush()?;
            }
            report
        };
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn index_directory(
        self: &Arc<Self>,
        project: &str,
        root: &Path,
        options: &IndexOptions,
    ) -> Result<IndexReport> {
        let discovery = {
            let mut d = FileDiscovery::new()
                .with_excludes(&options.exclude_globs)
                .with_max_file_size(self.registry.max_file_bytes);
            if !options.recursive {
                d = d.non_recursive();
            }
            d
        };
        let files = discovery
            .discover(root, &self.registry)
            .map_err(|e| Error::storage(format!("file discovery failed: {e}")))?;
        tracing::info!(project, files = files.len(), "starting index pass");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let report = Arc::new(Mutex::new(IndexReport::default()));
        let mut handles = Vec::with_capacity(files.len());

        for file in &files {
            if options
                .cancel
                .as_ref()
                .map(|c| c.is_cancelled())
                .unwrap_or(false)
            {
                tracing::info!("index pass cancelled, letting in-flight files finish");
                break;
            }
            let indexer = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let report = Arc::clone(&report);
            let project = project.to_string();
            let root = root.to_path_buf();
            let file = file.clone();
            let options = options.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                let mut local = IndexReport::default();
                indexer
                    .apply_file_outcome(&project, &root, &file, &options, &mut local)
                    .await;
                merge_reports(&mut *report.lock().await, local);
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        let mut report =
            Arc::try_unwrap(report).map(|m| m.into_inner()).unwrap_or_default();

        // Stale cleanup: stored units whose file no longer exists on disk.
        let seen: HashSet<String> = files
            .iter()
            .filter_map(|f| relative_path(root, f))
            .collect();
        match self.cleanup_stale(project, root, &seen).await {
            Ok((files_removed, units_removed)) => {
                report.files_removed += files_removed;
                report.units_removed += units_removed;
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(project, "stale cleanup failed: {e}");
                report.errors.push(("<stale-cleanup>".to_string(), e.to_string()));
            }
        }

        self.lexicon.save(project)?;
        self.graph.flush()?;
        {
            let table = self.table(project);
            table.lock().await.save(&self.data_dir)?;
        }
        {
            let pooled = self.pool.acquire().await?;
            pooled.store().flush()?;
        }
        Ok(report)
    }

    async fn apply_file_outcome(
        self: &Arc<Self>,
        project: &str,
        root: &Path,
        file: &Path,
        options: &IndexOptions,
        report: &mut IndexReport,
    ) {
        match self.index_file(project, root, file, options.progress.as_ref()).await {
            Ok(outcome) => {
                if outcome.unchanged {
                    report.files_skipped += 1;
                } else {
                    report.files_indexed += 1;
                }
                report.units_added += outcome.added;
                report.units_updated += outcome.updated;
                report.units_removed += outcome.removed;
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(file = %file.display(), "failed to index: {e}");
                report
                    .errors
                    .push((file.display().to_string(), e.to_string()));
            }
        }
    }

    /// The per-file protocol: lock, hash, parse, diff, embed, commit.
    pub async fn index_file(
        self: &Arc<Self>,
        project: &str,
        root: &Path,
        file: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<FileOutcome> {
        let started = Instant::now();
        let absolute = file
            .canonicalize()
            .unwrap_or_else(|_| file.to_path_buf());
        let lock = self.file_lock(&absolute);
        let _guard = lock.lock().await;

        let rel = relative_path(root, file)
            .ok_or_else(|| Error::validation(format!("{} is outside the root", file.display())))?;

        let bytes = match tokio::fs::read(file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let removed = self.remove_file_from_index(project, &rel).await?;
                return Ok(FileOutcome {
                    removed,
                    ..Default::default()
                });
            }
            Err(e) => return Err(e.into()),
        };

        // Unchanged content is a no-op; record the cache hit and stop.
        let file_snapshot = snapshot_of(file, &bytes);
        let table = self.table(project);
        {
            let table = table.lock().await;
            if table.matches(&rel, &file_snapshot.content_hash) {
                tracing::debug!(file = %rel, "content hash unchanged, skipping");
                return Ok(FileOutcome {
                    unchanged: true,
                    ..Default::default()
                });
            }
        }

        // Parse off the loop.
        let registry = Arc::clone(&self.registry);
        let parse_path = file.to_path_buf();
        let parsed: ParseResult =
            tokio::task::spawn_blocking(move || registry.parse(&parse_path, &bytes))
                .await
                .map_err(|e| Error::parser(format!("parser worker panicked: {e}")))?;
        for diagnostic in &parsed.diagnostics {
            match diagnostic {
                Diagnostic::Syntax { line } => {
                    tracing::debug!(file = %rel, line = *line, "parsed past syntax error");
                }
                Diagnostic::OversizeUnit { name } => {
                    tracing::warn!(file = %rel, unit = %name, "unit exceeds content limit, skipped");
                }
                Diagnostic::IoError(message) => {
                    return Err(Error::storage(format!("unreadable {rel}: {message}")));
                }
                Diagnostic::Skipped(reason) => {
                    tracing::debug!(file = %rel, reason = %reason, "file skipped");
                }
            }
        }

        let language = parsed.language.clone().unwrap_or_default();
        let imports: Vec<String> = parsed.imports.iter().map(|i| i.module.clone()).collect();
        let candidates: Vec<SemanticUnit> = parsed
            .units
            .iter()
            .map(|unit| build_unit(project, &rel, &language, &imports, unit))
            .collect();

        // Old units for this file from the store.
        let old_units = self.load_units(project, &rel).await?;
        let changes = change::diff_units(&old_units, &candidates);
        if change::recommend_full_reindex(&changes, old_units.len()) {
            tracing::debug!(file = %rel, "change ratio past threshold, full-file rewrite");
        }

        let outcome = self
            .commit_file(project, &rel, &parsed, &changes, file_snapshot)
            .await?;

        if let Some(progress) = progress {
            progress(ProgressEvent {
                file: rel,
                units_added: outcome.added,
                units_updated: outcome.updated,
                units_removed: outcome.removed,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
        Ok(outcome)
    }

    /// Embed changed units and apply the single logical per-file transaction:
    /// store replace, lexical update, call-graph rewrite, snapshot record.
    async fn commit_file(
        &self,
        project: &str,
        rel: &str,
        parsed: &ParseResult,
        changes: &UnitChanges,
        file_snapshot: crate::types::FileSnapshot,
    ) -> Result<FileOutcome> {
        let to_embed: Vec<&SemanticUnit> =
            changes.added.iter().chain(changes.modified.iter()).collect();
        let texts: Vec<String> = to_embed.iter().map(|u| embedding_text(u)).collect();
        let vectors = tokio::time::timeout(self.embed_timeout, self.embeddings.embed(&texts))
            .await
            .map_err(|_| Error::Timeout {
                operation: "embedding batch".to_string(),
                elapsed_ms: self.embed_timeout.as_millis() as u64,
            })??;

        let points: Vec<Point> = to_embed
            .iter()
            .zip(vectors)
            .map(|(unit, vector)| codec::unit_to_point(unit, vector))
            .collect();
        let delete_ids: Vec<String> = changes.removed.iter().map(|u| u.id.clone()).collect();

        let (bm25, cold) = self.lexicon.project(project);
        if cold {
            self.rebuild_bm25(project, &bm25).await?;
        }

        let pooled = self.pool.acquire().await?;
        {
            // The lexical write lock brackets the whole commit so hybrid
            // readers see the file's update all-or-nothing.
            let mut bm25 = bm25.write();
            pooled
                .store()
                .replace(&self.collection, &delete_ids, points)?;

            for unit in &changes.removed {
                bm25.remove(&unit.id);
            }
            for unit in changes.added.iter().chain(changes.modified.iter()) {
                bm25.add(
                    &unit.id,
                    &Bm25Index::unit_text(&unit.file_path, &unit.signature, &unit.content),
                );
            }

            self.graph.remove_file(project, rel);
            for unit in &parsed.units {
                if matches!(unit.unit_type, UnitType::Function | UnitType::Method) {
                    self.graph.store_function(project, function_node(rel, unit));
                }
            }
            self.graph.store_imports(
                project,
                rel,
                parsed.imports.iter().map(|i| i.module.clone()).collect(),
            );
            let sites: Vec<CallSite> = parsed
                .calls
                .iter()
                .map(|call| CallSite {
                    caller_qualified_name: call.caller_qualified_name.clone(),
                    caller_file: rel.to_string(),
                    caller_line: call.line,
                    callee_name: call.callee_name.clone(),
                    callee_qualified_name: None,
                    call_type: call.call_type,
                })
                .collect();
            self.graph.replace_calls_for_file(project, rel, sites);
        }

        {
            let table = self.table(project);
            let mut table = table.lock().await;
            table.record(rel, file_snapshot, now_ms());
            table.save(&self.data_dir)?;
        }

        Ok(FileOutcome {
            added: changes.added.len(),
            updated: changes.modified.len(),
            removed: changes.removed.len(),
            unchanged: false,
        })
    }

    /// Delete a file's units, lexical docs, graph records, and snapshot.
    pub async fn remove_file_from_index(&self, project: &str, rel: &str) -> Result<usize> {
        let old_units = self.load_units(project, rel).await?;
        let ids: Vec<String> = old_units.iter().map(|u| u.id.clone()).collect();

        let pooled = self.pool.acquire().await?;
        let (bm25, _) = self.lexicon.project(project);
        {
            let mut bm25 = bm25.write();
            pooled.store().delete(&self.collection, &ids)?;
            for id in &ids {
                bm25.remove(id);
            }
            self.graph.remove_file(project, rel);
        }

        {
            let table = self.table(project);
            let mut table = table.lock().await;
            if table.remove(rel) {
                table.save(&self.data_dir)?;
            }
        }
        Ok(ids.len())
    }

    async fn cleanup_stale(
        &self,
        project: &str,
        root: &Path,
        seen: &HashSet<String>,
    ) -> Result<(usize, usize)> {
        let stored_files = self.stored_file_paths(project).await?;
        let mut files_removed = 0;
        let mut units_removed = 0;
        for rel in stored_files {
            if seen.contains(&rel) {
                continue;
            }
            if root.join(&rel).exists() {
                continue;
            }
            units_removed += self.remove_file_from_index(project, &rel).await?;
            files_removed += 1;
        }
        Ok((files_removed, units_removed))
    }

    async fn stored_file_paths(&self, project: &str) -> Result<Vec<String>> {
        let pooled = self.pool.acquire().await?;
        let filter = Filter::new().eq("project", project).eq("scope", KIND_CODE);
        let mut out = HashSet::new();
        let mut cursor = None;
        loop {
            let (page, next) = pooled
                .store()
                .scroll(&self.collection, &filter, cursor, 512)?;
            for point in &page {
                if let Some(path) = &point.payload.file_path {
                    out.insert(path.clone());
                }
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(out.into_iter().collect())
    }

    async fn load_units(&self, project: &str, rel: &str) -> Result<Vec<SemanticUnit>> {
        let pooled = self.pool.acquire().await?;
        let filter = Filter::new()
            .eq("project", project)
            .eq("file_path", rel)
            .eq("scope", KIND_CODE);
        let mut units = Vec::new();
        let mut cursor = None;
        loop {
            let (page, next) = pooled
                .store()
                .scroll(&self.collection, &filter, cursor, 256)?;
            for point in &page {
                match codec::point_to_unit(point) {
                    Ok(unit) => units.push(unit),
                    Err(e) => tracing::warn!(id = %point.id, "dropping malformed unit: {e}"),
                }
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(units)
    }

    /// Cold-start rebuild of a project's lexical index from store payloads.
    /// Covers both code units and project-scoped memories.
    async fn rebuild_bm25(
        &self,
        project: &str,
        bm25: &Arc<parking_lot::RwLock<Bm25Index>>,
    ) -> Result<()> {
        let pooled = self.pool.acquire().await?;
        let filter = Filter::new().eq("project", project);
        let mut cursor = None;
        let mut index = bm25.write();
        loop {
            let (page, next) = pooled
                .store()
                .scroll(&self.collection, &filter, cursor, 512)?;
            for point in &page {
                let payload = &point.payload;
                let text = if codec::is_code_unit(payload) {
                    Bm25Index::unit_text(
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
            tracing::info!(project, docs = index.len(), "rebuilt bm25 from store payloads");
        }
        Ok(())
    }
}

fn merge_reports(total: &mut IndexReport, part: IndexReport) {
    total.files_indexed += part.files_indexed;
    total.files_skipped += part.files_skipped;
    total.files_removed += part.files_removed;
    total.units_added += part.units_added;
    total.units_updated += part.units_updated;
    total.units_removed += part.units_removed;
    total.errors.extend(part.errors);
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    path.strip_prefix(&root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

fn build_unit(
    project: &str,
    rel: &str,
    language: &str,
    imports: &[String],
    parsed: &ParsedUnit,
) -> SemanticUnit {
    let now = now_ms();
    let mut importance = 0.5f32;
    if parsed.is_exported {
        importance += 0.2;
    }
    if parsed.doc.is_some() {
        importance += 0.1;
    }
    SemanticUnit {
        id: crate::types::new_id(),
        project: project.to_string(),
        file_path: rel.to_string(),
        language: language.to_string(),
        unit_type: parsed.unit_type,
        name: parsed.name.clone(),
        qualified_name: parsed.qualified_name.clone(),
        signature: parsed.signature.clone(),
        content: parsed.content.clone(),
        start_line: parsed.start_line,
        end_line: parsed.end_line,
        start_byte: parsed.start_byte,
        end_byte: parsed.end_byte,
        content_hash: sha256_hex(parsed.content.as_bytes()),
        imports: imports.to_vec(),
        importance: importance.clamp(0.0, 1.0),
        lifecycle_state: LifecycleState::Active,
        created_at: now,
        updated_at: now,
        last_accessed: now,
    }
}

fn function_node(rel: &str, parsed: &ParsedUnit) -> FunctionNode {
    FunctionNode {
        qualified_name: parsed.qualified_name.clone(),
        name: parsed.name.clone(),
        file_path: rel.to_string(),
        language: String::new(),
        start_line: parsed.start_line,
        end_line: parsed.end_line,
        is_exported: parsed.is_exported,
        is_async: parsed.is_async,
        parameters: parsed.parameters.clone(),
        return_type: parsed.return_type.clone(),
    }
}

/// Text fed to the embedding model for one unit: identifier context first,
/// then the body.
fn embedding_text(unit: &SemanticUnit) -> String {
    format!("{}\n{}", unit.qualified_name, unit.content)
}
