//! Vector store.
//!
//! Logical contract, independent of backend: collections of points
//! (id, vector, payload) supporting upsert, delete by id or filter, ANN
//! search with filtering, scroll, and count. Payloads follow one fixed typed
//! schema; filters are conjunctions of equality and `in` predicates. Scores
//! are cosine similarity normalized to [0, 1].
//!
//! The bundled backend is [`LocalVectorStore`]: in-process points with a
//! lazily rebuilt HNSW index and bincode persistence per collection.

pub mod codec;
pub mod pool;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use dashmap::DashMap;
use instant_distance::{Builder, HnswMap, Search};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Collection holding code units and memories.
pub const DEFAULT_COLLECTION: &str = "units";

/// Collections below this size are scored exactly; larger ones go through
/// the HNSW index.
const ANN_MIN_POINTS: usize = 256;

// ============================================================================
// Payload
// ============================================================================

/// Fixed payload schema for every stored point.
///
/// Loaders project raw storage into this type at the boundary; downstream
/// code never branches on loose maps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Payload {
    // String fields
    pub project: String,
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub unit_type: Option<String>,
    pub name: Option<String>,
    pub qualified_name: Option<String>,
    pub signature: Option<String>,
    pub content: String,
    pub category: Option<String>,
    pub context_level: Option<String>,
    pub scope: Option<String>,
    pub lifecycle_state: String,
    pub content_hash: Option<String>,
    // List-of-string fields
    pub tags: Vec<String>,
    pub imports: Vec<String>,
    // Numeric fields
    pub start_line: Option<u64>,
    pub end_line: Option<u64>,
    pub start_byte: Option<u64>,
    pub end_byte: Option<u64>,
    pub importance: f64,
    pub access_count: u64,
    // Timestamps (epoch ms)
    pub created_at: i64,
    pub updated_at: i64,
    pub last_accessed: i64,
    // Free-form extras (memories only)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A single scalar for filter comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

impl Payload {
    /// Project a named field to a comparable value. List fields compare as
    /// membership (any element equal).
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        let s = |v: &Option<String>| v.clone().map(FieldValue::Str);
        match name {
            "project" => Some(FieldValue::Str(self.project.clone())),
            "file_path" => s(&self.file_path),
            "language" => s(&self.language),
            "unit_type" => s(&self.unit_type),
            "name" => s(&self.name),
            "qualified_name" => s(&self.qualified_name),
            "signature" => s(&self.signature),
            "category" => s(&self.category),
            "context_level" => s(&self.context_level),
            "scope" => s(&self.scope),
            "lifecycle_state" => Some(FieldValue::Str(self.lifecycle_state.clone())),
            "content_hash" => s(&self.content_hash),
            "start_line" => self.start_line.map(|n| FieldValue::Num(n as f64)),
            "end_line" => self.end_line.map(|n| FieldValue::Num(n as f64)),
            "importance" => Some(FieldValue::Num(self.importance)),
            "access_count" => Some(FieldValue::Num(self.access_count as f64)),
            "created_at" => Some(FieldValue::Num(self.created_at as f64)),
            "updated_at" => Some(FieldValue::Num(self.updated_at as f64)),
            "last_accessed" => Some(FieldValue::Num(self.last_accessed as f64)),
            _ => None,
        }
    }

    fn list_field(&self, name: &str) -> Option<&[String]> {
        match name {
            "tags" => Some(&self.tags),
            "imports" => Some(&self.imports),
            _ => None,
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// One predicate over a payload field.
#[derive(Debug, Clone)]
pub enum Condition {
    Eq { field: String, value: FieldValue },
    In { field: String, values: Vec<FieldValue> },
}

/// Conjunction of predicates. An empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub must: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.must.push(Condition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn any_of(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = FieldValue>,
    ) -> Self {
        self.must.push(Condition::In {
            field: field.into(),
            values: values.into_iter().collect(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|condition| match condition {
            Condition::Eq { field, value } => field_matches(payload, field, value),
            Condition::In { field, values } => {
                values.iter().any(|v| field_matches(payload, field, v))
            }
        })
    }
}

fn field_matches(payload: &Payload, field: &str, value: &FieldValue) -> bool {
    if let Some(list) = payload.list_field(field) {
        return match value {
            FieldValue::Str(s) => list.iter().any(|item| item == s),
            _ => false,
        };
    }
    payload.field(field).map(|v| v == *value).unwrap_or(false)
}

// ============================================================================
// Points and results
// ============================================================================

/// One stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// One ANN search hit.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

// ============================================================================
// Store contract
// ============================================================================

/// Backend-independent store contract.
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent; error on dimension mismatch.
    fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()>;

    fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    fn delete(&self, collection: &str, ids: &[String]) -> Result<usize>;

    fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<usize>;

    /// Atomic delete-then-upsert: both become visible in one step. This is
    /// the per-file transaction primitive.
    fn replace(&self, collection: &str, delete_ids: &[String], points: Vec<Point>) -> Result<()>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Point>>;

    fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;

    /// Page through matching points ordered by id. The cursor is the last id
    /// of the previous page.
    fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<(Vec<Point>, Option<String>)>;

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize>;

    /// Apply a payload mutation to one point. Returns false when the id is
    /// unknown.
    fn update_payload(
        &self,
        collection: &str,
        id: &str,
        update: &dyn Fn(&mut Payload),
    ) -> Result<bool>;

    fn dimension(&self, collection: &str) -> Result<usize>;

    /// Persist pending state.
    fn flush(&self) -> Result<()>;
}

// ============================================================================
// Local implementation
// ============================================================================

/// Wrapper giving vectors the distance instant-distance expects.
#[derive(Debug, Clone)]
struct AnnVector(Vec<f32>);

impl instant_distance::Point for AnnVector {
    fn distance(&self, other: &Self) -> f32 {
        // Cosine distance over unit vectors.
        let dot: f32 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        1.0 - dot
    }
}

struct CollectionInner {
    points: HashMap<String, Point>,
    /// Lazily rebuilt after mutations; None means stale.
    hnsw: Option<HnswMap<AnnVector, String>>,
}

struct Collection {
    dimension: usize,
    inner: RwLock<CollectionInner>,
}

#[derive(Serialize, Deserialize)]
struct PersistedCollection {
    dimension: usize,
    points: Vec<Point>,
}

/// In-process vector store with bincode persistence.
pub struct LocalVectorStore {
    collections: DashMap<String, Arc<Collection>>,
    dir: Option<PathBuf>,
}

impl LocalVectorStore {
    /// Purely in-memory store (tests, ephemeral runs).
    pub fn in_memory() -> Self {
        Self {
            collections: DashMap::new(),
            dir: None,
        }
    }

    /// Store persisted under `dir`, loading any existing collections.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let store = Self {
            collections: DashMap::new(),
            dir: Some(dir.to_path_buf()),
        };

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(collection_name) = name.strip_suffix(".store.bin") else {
                continue;
            };
            let bytes = std::fs::read(&path)?;
            let persisted: PersistedCollection = bincode::deserialize(&bytes)
                .map_err(|e| Error::storage_with(format!("corrupt collection {name}"), e))?;
            let collection = Collection {
                dimension: persisted.dimension,
                inner: RwLock::new(CollectionInner {
                    points: persisted
                        .points
                        .into_iter()
                        .map(|p| (p.id.clone(), p))
                        .collect(),
                    hnsw: None,
                }),
            };
            store
                .collections
                .insert(collection_name.to_string(), Arc::new(collection));
        }
        Ok(store)
    }

    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .get(name)
            .map(|c| Arc::clone(&c))
            .ok_or_else(|| Error::not_found(format!("collection {name}")))
    }

    fn check_dimensions(collection: &Collection, points: &[Point]) -> Result<()> {
        for point in points {
            if point.vector.len() != collection.dimension {
                return Err(Error::storage(format!(
                    "vector dimension {} does not match collection dimension {}",
                    point.vector.len(),
                    collection.dimension
                )));
            }
        }
        Ok(())
    }
}

impl VectorStore for LocalVectorStore {
    fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        if let Some(existing) = self.collections.get(name) {
            if existing.dimension != dimension {
                return Err(Error::storage(format!(
                    "collection {name} has dimension {}, requested {dimension}; \
                     changing models requires a collection rebuild",
                    existing.dimension
                )));
            }
            return Ok(());
        }
        self.collections.insert(
            name.to_string(),
            Arc::new(Collection {
                dimension,
                inner: RwLock::new(CollectionInner {
                    points: HashMap::new(),
                    hnsw: None,
                }),
            }),
        );
        Ok(())
    }

    fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let collection = self.collection(collection)?;
        Self::check_dimensions(&collection, &points)?;
        let mut inner = collection.inner.write();
        for point in points {
            inner.points.insert(point.id.clone(), point);
        }
        inner.hnsw = None;
        Ok(())
    }

    fn delete(&self, collection: &str, ids: &[String]) -> Result<usize> {
        let collection = self.collection(collection)?;
        let mut inner = collection.inner.write();
        let mut removed = 0;
        for id in ids {
            if inner.points.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            inner.hnsw = None;
        }
        Ok(removed)
    }

    fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let collection = self.collection(collection)?;
        let mut inner = collection.inner.write();
        let before = inner.points.len();
        inner.points.retain(|_, point| !filter.matches(&point.payload));
        let removed = before - inner.points.len();
        if removed > 0 {
            inner.hnsw = None;
        }
        Ok(removed)
    }

    fn replace(&self, collection: &str, delete_ids: &[String], points: Vec<Point>) -> Result<()> {
        let collection = self.collection(collection)?;
        Self::check_dimensions(&collection, &points)?;
        let mut inner = collection.inner.write();
        for id in delete_ids {
            inner.points.remove(id);
        }
        for point in points {
            inner.points.insert(point.id.clone(), point);
        }
        inner.hnsw = None;
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Point>> {
        let collection = self.collection(collection)?;
        Ok(collection.inner.read().points.get(id).cloned())
    }

    fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collection = self.collection(collection)?;
        if vector.len() != collection.dimension {
            return Err(Error::storage(format!(
                "query dimension {} does not match collection dimension {}",
                vector.len(),
                collection.dimension
            )));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Filtered queries and small collections score exactly; the ANN path
        // covers the large unfiltered case.
        let use_ann = {
            let inner = collection.inner.read();
            filter.is_empty() && inner.points.len() >= ANN_MIN_POINTS
        };

        if use_ann {
            // Rebuild outside the read path if stale.
            let needs_rebuild = collection.inner.read().hnsw.is_none();
            if needs_rebuild {
                let mut inner = collection.inner.write();
                if inner.hnsw.is_none() {
                    let (vectors, ids): (Vec<_>, Vec<_>) = inner
                        .points
                        .values()
                        .map(|p| (AnnVector(p.vector.clone()), p.id.clone()))
                        .unzip();
                    inner.hnsw = Some(Builder::default().build(vectors, ids));
                }
            }

            let inner = collection.inner.read();
            if let Some(hnsw) = inner.hnsw.as_ref() {
                let mut search = Search::default();
                let query = AnnVector(vector.to_vec());
                let mut results: Vec<ScoredPoint> = hnsw
                    .search(&query, &mut search)
                    .take(limit)
                    .filter_map(|item| {
                        let id = item.value.clone();
                        inner.points.get(&id).map(|point| ScoredPoint {
                            id,
                            score: ((1.0 - item.distance + 1.0) / 2.0).clamp(0.0, 1.0),
                            payload: point.payload.clone(),
                        })
                    })
                    .collect();
                sort_scored(&mut results);
                return Ok(results);
            }
        }

        let inner = collection.inner.read();
        let mut results: Vec<ScoredPoint> = inner
            .points
            .values()
            .filter(|point| filter.matches(&point.payload))
            .map(|point| ScoredPoint {
                id: point.id.clone(),
                score: cosine_similarity(vector, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();
        sort_scored(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<(Vec<Point>, Option<String>)> {
        let collection = self.collection(collection)?;
        let inner = collection.inner.read();

        let mut ids: Vec<&String> = inner
            .points
            .values()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| &p.id)
            .collect();
        ids.sort_unstable();

        let start = match &cursor {
            Some(last) => ids.partition_point(|id| *id <= last),
            None => 0,
        };
        let page: Vec<Point> = ids
            .iter()
            .skip(start)
            .take(limit)
            .filter_map(|id| inner.points.get(*id).cloned())
            .collect();

        let next = if start + page.len() < ids.len() {
            page.last().map(|p| p.id.clone())
        } else {
            None
        };
        Ok((page, next))
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let collection = self.collection(collection)?;
        let inner = collection.inner.read();
        Ok(inner
            .points
            .values()
            .filter(|p| filter.matches(&p.payload))
            .count())
    }

    fn update_payload(
        &self,
        collection: &str,
        id: &str,
        update: &dyn Fn(&mut Payload),
    ) -> Result<bool> {
        let collection = self.collection(collection)?;
        let mut inner = collection.inner.write();
        match inner.points.get_mut(id) {
            Some(point) => {
                update(&mut point.payload);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn dimension(&self, collection: &str) -> Result<usize> {
        Ok(self.collection(collection)?.dimension)
    }

    fn flush(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        for entry in self.collections.iter() {
            let inner = entry.value().inner.read();
            let persisted = PersistedCollection {
                dimension: entry.value().dimension,
                points: inner.points.values().cloned().collect(),
            };
            let bytes = bincode::serialize(&persisted)
                .map_err(|e| Error::storage_with("collection serialization failed", e))?;
            std::fs::write(dir.join(format!("{}.store.bin", entry.key())), bytes)?;
        }
        Ok(())
    }
}

fn sort_scored(results: &mut [ScoredPoint]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_ms;

    fn point(id: &str, vector: Vec<f32>, project: &str) -> Point {
        Point {
            id: id.to_string(),
            vector,
            payload: Payload {
                project: project.to_string(),
                content: format!("content of {id}"),
                lifecycle_state: "ACTIVE".to_string(),
                created_at: now_ms(),
                updated_at: now_ms(),
                last_accessed: now_ms(),
                ..Default::default()
            },
        }
    }

    fn store_with_points() -> LocalVectorStore {
        let store = LocalVectorStore::in_memory();
        store.ensure_collection("units", 3).unwrap();
        store
            .upsert(
                "units",
                vec![
                    point("a", vec![1.0, 0.0, 0.0], "p1"),
                    point("b", vec![0.0, 1.0, 0.0], "p1"),
                    point("c", vec![0.0, 0.0, 1.0], "p2"),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn search_orders_by_similarity() {
        let store = store_with_points();
        let results = store
            .search("units", &[1.0, 0.0, 0.0], &Filter::new(), 10)
            .unwrap();
        assert_eq!(results[0].id, "a");
        assert!((results[0].score - 1.0).abs() < 1e-5);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let store = store_with_points();
        let results = store
            .search("units", &[-1.0, 0.0, 0.0], &Filter::new(), 10)
            .unwrap();
        for result in results {
            assert!((0.0..=1.0).contains(&result.score));
        }
    }

    #[test]
    fn filter_restricts_project() {
        let store = store_with_points();
        let filter = Filter::new().eq("project", "p1");
        let results = store.search("units", &[1.0, 0.0, 0.0], &filter, 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.payload.project == "p1"));
    }

    #[test]
    fn in_filter_matches_any() {
        let store = store_with_points();
        let filter = Filter::new().any_of(
            "project",
            [FieldValue::from("p1"), FieldValue::from("p2")],
        );
        assert_eq!(store.count("units", &filter).unwrap(), 3);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let store = store_with_points();
        assert!(store.search("units", &[1.0, 0.0], &Filter::new(), 10).is_err());
        assert!(store
            .upsert("units", vec![point("bad", vec![1.0], "p1")])
            .is_err());
        assert!(store.ensure_collection("units", 5).is_err());
    }

    #[test]
    fn replace_is_atomic_delete_plus_upsert() {
        let store = store_with_points();
        store
            .replace(
                "units",
                &["a".to_string()],
                vec![point("d", vec![0.5, 0.5, 0.0], "p1")],
            )
            .unwrap();
        assert!(store.get("units", "a").unwrap().is_none());
        assert!(store.get("units", "d").unwrap().is_some());
        assert_eq!(store.count("units", &Filter::new()).unwrap(), 3);
    }

    #[test]
    fn scroll_pages_in_id_order() {
        let store = store_with_points();
        let (page1, cursor) = store.scroll("units", &Filter::new(), None, 2).unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].id, "a");
        assert!(cursor.is_some());

        let (page2, cursor2) = store.scroll("units", &Filter::new(), cursor, 2).unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].id, "c");
        assert!(cursor2.is_none());
    }

    #[test]
    fn scroll_past_end_is_empty_page() {
        let store = store_with_points();
        let (page, cursor) = store
            .scroll("units", &Filter::new(), Some("zzz".to_string()), 10)
            .unwrap();
        assert!(page.is_empty());
        assert!(cursor.is_none());
    }

    #[test]
    fn zero_limit_returns_empty() {
        let store = store_with_points();
        let results = store.search("units", &[1.0, 0.0, 0.0], &Filter::new(), 0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let store = LocalVectorStore::open(dir.path()).unwrap();
            store.ensure_collection("units", 3).unwrap();
            store
                .upsert("units", vec![point("a", vec![1.0, 0.0, 0.0], "p1")])
                .unwrap();
            store.flush().unwrap();
        }
        let reopened = LocalVectorStore::open(dir.path()).unwrap();
        let loaded = reopened.get("units", "a").unwrap().unwrap();
        assert_eq!(loaded.payload.project, "p1");
        assert_eq!(reopened.dimension("units").unwrap(), 3);
    }

    #[test]
    fn ann_path_agrees_with_exact_on_top_hit() {
        let store = LocalVectorStore::in_memory();
        store.ensure_collection("units", 8).unwrap();
        let mut points = Vec::new();
        for i in 0..600 {
            let mut v = vec![0.0f32; 8];
            v[i % 8] = 1.0;
            v[(i + 3) % 8] = 0.5;
            crate::embedding::l2_normalize(&mut v);
            points.push(point(&format!("p{i:04}"), v, "p"));
        }
        // A distinctive target vector.
        let mut target = vec![0.9, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.43];
        crate::embedding::l2_normalize(&mut target);
        points.push(point("needle", target.clone(), "p"));
        store.upsert("units", points).unwrap();

        let results = store.search("units", &target, &Filter::new(), 5).unwrap();
        assert_eq!(results[0].id, "needle");
    }
}
