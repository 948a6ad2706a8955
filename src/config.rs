//! Engine configuration.
//!
//! One nested config object, loadable from `<data_dir>/config.json` and
//! overridable per scalar field through `CLAUDE_RAG_*` environment variables
//! with dot-to-underscore mapping (`CLAUDE_RAG_SEARCH_ALPHA` overrides
//! `search.alpha`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory under a project root holding all persisted engine state.
pub const DATA_DIR: &str = ".rag-index";

const ENV_PREFIX: &str = "CLAUDE_RAG_";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub indexing: IndexingConfig,
    pub embeddings: EmbeddingsConfig,
    pub storage: StorageConfig,
    pub search: SearchConfig,
    pub lifecycle: LifecycleConfig,
    pub retrieval_gate: GateConfig,
    /// Write operations refuse with a read-only error when set.
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub enable_auto: bool,
    pub exclude_patterns: Vec<String>,
    pub max_file_bytes: u64,
    pub file_watcher: WatcherConfig,
    /// "auto" resolves to the CPU count.
    pub parallel_workers: ParallelWorkers,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            enable_auto: true,
            exclude_patterns: Vec::new(),
            max_file_bytes: 1024 * 1024,
            file_watcher: WatcherConfig::default(),
            parallel_workers: ParallelWorkers::Auto,
        }
    }
}

/// Worker count: "auto" resolves to the CPU count at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelWorkers {
    Auto,
    Count(usize),
}

impl ParallelWorkers {
    pub fn resolve(&self) -> usize {
        match self {
            Self::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            Self::Count(n) => (*n).max(1),
        }
    }
}

impl Serialize for ParallelWorkers {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::Count(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for ParallelWorkers {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(usize),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) if s == "auto" => Ok(Self::Auto),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "expected \"auto\" or a number, got {s:?}"
            ))),
            Raw::Number(n) => Ok(Self::Count(n)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub model_id: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub parallel: bool,
    pub cache_path: Option<PathBuf>,
    pub cache_max_bytes: u64,
    pub cache_ttl_ms: Option<i64>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            model_id: "all-minilm-l6-v2".to_string(),
            dimension: 384,
            batch_size: 32,
            parallel: false,
            cache_path: None,
            cache_max_bytes: 256 * 1024 * 1024,
            cache_ttl_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub pool: PoolConfig,
    pub health_check_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            health_check_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    pub acquire_timeout_ms: u64,
    pub op_timeout_ms: u64,
    /// A client is recycled after this many operations.
    pub recycle_after_ops: u64,
    /// A client is recycled after this age.
    pub recycle_after_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 5,
            acquire_timeout_ms: 5_000,
            op_timeout_ms: 10_000,
            recycle_after_ops: 10_000,
            recycle_after_ms: 30 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_mode: String,
    pub default_fusion: String,
    pub alpha: f32,
    pub bm25: Bm25Config,
    pub rerank_weights: RerankWeights,
    pub mmr_lambda: f32,
    pub overfetch_multiplier: usize,
    pub search_timeout_ms: u64,
    pub embed_timeout_ms: u64,
    pub ann_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_mode: "hybrid".to_string(),
            default_fusion: "weighted".to_string(),
            alpha: 0.5,
            bm25: Bm25Config::default(),
            rerank_weights: RerankWeights::default(),
            mmr_lambda: 0.7,
            overfetch_multiplier: 3,
            search_timeout_ms: 30_000,
            embed_timeout_ms: 60_000,
            ann_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
    /// BM25+ lower bound added to the term-frequency numerator.
    pub plus_delta: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            plus_delta: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankWeights {
    pub similarity: f32,
    pub recency: f32,
    pub usage: f32,
    pub keyword: f32,
    pub diversity: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            similarity: 0.60,
            recency: 0.20,
            usage: 0.20,
            keyword: 0.0,
            diversity: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub active_days: i64,
    pub recent_days: i64,
    pub archived_days: i64,
    pub session_ttl_hours: i64,
    pub flush_interval_secs: u64,
    pub flush_threshold: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            active_days: 7,
            recent_days: 30,
            archived_days: 180,
            session_ttl_hours: 48,
            flush_interval_secs: 30,
            flush_threshold: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub enabled: bool,
    pub threshold: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.4,
        }
    }
}

impl Config {
    /// Path of the persisted config under a project root.
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(DATA_DIR).join("config.json")
    }

    /// Load from `<root>/.rag-index/config.json` if present, then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load(root: &Path) -> Self {
        let mut config = match std::fs::read(Self::path_for(root)) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!("invalid config file, using defaults: {e}");
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `CLAUDE_RAG_*` scalar overrides. The lookup is injected so tests
    /// don't mutate process environment.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn set<T: std::str::FromStr>(
            slot: &mut T,
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) {
            let full = format!("{ENV_PREFIX}{key}");
            if let Some(raw) = lookup(&full) {
                match raw.parse::<T>() {
                    Ok(value) => *slot = value,
                    Err(_) => tracing::warn!("ignoring unparseable {full}={raw}"),
                }
            }
        }

        set(&mut self.indexing.enable_auto, &lookup, "INDEXING_ENABLE_AUTO");
        set(&mut self.indexing.max_file_bytes, &lookup, "INDEXING_MAX_FILE_BYTES");
        set(
            &mut self.indexing.file_watcher.enabled,
            &lookup,
            "INDEXING_FILE_WATCHER_ENABLED",
        );
        set(
            &mut self.indexing.file_watcher.debounce_ms,
            &lookup,
            "INDEXING_FILE_WATCHER_DEBOUNCE_MS",
        );
        if let Some(raw) = lookup(&format!("{ENV_PREFIX}INDEXING_PARALLEL_WORKERS")) {
            if raw == "auto" {
                self.indexing.parallel_workers = ParallelWorkers::Auto;
            } else {
                match raw.parse() {
                    Ok(n) => self.indexing.parallel_workers = ParallelWorkers::Count(n),
                    Err(_) => tracing::warn!("ignoring unparseable parallel_workers={raw}"),
                }
            }
        }

        set(&mut self.embeddings.model_id, &lookup, "EMBEDDINGS_MODEL_ID");
        set(&mut self.embeddings.dimension, &lookup, "EMBEDDINGS_DIMENSION");
        set(&mut self.embeddings.batch_size, &lookup, "EMBEDDINGS_BATCH_SIZE");
        set(&mut self.embeddings.parallel, &lookup, "EMBEDDINGS_PARALLEL");
        set(
            &mut self.embeddings.cache_max_bytes,
            &lookup,
            "EMBEDDINGS_CACHE_MAX_BYTES",
        );

        set(&mut self.storage.pool.min, &lookup, "STORAGE_POOL_MIN");
        set(&mut self.storage.pool.max, &lookup, "STORAGE_POOL_MAX");
        set(
            &mut self.storage.pool.acquire_timeout_ms,
            &lookup,
            "STORAGE_POOL_ACQUIRE_TIMEOUT_MS",
        );
        set(
            &mut self.storage.pool.op_timeout_ms,
            &lookup,
            "STORAGE_POOL_OP_TIMEOUT_MS",
        );
        set(
            &mut self.storage.health_check_interval_ms,
            &lookup,
            "STORAGE_HEALTH_CHECK_INTERVAL_MS",
        );

        set(&mut self.search.default_mode, &lookup, "SEARCH_DEFAULT_MODE");
        set(&mut self.search.default_fusion, &lookup, "SEARCH_DEFAULT_FUSION");
        set(&mut self.search.alpha, &lookup, "SEARCH_ALPHA");
        set(&mut self.search.bm25.k1, &lookup, "SEARCH_BM25_K1");
        set(&mut self.search.bm25.b, &lookup, "SEARCH_BM25_B");
        set(&mut self.search.bm25.plus_delta, &lookup, "SEARCH_BM25_PLUS_DELTA");
        set(&mut self.search.mmr_lambda, &lookup, "SEARCH_MMR_LAMBDA");

        set(&mut self.lifecycle.active_days, &lookup, "LIFECYCLE_ACTIVE_DAYS");
        set(&mut self.lifecycle.recent_days, &lookup, "LIFECYCLE_RECENT_DAYS");
        set(&mut self.lifecycle.archived_days, &lookup, "LIFECYCLE_ARCHIVED_DAYS");
        set(
            &mut self.lifecycle.session_ttl_hours,
            &lookup,
            "LIFECYCLE_SESSION_TTL_HOURS",
        );

        set(&mut self.retrieval_gate.enabled, &lookup, "RETRIEVAL_GATE_ENABLED");
        set(&mut self.retrieval_gate.threshold, &lookup, "RETRIEVAL_GATE_THRESHOLD");

        set(&mut self.read_only, &lookup, "READ_ONLY");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_declared_values() {
        let c = Config::default();
        assert_eq!(c.search.alpha, 0.5);
        assert_eq!(c.search.bm25.k1, 1.5);
        assert_eq!(c.search.bm25.b, 0.75);
        assert_eq!(c.storage.pool.max, 5);
        assert_eq!(c.indexing.file_watcher.debounce_ms, 1000);
        assert_eq!(c.lifecycle.active_days, 7);
        assert!(!c.read_only);
    }

    #[test]
    fn env_overrides_scalars() {
        let mut c = Config::default();
        c.apply_env_overrides(|key| match key {
            "CLAUDE_RAG_SEARCH_ALPHA" => Some("0.8".to_string()),
            "CLAUDE_RAG_STORAGE_POOL_MAX" => Some("9".to_string()),
            "CLAUDE_RAG_READ_ONLY" => Some("true".to_string()),
            _ => None,
        });
        assert_eq!(c.search.alpha, 0.8);
        assert_eq!(c.storage.pool.max, 9);
        assert!(c.read_only);
    }

    #[test]
    fn bad_env_value_is_ignored() {
        let mut c = Config::default();
        c.apply_env_overrides(|key| {
            (key == "CLAUDE_RAG_SEARCH_ALPHA").then(|| "not-a-float".to_string())
        });
        assert_eq!(c.search.alpha, 0.5);
    }

    #[test]
    fn config_json_roundtrip() {
        let c = Config::default();
        let json = serde_json::to_string(&c).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.search.alpha, c.search.alpha);
        assert_eq!(back.indexing.parallel_workers.resolve(), c.indexing.parallel_workers.resolve());
    }
}
