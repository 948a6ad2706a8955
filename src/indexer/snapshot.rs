//! Per-project file-snapshot table.
//!
//! Maps relative file paths to `(content_hash, mtime, size, last_indexed_at)`
//! and backs the no-op short-circuit on unchanged files. The table is
//! versioned by tool version; a mismatch discards it and forces a clean pass.

use crate::error::Result;
use crate::types::{sha256_hex, FileSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(flatten)]
    pub snapshot: FileSnapshot,
    pub last_indexed_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotTable {
    pub tool_version: String,
    pub project: String,
    pub files: HashMap<String, SnapshotEntry>,
}

impl SnapshotTable {
    pub fn new(project: &str) -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            project: project.to_string(),
            files: HashMap::new(),
        }
    }

    fn path_for(dir: &Path, project: &str) -> PathBuf {
        dir.join(format!("{project}.snapshots.json"))
    }

    /// Load the table; a missing file or stale tool version yields a fresh
    /// empty table.
    pub fn load(dir: &Path, project: &str) -> Self {
        let path = Self::path_for(dir, project);
        let Ok(bytes) = std::fs::read(&path) else {
            return Self::new(project);
        };
        match serde_json::from_slice::<Self>(&bytes) {
            Ok(table) if table.tool_version == env!("CARGO_PKG_VERSION") => table,
            Ok(_) => {
                tracing::info!(project, "snapshot table from older version, rebuilding");
                Self::new(project)
            }
            Err(e) => {
                tracing::warn!(project, "corrupt snapshot table, rebuilding: {e}");
                Self::new(project)
            }
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path_for(dir, &self.project);
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Snapshot view for change detection.
    pub fn snapshots(&self) -> HashMap<String, FileSnapshot> {
        self.files
            .iter()
            .map(|(path, entry)| (path.clone(), entry.snapshot.clone()))
            .collect()
    }

    pub fn record(&mut self, rel_path: &str, snapshot: FileSnapshot, indexed_at: i64) {
        self.files.insert(
            rel_path.to_string(),
            SnapshotEntry {
                snapshot,
                last_indexed_at: indexed_at,
            },
        );
    }

    pub fn remove(&mut self, rel_path: &str) -> bool {
        self.files.remove(rel_path).is_some()
    }

    pub fn matches(&self, rel_path: &str, content_hash: &str) -> bool {
        self.files
            .get(rel_path)
            .map(|entry| entry.snapshot.content_hash == content_hash)
            .unwrap_or(false)
    }
}

/// Snapshot a file's current bytes and metadata.
pub fn snapshot_of(path: &Path, bytes: &[u8]) -> FileSnapshot {
    let mtime_ms = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    FileSnapshot {
        content_hash: sha256_hex(bytes),
        mtime_ms,
        size: bytes.len() as u64,
    }
}
