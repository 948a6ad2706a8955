//! Core data model.
//!
//! Every persisted entity lives in exactly one project namespace and is keyed
//! by a UUID-v4 string. Timestamps are UTC epoch milliseconds.

use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hard ceiling on stored unit/memory content.
pub const MAX_CONTENT_BYTES: usize = 50_000;

/// Current UTC time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// New UUID-v4 string id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Enums
// ============================================================================

/// Kind of a parsed code element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Trait,
    Module,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Interface => "interface",
            Self::Trait => "trait",
            Self::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "function" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            "class" => Ok(Self::Class),
            "struct" => Ok(Self::Struct),
            "interface" => Ok(Self::Interface),
            "trait" => Ok(Self::Trait),
            "module" => Ok(Self::Module),
            other => Err(Error::validation(format!("unknown unit_type: {other}"))),
        }
    }
}

/// Category of a stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Preference,
    Fact,
    Event,
    Workflow,
    Context,
    Code,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Fact => "fact",
            Self::Event => "event",
            Self::Workflow => "workflow",
            Self::Context => "context",
            Self::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "preference" => Ok(Self::Preference),
            "fact" => Ok(Self::Fact),
            "event" => Ok(Self::Event),
            "workflow" => Ok(Self::Workflow),
            "context" => Ok(Self::Context),
            "code" => Ok(Self::Code),
            other => Err(Error::validation(format!("unknown category: {other}"))),
        }
    }
}

/// Where a memory applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextLevel {
    User,
    Project,
    Session,
}

impl ContextLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::Session => "session",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "project" => Ok(Self::Project),
            "session" => Ok(Self::Session),
            other => Err(Error::validation(format!("unknown context_level: {other}"))),
        }
    }
}

/// Visibility scope of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Project,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            other => Err(Error::validation(format!("unknown scope: {other}"))),
        }
    }
}

/// Retention/retrieval weight state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    #[default]
    Active,
    Recent,
    Archived,
    Stale,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Recent => "RECENT",
            Self::Archived => "ARCHIVED",
            Self::Stale => "STALE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "RECENT" => Ok(Self::Recent),
            "ARCHIVED" => Ok(Self::Archived),
            "STALE" => Ok(Self::Stale),
            other => Err(Error::validation(format!(
                "unknown lifecycle_state: {other}"
            ))),
        }
    }
}

/// Kind of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Direct,
    Method,
    Constructor,
    Async,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Method => "method",
            Self::Constructor => "constructor",
            Self::Async => "async",
        }
    }
}

/// Qualitative bucket for a final search score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    Excellent,
    Good,
    Weak,
}

impl ConfidenceLabel {
    /// Threshold comparison carries a small epsilon so a score that lands
    /// exactly on a boundary modulo float rounding classifies upward.
    pub fn from_score(score: f32) -> Self {
        const EPS: f32 = 1e-5;
        if score + EPS >= 0.80 {
            Self::Excellent
        } else if score + EPS >= 0.60 {
            Self::Good
        } else {
            Self::Weak
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Weak => "weak",
        }
    }
}

// ============================================================================
// Code entities
// ============================================================================

/// A parsed code element: function, method, class, or similar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticUnit {
    pub id: String,
    pub project: String,
    pub file_path: String,
    pub language: String,
    pub unit_type: UnitType,
    pub name: String,
    pub qualified_name: String,
    pub signature: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub content_hash: String,
    pub imports: Vec<String>,
    pub importance: f32,
    pub lifecycle_state: LifecycleState,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_accessed: i64,
}

impl SemanticUnit {
    /// Identity within a file: `(project, file_path, qualified_name, start_byte)`.
    pub fn unit_key(&self) -> (String, String, String, usize) {
        (
            self.project.clone(),
            self.file_path.clone(),
            self.qualified_name.clone(),
            self.start_byte,
        )
    }

    /// Recompute and verify the content hash invariant.
    pub fn hash_matches(&self) -> bool {
        sha256_hex(self.content.as_bytes()) == self.content_hash
    }
}

/// A user- or agent-supplied knowledge item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUnit {
    pub id: String,
    pub content: String,
    pub category: MemoryCategory,
    pub context_level: ContextLevel,
    pub scope: Scope,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub importance: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
    pub lifecycle_state: LifecycleState,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_accessed: i64,
}

impl MemoryUnit {
    /// Validate the declared constraints before a write.
    pub fn validate(&self) -> Result<()> {
        if self.content.is_empty() {
            return Err(Error::validation("content must not be empty"));
        }
        if self.content.len() > MAX_CONTENT_BYTES {
            return Err(Error::validation(format!(
                "content is {} bytes, limit is {MAX_CONTENT_BYTES}",
                self.content.len()
            )));
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(Error::validation(format!(
                "importance {} outside [0, 1]",
                self.importance
            )));
        }
        if self.scope == Scope::Project && self.project.is_none() {
            return Err(Error::validation("project-scoped memory requires a project"));
        }
        Ok(())
    }
}

// ============================================================================
// Call graph entities
// ============================================================================

/// A call-graph vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionNode {
    pub qualified_name: String,
    pub name: String,
    pub file_path: String,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub is_exported: bool,
    pub is_async: bool,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
}

/// A directed call edge, grouped by caller file for atomic replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSite {
    pub caller_qualified_name: String,
    pub caller_file: String,
    pub caller_line: usize,
    pub callee_name: String,
    /// None until resolved through the import graph.
    pub callee_qualified_name: Option<String>,
    pub call_type: CallType,
}

// ============================================================================
// Snapshots, usage, results
// ============================================================================

/// Change-detection input for a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub content_hash: String,
    pub mtime_ms: i64,
    pub size: u64,
}

/// One recorded access, buffered before the batched flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub unit_id: String,
    pub accessed_at: i64,
    pub query_fingerprint: String,
}

/// A ranked retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub unit_id: String,
    pub content: String,
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
    pub score_semantic: f32,
    pub score_lexical: f32,
    pub score_final: f32,
    pub matched_terms: Vec<String>,
    pub confidence_label: ConfidenceLabel,
}
