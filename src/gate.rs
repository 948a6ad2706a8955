//! Retrieval gate.
//!
//! A bounded heuristic deciding whether a query is worth embedding and
//! searching at all. Disabled by default; when enabled, low-utility queries
//! short-circuit before any embedding work starts, which is the whole point
//! of the gate.

use crate::config::GateConfig;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Queries containing these markers always retrieve.
const MARKER_PATTERN: &str =
    r"(?i)\b(search|find|where|look ?up|remember|recall|what|which|how|why|when|who|show)\b";

pub struct RetrievalGate {
    enabled: bool,
    threshold: f32,
    markers: Regex,
    gated: AtomicU64,
}

impl RetrievalGate {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            enabled: config.enabled,
            threshold: config.threshold,
            markers: Regex::new(MARKER_PATTERN).expect("marker pattern is valid"),
            gated: AtomicU64::new(0),
        }
    }

    /// Number of queries short-circuited so far.
    pub fn gated_count(&self) -> u64 {
        self.gated.load(Ordering::Relaxed)
    }

    /// Decide whether to run retrieval for this query.
    pub fn should_retrieve(&self, query: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let query = query.trim();
        if query.len() < 3 {
            self.gated.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.markers.is_match(query) {
            return true;
        }
        if content_word_ratio(query) < self.threshold {
            self.gated.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }
}

/// Fraction of words that carry content (length ≥ 3, not pure punctuation
/// or digits).
fn content_word_ratio(query: &str) -> f32 {
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let content = words
        .iter()
        .filter(|w| w.len() >= 3 && w.chars().any(|c| c.is_alphabetic()))
        .count();
    content as f32 / words.len() as f32
}
