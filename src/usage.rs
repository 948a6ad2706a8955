//! Usage tracking and lifecycle transitions.
//!
//! Accesses are buffered in memory and flushed as one batched payload update
//! per unit, either on a timer or when the buffer crosses its threshold.
//! Lifecycle transitions age units ACTIVE → RECENT → ARCHIVED → STALE on
//! inactivity, with per-category aging rates and a hard purge for stale
//! session state.

use crate::config::LifecycleConfig;
use crate::error::Result;
use crate::store::{Filter, VectorStore};
use crate::types::{now_ms, ContextLevel, LifecycleState, MemoryCategory, UsageRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Buffered access recorder.
pub struct UsageTracker {
    buffer: Mutex<Vec<UsageRecord>>,
    flush_threshold: usize,
    recorded: AtomicU64,
    flushes: AtomicU64,
}

impl UsageTracker {
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            flush_threshold: flush_threshold.max(1),
            recorded: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    /// Append accesses; returns true when the buffer is due for a flush.
    pub fn record_access(&self, unit_ids: &[String], query_fingerprint: &str) -> bool {
        if unit_ids.is_empty() {
            return false;
        }
        let accessed_at = now_ms();
        let mut buffer = self.buffer.lock();
        for unit_id in unit_ids {
            buffer.push(UsageRecord {
                unit_id: unit_id.clone(),
                accessed_at,
                query_fingerprint: query_fingerprint.to_string(),
            });
        }
        self.recorded
            .fetch_add(unit_ids.len() as u64, Ordering::Relaxed);
        buffer.len() >= self.flush_threshold
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn recorded_total(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Drain the buffer and apply one batched update per distinct unit.
    /// Unknown ids are dropped silently (the unit may have been deleted).
    pub fn flush(&self, store: &dyn VectorStore, collection: &str) -> Result<usize> {
        let drained: Vec<UsageRecord> = std::mem::take(&mut *self.buffer.lock());
        if drained.is_empty() {
            return Ok(0);
        }

        // Aggregate: per unit, the access count delta and latest timestamp.
        let mut per_unit: HashMap<String, (u64, i64)> = HashMap::new();
        for record in drained {
            let entry = per_unit.entry(record.unit_id).or_insert((0, 0));
            entry.0 += 1;
            entry.1 = entry.1.max(record.accessed_at);
        }

        let mut updated = 0;
        for (unit_id, (count, accessed_at)) in per_unit {
            let applied = store.update_payload(collection, &unit_id, &|payload| {
                payload.access_count += count;
                payload.last_accessed = payload.last_accessed.max(accessed_at);
                // A fresh access reactivates the unit.
                payload.lifecycle_state = LifecycleState::Active.as_str().to_string();
            })?;
            if applied {
                updated += 1;
            }
        }
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(updated)
    }
}

/// Outcome of one lifecycle pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionReport {
    pub transitioned: usize,
    pub purged: usize,
}

/// Aging policy over lifecycle states.
pub struct LifecyclePolicy {
    config: LifecycleConfig,
}

impl LifecyclePolicy {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    /// Aging rate multiplier: preferences age at half rate, session state at
    /// double rate.
    fn rate(category: Option<MemoryCategory>, context_level: Option<ContextLevel>) -> f64 {
        if context_level == Some(ContextLevel::Session) {
            2.0
        } else if category == Some(MemoryCategory::Preference) {
            0.5
        } else {
            1.0
        }
    }

    /// State a unit should hold after `idle_ms` without access.
    pub fn state_for_idle(
        &self,
        idle_ms: i64,
        category: Option<MemoryCategory>,
        context_level: Option<ContextLevel>,
    ) -> LifecycleState {
        let effective_days = (idle_ms as f64 * Self::rate(category, context_level))
            / MS_PER_DAY as f64;
        if effective_days >= self.config.archived_days as f64 {
            LifecycleState::Stale
        } else if effective_days >= self.config.recent_days as f64 {
            LifecycleState::Archived
        } else if effective_days >= self.config.active_days as f64 {
            LifecycleState::Recent
        } else {
            LifecycleState::Active
        }
    }

    /// Whether a session-scoped unit has outlived its TTL and must be purged.
    pub fn session_expired(&self, idle_ms: i64, context_level: Option<ContextLevel>) -> bool {
        context_level == Some(ContextLevel::Session)
            && idle_ms > self.config.session_ttl_hours * 60 * 60 * 1000
    }

    /// Scroll the collection, apply transitions and the session purge.
    pub fn run_transitions(
        &self,
        store: &dyn VectorStore,
        collection: &str,
        now: i64,
    ) -> Result<TransitionReport> {
        let mut report = TransitionReport::default();
        let mut cursor = None;
        let mut to_purge = Vec::new();
        let mut to_update: Vec<(String, LifecycleState)> = Vec::new();

        loop {
            let (page, next) = store.scroll(collection, &Filter::new(), cursor, 512)?;
            for point in &page {
                let payload = &point.payload;
                let idle_ms = (now - payload.last_accessed).max(0);
                let category = payload
                    .category
                    .as_deref()
                    .and_then(|c| MemoryCategory::parse(c).ok());
                let context_level = payload
                    .context_level
                    .as_deref()
                    .and_then(|c| ContextLevel::parse(c).ok());

                if self.session_expired(idle_ms, context_level) {
                    to_purge.push(point.id.clone());
                    continue;
                }

                let target = self.state_for_idle(idle_ms, category, context_level);
                if payload.lifecycle_state != target.as_str() {
                    to_update.push((point.id.clone(), target));
                }
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        for (id, state) in to_update {
            if store.update_payload(collection, &id, &|payload| {
                payload.lifecycle_state = state.as_str().to_string();
            })? {
                report.transitioned += 1;
            }
        }
        if !to_purge.is_empty() {
            report.purged = store.delete(collection, &to_purge)?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LocalVectorStore, Payload, Point};

    fn store_with(points: Vec<Point>) -> LocalVectorStore {
        let store = LocalVectorStore::in_memory();
        store.ensure_collection("units", 2).unwrap();
        store.upsert("units", points).unwrap();
        store
    }

    fn point(id: &str, last_accessed: i64, category: Option<&str>, level: Option<&str>) -> Point {
        Point {
            id: id.to_string(),
            vector: vec![1.0, 0.0],
            payload: Payload {
                project: "p".into(),
                content: "x".into(),
                lifecycle_state: "ACTIVE".into(),
                category: category.map(String::from),
                context_level: level.map(String::from),
                last_accessed,
                ..Default::default()
            },
        }
    }

    #[test]
    fn buffer_reports_threshold() {
        let tracker = UsageTracker::new(3);
        assert!(!tracker.record_access(&["a".into()], "q"));
        assert!(!tracker.record_access(&["b".into()], "q"));
        assert!(tracker.record_access(&["c".into()], "q"));
        assert_eq!(tracker.pending(), 3);
    }

    #[test]
    fn flush_batches_per_unit() {
        let store = store_with(vec![point("u1", 0, None, None)]);
        let tracker = UsageTracker::new(100);
        tracker.record_access(&["u1".into(), "u1".into(), "u1".into()], "q");
        tracker.record_access(&["missing".into()], "q");

        let updated = tracker.flush(&store, "units").unwrap();
        assert_eq!(updated, 1);
        assert_eq!(tracker.pending(), 0);

        let loaded = store.get("units", "u1").unwrap().unwrap();
        assert_eq!(loaded.payload.access_count, 3);
        assert!(loaded.payload.last_accessed > 0);
    }

    #[test]
    fn aging_thresholds() {
        let policy = LifecyclePolicy::new(LifecycleConfig::default());
        let day = MS_PER_DAY;
        assert_eq!(policy.state_for_idle(6 * day, None, None), LifecycleState::Active);
        assert_eq!(policy.state_for_idle(8 * day, None, None), LifecycleState::Recent);
        assert_eq!(policy.state_for_idle(31 * day, None, None), LifecycleState::Archived);
        assert_eq!(policy.state_for_idle(181 * day, None, None), LifecycleState::Stale);
    }

    #[test]
    fn preferences_age_at_half_rate() {
        let policy = LifecyclePolicy::new(LifecycleConfig::default());
        let idle = 8 * MS_PER_DAY;
        assert_eq!(
            policy.state_for_idle(idle, Some(MemoryCategory::Preference), None),
            LifecycleState::Active
        );
        assert_eq!(policy.state_for_idle(idle, None, None), LifecycleState::Recent);
    }

    #[test]
    fn session_state_ages_at_double_rate() {
        let policy = LifecyclePolicy::new(LifecycleConfig::default());
        let idle = 4 * MS_PER_DAY;
        assert_eq!(
            policy.state_for_idle(idle, None, Some(ContextLevel::Session)),
            LifecycleState::Recent
        );
        assert_eq!(policy.state_for_idle(idle, None, None), LifecycleState::Active);
    }

    #[test]
    fn transitions_and_session_purge() {
        let now = now_ms();
        let store = store_with(vec![
            point("fresh", now, None, None),
            point("old", now - 10 * MS_PER_DAY, None, None),
            point("dead_session", now - 3 * MS_PER_DAY, None, Some("session")),
        ]);

        let policy = LifecyclePolicy::new(LifecycleConfig::default());
        let report = policy.run_transitions(&store, "units", now).unwrap();

        assert_eq!(report.purged, 1);
        assert!(store.get("units", "dead_session").unwrap().is_none());

        let old = store.get("units", "old").unwrap().unwrap();
        assert_eq!(old.payload.lifecycle_state, "RECENT");
        let fresh = store.get("units", "fresh").unwrap().unwrap();
        assert_eq!(fresh.payload.lifecycle_state, "ACTIVE");
        assert_eq!(report.transitioned, 1);
    }
}
