//! Change detection between file-set snapshots and unit sets.
//!
//! File-level diffs classify paths as added/deleted/modified/renamed; unit
//! diffs decide which units need re-embedding. Unchanged content hashes skip
//! the embedding pipeline entirely.

use crate::types::{FileSnapshot, SemanticUnit};
use std::collections::{HashMap, HashSet};

/// Similarity at or above this classifies a delete+add pair as a rename.
pub const RENAME_THRESHOLD: f64 = 0.80;

/// Files up to this size use exact normalized edit similarity; larger files
/// fall back to Jaccard over byte shingles.
const EDIT_SIMILARITY_MAX_BYTES: usize = 64 * 1024;

const SHINGLE_BYTES: usize = 8;

/// Outcome of a file-level snapshot diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub modified: Vec<String>,
    /// (old_path, new_path) pairs.
    pub renamed: Vec<(String, String)>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.deleted.is_empty()
            && self.modified.is_empty()
            && self.renamed.is_empty()
    }
}

/// Compare two snapshots of the same tree.
///
/// Renames are detected by identical content hashes between a deleted and an
/// added path. Near-miss renames (edited during the move) are refined by
/// [`refine_renames`] when contents are available.
pub fn diff_files(
    old: &HashMap<String, FileSnapshot>,
    new: &HashMap<String, FileSnapshot>,
) -> FileChanges {
    let mut changes = FileChanges::default();

    for (path, snapshot) in new {
        match old.get(path) {
            None => changes.added.push(path.clone()),
            Some(prev) if prev.content_hash != snapshot.content_hash => {
                changes.modified.push(path.clone());
            }
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            changes.deleted.push(path.clone());
        }
    }

    // Exact renames: same content hash on a deleted and an added path.
    let mut deleted_by_hash: HashMap<&str, Vec<&String>> = HashMap::new();
    for path in &changes.deleted {
        if let Some(snapshot) = old.get(path) {
            deleted_by_hash
                .entry(snapshot.content_hash.as_str())
                .or_default()
                .push(path);
        }
    }

    let mut renamed_from = HashSet::new();
    let mut renamed_to = HashSet::new();
    for path in &changes.added {
        let Some(snapshot) = new.get(path) else { continue };
        if let Some(candidates) = deleted_by_hash.get_mut(snapshot.content_hash.as_str()) {
            if let Some(source) = candidates.pop() {
                changes.renamed.push((source.clone(), path.clone()));
                renamed_from.insert(source.clone());
                renamed_to.insert(path.clone());
            }
        }
    }
    changes.added.retain(|p| !renamed_to.contains(p));
    changes.deleted.retain(|p| !renamed_from.contains(p));

    changes.added.sort_unstable();
    changes.deleted.sort_unstable();
    changes.modified.sort_unstable();
    changes.renamed.sort_unstable();
    changes
}

/// Promote deleted+added pairs whose contents are similar enough to renames.
///
/// `old_content`/`new_content` supply file text; a pair is promoted when
/// similarity ≥ `RENAME_THRESHOLD`. Pairs already matched by hash are
/// untouched.
pub fn refine_renames(
    changes: &mut FileChanges,
    old_content: impl Fn(&str) -> Option<String>,
    new_content: impl Fn(&str) -> Option<String>,
) {
    if changes.deleted.is_empty() || changes.added.is_empty() {
        return;
    }

    let mut used_added = HashSet::new();
    let mut remaining_deleted = Vec::new();

    for deleted in std::mem::take(&mut changes.deleted) {
        let Some(old_text) = old_content(&deleted) else {
            remaining_deleted.push(deleted);
            continue;
        };

        let mut best: Option<(usize, f64)> = None;
        for (i, added) in changes.added.iter().enumerate() {
            if used_added.contains(&i) {
                continue;
            }
            let Some(new_text) = new_content(added) else { continue };
            let similarity = content_similarity(&old_text, &new_text);
            if similarity >= RENAME_THRESHOLD
                && best.map(|(_, s)| similarity > s).unwrap_or(true)
            {
                best = Some((i, similarity));
            }
        }

        match best {
            Some((i, _)) => {
                used_added.insert(i);
                changes.renamed.push((deleted, changes.added[i].clone()));
            }
            None => remaining_deleted.push(deleted),
        }
    }

    changes.added = changes
        .added
        .iter()
        .enumerate()
        .filter(|(i, _)| !used_added.contains(i))
        .map(|(_, p)| p.clone())
        .collect();
    changes.deleted = remaining_deleted;
    changes.renamed.sort_unstable();
}

/// Content similarity in [0, 1]. Small inputs use normalized Levenshtein,
/// large ones Jaccard over byte shingles; both honor the same threshold.
pub fn content_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.len() <= EDIT_SIMILARITY_MAX_BYTES && b.len() <= EDIT_SIMILARITY_MAX_BYTES {
        strsim::normalized_levenshtein(a, b)
    } else {
        jaccard_shingles(a.as_bytes(), b.as_bytes())
    }
}

fn jaccard_shingles(a: &[u8], b: &[u8]) -> f64 {
    let sa = shingle_set(a);
    let sb = shingle_set(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.len() + sb.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

fn shingle_set(bytes: &[u8]) -> HashSet<u64> {
    if bytes.len() < SHINGLE_BYTES {
        let mut set = HashSet::new();
        set.insert(fnv1a(bytes));
        return set;
    }
    bytes.windows(SHINGLE_BYTES).map(fnv1a).collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// ============================================================================
// Unit-level diffing
// ============================================================================

/// Outcome of a per-file unit diff.
///
/// `modified` entries carry the new unit with the old identity (id and
/// created_at) adopted, so storage sees an update rather than a replace.
#[derive(Debug, Clone, Default)]
pub struct UnitChanges {
    pub added: Vec<SemanticUnit>,
    pub modified: Vec<SemanticUnit>,
    pub removed: Vec<SemanticUnit>,
    pub unchanged: Vec<SemanticUnit>,
}

impl UnitChanges {
    /// Fraction of old units that changed or disappeared.
    pub fn change_ratio(&self, total_old: usize) -> f64 {
        if total_old == 0 {
            return 0.0;
        }
        (self.modified.len() + self.removed.len()) as f64 / total_old as f64
    }
}

/// Above this change ratio the planner recommends a full-file reindex over
/// incremental unit patching.
pub const FULL_REINDEX_RATIO: f64 = 0.70;

/// Diff old stored units against freshly parsed ones, keyed by qualified
/// name (with an occurrence index for duplicates).
pub fn diff_units(old: &[SemanticUnit], new: &[SemanticUnit]) -> UnitChanges {
    let mut changes = UnitChanges::default();

    let mut old_by_key: HashMap<(String, usize), &SemanticUnit> = HashMap::new();
    let mut occurrence: HashMap<&str, usize> = HashMap::new();
    for unit in old {
        let n = occurrence.entry(unit.qualified_name.as_str()).or_default();
        old_by_key.insert((unit.qualified_name.clone(), *n), unit);
        *n += 1;
    }

    let mut seen = HashSet::new();
    let mut new_occurrence: HashMap<&str, usize> = HashMap::new();
    for unit in new {
        let n = new_occurrence
            .entry(unit.qualified_name.as_str())
            .or_default();
        let key = (unit.qualified_name.clone(), *n);
        *n += 1;

        match old_by_key.get(&key) {
            Some(prev) if prev.content_hash == unit.content_hash => {
                seen.insert(key);
                changes.unchanged.push((*prev).clone());
            }
            Some(prev) => {
                seen.insert(key);
                let mut updated = unit.clone();
                updated.id = prev.id.clone();
                updated.created_at = prev.created_at;
                changes.modified.push(updated);
            }
            None => changes.added.push(unit.clone()),
        }
    }

    for (key, unit) in &old_by_key {
        if !seen.contains(key) {
            changes.removed.push((*unit).clone());
        }
    }

    changes
}

/// Whether the diff is large enough that a full-file reindex beats patching.
pub fn recommend_full_reindex(changes: &UnitChanges, total_old: usize) -> bool {
    changes.change_ratio(total_old) > FULL_REINDEX_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{sha256_hex, LifecycleState, UnitType};

    fn snapshot(content: &str) -> FileSnapshot {
        FileSnapshot {
            content_hash: sha256_hex(content.as_bytes()),
            mtime_ms: 0,
            size: content.len() as u64,
        }
    }

    fn unit(qualified: &str, content: &str) -> SemanticUnit {
        SemanticUnit {
            id: crate::types::new_id(),
            project: "p".into(),
            file_path: "a.py".into(),
            language: "python".into(),
            unit_type: UnitType::Function,
            name: qualified.rsplit('.').next().unwrap().to_string(),
            qualified_name: qualified.into(),
            signature: format!("def {qualified}()"),
            content: content.into(),
            start_line: 1,
            end_line: 2,
            start_byte: 0,
            end_byte: content.len(),
            content_hash: sha256_hex(content.as_bytes()),
            imports: Vec::new(),
            importance: 0.5,
            lifecycle_state: LifecycleState::Active,
            created_at: 1,
            updated_at: 1,
            last_accessed: 1,
        }
    }

    #[test]
    fn added_deleted_modified() {
        let old = HashMap::from([
            ("a.py".to_string(), snapshot("one")),
            ("b.py".to_string(), snapshot("two")),
        ]);
        let new = HashMap::from([
            ("b.py".to_string(), snapshot("two changed")),
            ("c.py".to_string(), snapshot("three")),
        ]);

        let changes = diff_files(&old, &new);
        assert_eq!(changes.added, vec!["c.py"]);
        assert_eq!(changes.deleted, vec!["a.py"]);
        assert_eq!(changes.modified, vec!["b.py"]);
        assert!(changes.renamed.is_empty());
    }

    #[test]
    fn identical_content_is_a_rename() {
        let old = HashMap::from([("old.py".to_string(), snapshot("same body"))]);
        let new = HashMap::from([("new.py".to_string(), snapshot("same body"))]);

        let changes = diff_files(&old, &new);
        assert_eq!(changes.renamed, vec![("old.py".to_string(), "new.py".to_string())]);
        assert!(changes.added.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn near_identical_content_refines_to_rename() {
        let old_text = "def foo():\n    return 1\n".repeat(20);
        let new_text = format!("{old_text}# moved\n");

        let old = HashMap::from([("old.py".to_string(), snapshot(&old_text))]);
        let new = HashMap::from([("new.py".to_string(), snapshot(&new_text))]);

        let mut changes = diff_files(&old, &new);
        assert_eq!(changes.added, vec!["new.py"]);

        refine_renames(
            &mut changes,
            |_| Some(old_text.clone()),
            |_| Some(new_text.clone()),
        );
        assert_eq!(changes.renamed.len(), 1);
        assert!(changes.added.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn dissimilar_content_stays_delete_plus_add() {
        let mut changes = diff_files(
            &HashMap::from([("old.py".to_string(), snapshot("alpha beta gamma"))]),
            &HashMap::from([("new.py".to_string(), snapshot("entirely different text here"))]),
        );
        refine_renames(
            &mut changes,
            |_| Some("alpha beta gamma".to_string()),
            |_| Some("entirely different text here".to_string()),
        );
        assert!(changes.renamed.is_empty());
        assert_eq!(changes.added, vec!["new.py"]);
        assert_eq!(changes.deleted, vec!["old.py"]);
    }

    #[test]
    fn similarity_metric_bounds() {
        assert_eq!(content_similarity("same", "same"), 1.0);
        assert!(content_similarity("abcd", "wxyz") < 0.5);
        let big_a = "x".repeat(100_000);
        let big_b = big_a.clone();
        assert_eq!(content_similarity(&big_a, &big_b), 1.0);
    }

    #[test]
    fn unit_diff_classifies() {
        let old = vec![unit("keep", "body"), unit("edit", "v1"), unit("drop", "gone")];
        let new = vec![unit("keep", "body"), unit("edit", "v2"), unit("fresh", "new")];

        let changes = diff_units(&old, &new);
        assert_eq!(changes.unchanged.len(), 1);
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.removed.len(), 1);

        // Modified adopts the old identity.
        let old_edit = old.iter().find(|u| u.qualified_name == "edit").unwrap();
        assert_eq!(changes.modified[0].id, old_edit.id);
        assert_eq!(changes.modified[0].content, "v2");
    }

    #[test]
    fn unchanged_units_skip_reembedding() {
        let old = vec![unit("a", "same")];
        let new = vec![unit("a", "same")];
        let changes = diff_units(&old, &new);
        assert!(changes.added.is_empty());
        assert!(changes.modified.is_empty());
        // The stored unit (old id) is what survives.
        assert_eq!(changes.unchanged[0].id, old[0].id);
    }

    #[test]
    fn full_reindex_recommendation() {
        let old: Vec<_> = (0..10).map(|i| unit(&format!("f{i}"), "v1")).collect();
        let mostly_new: Vec<_> = (0..10).map(|i| unit(&format!("f{i}"), "v2")).collect();
        let changes = diff_units(&old, &mostly_new);
        assert!(recommend_full_reindex(&changes, old.len()));

        let one_change: Vec<_> = old
            .iter()
            .enumerate()
            .map(|(i, u)| if i == 0 { unit("f0", "v2") } else { u.clone() })
            .collect();
        let changes = diff_units(&old, &one_change);
        assert!(!recommend_full_reindex(&changes, old.len()));
    }
}
