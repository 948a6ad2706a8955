//! Call-graph store and traversal.
//!
//! Function nodes are keyed by `(project, qualified_name)`; edges come from
//! call-site records grouped by caller file, so a file re-index replaces its
//! sites atomically. Forward and reverse adjacency live in a petgraph
//! directed graph for O(deg) neighbor enumeration; traversals are BFS with a
//! visited set, ties broken by qualified name.

use crate::error::{Error, Result};
use crate::types::{CallSite, FunctionNode};
use dashmap::DashMap;
use parking_lot::RwLock;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Default)]
struct ProjectGraph {
    graph: StableDiGraph<String, ()>,
    node_index: HashMap<String, NodeIndex>,
    nodes: HashMap<String, FunctionNode>,
    /// Simple name -> qualified names defining it.
    name_index: HashMap<String, Vec<String>>,
    /// Caller file -> its call sites (the unit of atomic replacement).
    sites_by_file: HashMap<String, Vec<CallSite>>,
    /// File -> imported modules, for cross-file resolution.
    imports_by_file: HashMap<String, Vec<String>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedGraph {
    nodes: Vec<FunctionNode>,
    sites: Vec<CallSite>,
    imports: Vec<(String, Vec<String>)>,
}

/// Persistent store of function nodes and call sites, one graph per project.
pub struct CallGraphStore {
    projects: DashMap<String, Arc<RwLock<ProjectGraph>>>,
    dir: Option<PathBuf>,
}

impl CallGraphStore {
    pub fn in_memory() -> Self {
        Self {
            projects: DashMap::new(),
            dir: None,
        }
    }

    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let store = Self {
            projects: DashMap::new(),
            dir: Some(dir.to_path_buf()),
        };

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(project) = name.strip_suffix(".graph.bin") else {
                continue;
            };
            let bytes = std::fs::read(&path)?;
            let persisted: PersistedGraph = bincode::deserialize(&bytes)
                .map_err(|e| Error::storage_with(format!("corrupt call graph {name}"), e))?;

            let graph = store.project(project);
            let mut inner = graph.write();
            for node in persisted.nodes {
                Self::insert_node(&mut inner, node);
            }
            inner.imports_by_file = persisted.imports.into_iter().collect();
            let mut by_file: HashMap<String, Vec<CallSite>> = HashMap::new();
            for site in persisted.sites {
                by_file.entry(site.caller_file.clone()).or_default().push(site);
            }
            for (file, sites) in by_file {
                Self::apply_file_sites(&mut inner, &file, sites);
            }
        }
        Ok(store)
    }

    fn project(&self, project: &str) -> Arc<RwLock<ProjectGraph>> {
        self.projects
            .entry(project.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(ProjectGraph::default())))
            .clone()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Upsert a function node and re-resolve any pending sites naming it.
    pub fn store_function(&self, project: &str, node: FunctionNode) {
        let graph = self.project(project);
        let mut inner = graph.write();
        Self::insert_node(&mut inner, node.clone());

        // New definitions can resolve previously dangling call sites.
        let files: Vec<String> = inner
            .sites_by_file
            .iter()
            .filter(|(_, sites)| {
                sites
                    .iter()
                    .any(|s| s.callee_qualified_name.is_none() && s.callee_name == node.name)
            })
            .map(|(file, _)| file.clone())
            .collect();
        for file in files {
            // Re-apply through the normal path so the delete phase stays
            // balanced with previously materialized edges.
            let sites = inner.sites_by_file.get(&file).cloned().unwrap_or_default();
            Self::apply_file_sites(&mut inner, &file, sites);
        }
    }

    fn insert_node(inner: &mut ProjectGraph, node: FunctionNode) {
        let qualified = node.qualified_name.clone();
        if !inner.node_index.contains_key(&qualified) {
            let index = inner.graph.add_node(qualified.clone());
            inner.node_index.insert(qualified.clone(), index);
        }
        let names = inner.name_index.entry(node.name.clone()).or_default();
        if !names.contains(&qualified) {
            names.push(qualified.clone());
        }
        inner.nodes.insert(qualified, node);
    }

    /// Record call sites for one caller, merged into its file's site set.
    pub fn store_call_sites(&self, project: &str, caller_file: &str, sites: Vec<CallSite>) {
        let graph = self.project(project);
        let mut inner = graph.write();
        let mut merged = inner.sites_by_file.remove(caller_file).unwrap_or_default();
        merged.extend(sites);
        Self::apply_file_sites(&mut inner, caller_file, merged);
    }

    /// Atomically replace every call site whose caller file matches.
    pub fn replace_calls_for_file(&self, project: &str, caller_file: &str, sites: Vec<CallSite>) {
        let graph = self.project(project);
        let mut inner = graph.write();
        Self::apply_file_sites(&mut inner, caller_file, sites);
    }

    /// Drop a file's nodes and call sites (file deleted).
    pub fn remove_file(&self, project: &str, file: &str) {
        let graph = self.project(project);
        let mut inner = graph.write();
        Self::apply_file_sites(&mut inner, file, Vec::new());
        inner.sites_by_file.remove(file);
        inner.imports_by_file.remove(file);

        let doomed: Vec<String> = inner
            .nodes
            .values()
            .filter(|n| n.file_path == file)
            .map(|n| n.qualified_name.clone())
            .collect();
        for qualified in &doomed {
            if let Some(node) = inner.nodes.remove(qualified) {
                if let Some(names) = inner.name_index.get_mut(&node.name) {
                    names.retain(|q| q != qualified);
                }
            }
            if let Some(index) = inner.node_index.remove(qualified) {
                inner.graph.remove_node(index);
            }
        }

        // Sites that resolved to a removed definition fall back to
        // unresolved; they stay visible at depth 1.
        if !doomed.is_empty() {
            let doomed: HashSet<&String> = doomed.iter().collect();
            for sites in inner.sites_by_file.values_mut() {
                for site in sites.iter_mut() {
                    if let Some(callee) = &site.callee_qualified_name {
                        if doomed.contains(callee) {
                            site.callee_qualified_name = None;
                        }
                    }
                }
            }
        }
    }

    /// Record a file's imports for cross-file callee resolution.
    pub fn store_imports(&self, project: &str, file: &str, modules: Vec<String>) {
        let graph = self.project(project);
        graph.write().imports_by_file.insert(file.to_string(), modules);
    }

    fn apply_file_sites(inner: &mut ProjectGraph, caller_file: &str, mut sites: Vec<CallSite>) {
        // Delete phase: remove graph edges sourced from this file.
        let old_sites = inner.sites_by_file.remove(caller_file).unwrap_or_default();
        for site in &old_sites {
            let Some(callee) = &site.callee_qualified_name else {
                continue;
            };
            if let (Some(&from), Some(&to)) = (
                inner.node_index.get(&site.caller_qualified_name),
                inner.node_index.get(callee),
            ) {
                if let Some(edge) = inner.graph.find_edge(from, to) {
                    inner.graph.remove_edge(edge);
                }
            }
        }

        // Insert phase: resolve then materialize adjacency.
        for site in &mut sites {
            if site.callee_qualified_name.is_none() {
                site.callee_qualified_name = Self::resolve_callee(inner, site);
            }
            let Some(callee) = &site.callee_qualified_name else {
                continue;
            };
            if let (Some(&from), Some(&to)) = (
                inner.node_index.get(&site.caller_qualified_name),
                inner.node_index.get(callee),
            ) {
                // One edge per site; a file contributing the same edge twice
                // keeps the delete phase balanced.
                inner.graph.add_edge(from, to, ());
            }
        }

        if sites.is_empty() {
            inner.sites_by_file.remove(caller_file);
        } else {
            inner.sites_by_file.insert(caller_file.to_string(), sites);
        }
    }

    /// Resolution order: unique project-wide name, then same-file definition,
    /// then a definition whose file stem appears in the caller's imports.
    fn resolve_callee(inner: &ProjectGraph, site: &CallSite) -> Option<String> {
        let candidates = inner.name_index.get(&site.callee_name)?;
        let live: Vec<&String> = candidates
            .iter()
            .filter(|q| inner.nodes.contains_key(*q))
            .collect();
        match live.len() {
            0 => None,
            1 => Some(live[0].clone()),
            _ => {
                if let Some(same_file) = live
                    .iter()
                    .find(|q| inner.nodes[**q].file_path == site.caller_file)
                {
                    return Some((*same_file).clone());
                }
                let imports = inner.imports_by_file.get(&site.caller_file)?;
                live.iter()
                    .find(|q| {
                        let def_file = &inner.nodes[**q].file_path;
                        let stem = Path::new(def_file)
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or("");
                        imports.iter().any(|m| {
                            m == stem || m.ends_with(&format!(".{stem}")) || m.ends_with(&format!("/{stem}"))
                        })
                    })
                    .map(|q| (*q).clone())
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_function(&self, project: &str, qualified_name: &str) -> Option<FunctionNode> {
        let graph = self.project(project);
        let inner = graph.read();
        inner.nodes.get(qualified_name).cloned()
    }

    /// Qualified names matching a simple name.
    pub fn find_by_name(&self, project: &str, name: &str) -> Vec<String> {
        let graph = self.project(project);
        let inner = graph.read();
        inner.name_index.get(name).cloned().unwrap_or_default()
    }

    /// Functions that call `qualified_name`, in BFS order up to `max_depth`.
    pub fn callers(
        &self,
        project: &str,
        qualified_name: &str,
        max_depth: usize,
        include_indirect: bool,
    ) -> Vec<FunctionNode> {
        self.traverse(project, qualified_name, max_depth, include_indirect, Direction::Incoming)
    }

    /// Functions called by `qualified_name`, in BFS order up to `max_depth`.
    pub fn callees(
        &self,
        project: &str,
        qualified_name: &str,
        max_depth: usize,
        include_indirect: bool,
    ) -> Vec<FunctionNode> {
        self.traverse(project, qualified_name, max_depth, include_indirect, Direction::Outgoing)
    }

    fn traverse(
        &self,
        project: &str,
        qualified_name: &str,
        max_depth: usize,
        include_indirect: bool,
        direction: Direction,
    ) -> Vec<FunctionNode> {
        let graph = self.project(project);
        let inner = graph.read();
        let Some(&start) = inner.node_index.get(qualified_name) else {
            return Vec::new();
        };
        let depth_limit = if include_indirect { max_depth } else { max_depth.min(1) };

        let mut visited = HashSet::from([start]);
        let mut frontier = vec![start];
        let mut out = Vec::new();
        let mut depth = 0;

        while !frontier.is_empty() && depth < depth_limit {
            depth += 1;
            let mut next_level: Vec<String> = Vec::new();
            let mut next_frontier = Vec::new();

            for &index in &frontier {
                for neighbor in inner.graph.neighbors_directed(index, direction) {
                    if visited.insert(neighbor) {
                        next_level.push(inner.graph[neighbor].clone());
                        next_frontier.push(neighbor);
                    }
                }
            }

            next_level.sort_unstable();
            for qualified in next_level {
                if let Some(node) = inner.nodes.get(&qualified) {
                    out.push(node.clone());
                }
            }
            frontier = next_frontier;
        }

        // Unresolved callees stay visible at depth 1 as name-only stubs.
        if direction == Direction::Outgoing && depth_limit >= 1 {
            let mut unresolved: Vec<&CallSite> = inner
                .sites_by_file
                .values()
                .flatten()
                .filter(|s| {
                    s.caller_qualified_name == qualified_name
                        && s.callee_qualified_name.is_none()
                })
                .collect();
            unresolved.sort_by(|a, b| a.callee_name.cmp(&b.callee_name));
            let mut seen = HashSet::new();
            for site in unresolved {
                if seen.insert(site.callee_name.clone()) {
                    out.push(FunctionNode {
                        qualified_name: site.callee_name.clone(),
                        name: site.callee_name.clone(),
                        file_path: String::new(),
                        language: String::new(),
                        start_line: 0,
                        end_line: 0,
                        is_exported: false,
                        is_async: false,
                        parameters: Vec::new(),
                        return_type: None,
                    });
                }
            }
        }
        out
    }

    /// Up to `max_paths` shortest simple call chains from `from` to `to`.
    pub fn call_chain(
        &self,
        project: &str,
        from: &str,
        to: &str,
        max_depth: usize,
        max_paths: usize,
    ) -> Vec<Vec<String>> {
        let graph = self.project(project);
        let inner = graph.read();
        let (Some(&start), Some(&goal)) =
            (inner.node_index.get(from), inner.node_index.get(to))
        else {
            return Vec::new();
        };
        if max_paths == 0 {
            return Vec::new();
        }

        let mut paths = Vec::new();
        let mut queue: VecDeque<Vec<NodeIndex>> = VecDeque::from([vec![start]]);

        while let Some(path) = queue.pop_front() {
            let last = *path.last().expect("paths are never empty");
            if last == goal {
                paths.push(path.iter().map(|&i| inner.graph[i].clone()).collect());
                if paths.len() >= max_paths {
                    break;
                }
                continue;
            }
            if path.len() > max_depth {
                continue;
            }
            let mut neighbors: Vec<NodeIndex> =
                inner.graph.neighbors_directed(last, Direction::Outgoing).collect();
            neighbors.sort_by(|a, b| inner.graph[*a].cmp(&inner.graph[*b]));
            neighbors.dedup();
            for neighbor in neighbors {
                if path.contains(&neighbor) {
                    continue; // simple paths only
                }
                let mut extended = path.clone();
                extended.push(neighbor);
                queue.push_back(extended);
            }
        }
        paths
    }

    /// Modules a file imports.
    pub fn dependencies(&self, project: &str, file: &str) -> Vec<String> {
        let graph = self.project(project);
        let inner = graph.read();
        inner.imports_by_file.get(file).cloned().unwrap_or_default()
    }

    /// Files whose imports reference this file's stem.
    pub fn dependents(&self, project: &str, file: &str) -> Vec<String> {
        let stem = Path::new(file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file)
            .to_string();
        let graph = self.project(project);
        let inner = graph.read();
        let mut out: Vec<String> = inner
            .imports_by_file
            .iter()
            .filter(|(importer, modules)| {
                *importer != file
                    && modules.iter().any(|m| {
                        m == &stem
                            || m.ends_with(&format!(".{stem}"))
                            || m.ends_with(&format!("/{stem}"))
                    })
            })
            .map(|(importer, _)| importer.clone())
            .collect();
        out.sort_unstable();
        out
    }

    /// Drop every node, site, and import for a project (full reindex).
    pub fn reset_project(&self, project: &str) {
        self.projects.remove(project);
        if let Some(dir) = &self.dir {
            let _ = std::fs::remove_file(dir.join(format!("{project}.graph.bin")));
        }
    }

    /// (function count, edge count) for one project.
    pub fn stats(&self, project: &str) -> (usize, usize) {
        let graph = self.project(project);
        let inner = graph.read();
        (inner.nodes.len(), inner.graph.edge_count())
    }

    pub fn flush(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        for entry in self.projects.iter() {
            let inner = entry.value().read();
            let persisted = PersistedGraph {
                nodes: inner.nodes.values().cloned().collect(),
                sites: inner.sites_by_file.values().flatten().cloned().collect(),
                imports: inner
                    .imports_by_file
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            };
            let bytes = bincode::serialize(&persisted)
                .map_err(|e| Error::storage_with("call graph serialization failed", e))?;
            std::fs::write(dir.join(format!("{}.graph.bin", entry.key())), bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallType;

    fn node(qualified: &str, file: &str) -> FunctionNode {
        FunctionNode {
            qualified_name: qualified.to_string(),
            name: qualified.rsplit('.').next().unwrap().to_string(),
            file_path: file.to_string(),
            language: "python".to_string(),
            start_line: 1,
            end_line: 2,
            is_exported: true,
            is_async: false,
            parameters: Vec::new(),
            return_type: None,
        }
    }

    fn site(caller: &str, callee: &str, file: &str) -> CallSite {
        CallSite {
            caller_qualified_name: caller.to_string(),
            caller_file: file.to_string(),
            caller_line: 1,
            callee_name: callee.to_string(),
            callee_qualified_name: None,
            call_type: CallType::Direct,
        }
    }

    fn chain_store() -> CallGraphStore {
        let store = CallGraphStore::in_memory();
        store.store_function("p", node("a", "m.py"));
        store.store_function("p", node("b", "m.py"));
        store.store_function("p", node("c", "m.py"));
        store.replace_calls_for_file(
            "p",
            "m.py",
            vec![site("a", "b", "m.py"), site("b", "c", "m.py")],
        );
        store
    }

    #[test]
    fn callees_bfs_transitive() {
        let store = chain_store();
        let callees = store.callees("p", "a", 2, true);
        let names: Vec<_> = callees.iter().map(|n| n.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn callers_bfs_transitive() {
        let store = chain_store();
        let callers = store.callers("p", "c", 2, true);
        let names: Vec<_> = callers.iter().map(|n| n.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn direct_only_when_indirect_disabled() {
        let store = chain_store();
        let callees = store.callees("p", "a", 5, false);
        let names: Vec<_> = callees.iter().map(|n| n.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn call_chain_finds_shortest_path() {
        let store = chain_store();
        let chains = store.call_chain("p", "a", "c", 5, 1);
        assert_eq!(chains, vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]]);
    }

    #[test]
    fn call_chain_respects_max_depth() {
        let store = chain_store();
        assert!(store.call_chain("p", "a", "c", 1, 5).is_empty());
    }

    #[test]
    fn cycles_terminate() {
        let store = CallGraphStore::in_memory();
        store.store_function("p", node("x", "m.py"));
        store.store_function("p", node("y", "m.py"));
        store.replace_calls_for_file(
            "p",
            "m.py",
            vec![site("x", "y", "m.py"), site("y", "x", "m.py")],
        );
        let callees = store.callees("p", "x", 10, true);
        assert_eq!(callees.len(), 1);
        assert!(store.call_chain("p", "x", "x", 10, 3).len() <= 3);
    }

    #[test]
    fn replace_calls_is_atomic_per_file() {
        let store = chain_store();
        store.replace_calls_for_file("p", "m.py", vec![site("a", "c", "m.py")]);
        let callees = store.callees("p", "a", 1, false);
        let names: Vec<_> = callees.iter().map(|n| n.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["c"]);
        assert!(store.callees("p", "b", 1, false).is_empty());
    }

    #[test]
    fn unresolved_callee_visible_at_depth_one_only() {
        let store = CallGraphStore::in_memory();
        store.store_function("p", node("caller", "m.py"));
        store.replace_calls_for_file("p", "m.py", vec![site("caller", "mystery", "m.py")]);

        let direct = store.callees("p", "caller", 1, true);
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].name, "mystery");
        assert!(direct[0].file_path.is_empty());

        // Not traversed further.
        let deep = store.callees("p", "caller", 3, true);
        assert_eq!(deep.len(), 1);
    }

    #[test]
    fn late_definition_resolves_pending_sites() {
        let store = CallGraphStore::in_memory();
        store.store_function("p", node("caller", "a.py"));
        store.replace_calls_for_file("p", "a.py", vec![site("caller", "helper", "a.py")]);
        assert!(store.callees("p", "caller", 1, true)[0].file_path.is_empty());

        store.store_function("p", node("helper", "b.py"));
        let callees = store.callees("p", "caller", 1, true);
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].file_path, "b.py");
    }

    #[test]
    fn ambiguous_callee_resolves_through_imports() {
        let store = CallGraphStore::in_memory();
        store.store_function("p", node("caller", "main.py"));
        store.store_function("p", node("utils.helper", "utils.py"));
        store.store_function("p", node("other.helper", "other.py"));
        store.store_imports("p", "main.py", vec!["utils".to_string()]);
        store.replace_calls_for_file("p", "main.py", vec![site("caller", "helper", "main.py")]);

        let callees = store.callees("p", "caller", 1, true);
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].qualified_name, "utils.helper");
    }

    #[test]
    fn remove_file_drops_nodes_and_edges() {
        let store = chain_store();
        store.remove_file("p", "m.py");
        assert!(store.get_function("p", "a").is_none());
        assert_eq!(store.stats("p"), (0, 0));
    }

    #[test]
    fn dependencies_and_dependents() {
        let store = CallGraphStore::in_memory();
        store.store_imports("p", "main.py", vec!["utils".to_string(), "os".to_string()]);
        store.store_imports("p", "utils.py", vec!["os".to_string()]);

        assert_eq!(store.dependencies("p", "main.py"), vec!["utils", "os"]);
        assert_eq!(store.dependents("p", "utils.py"), vec!["main.py"]);
        assert!(store.dependents("p", "main.py").is_empty());
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let store = CallGraphStore::open(dir.path()).unwrap();
            store.store_function("p", node("a", "m.py"));
            store.store_function("p", node("b", "m.py"));
            store.replace_calls_for_file("p", "m.py", vec![site("a", "b", "m.py")]);
            store.flush().unwrap();
        }
        let reopened = CallGraphStore::open(dir.path()).unwrap();
        let callees = reopened.callees("p", "a", 1, true);
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].qualified_name, "b");
    }
}
