//! File discovery.
//!
//! Walks a source tree honoring .gitignore rules plus configured exclude
//! globs (gitignore syntax), filtering to files the parser registry can
//! handle and skipping oversized files.

use crate::parsing::ParserRegistry;
use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};

/// Discovers indexable source files under a root.
pub struct FileDiscovery {
    exclude_patterns: Vec<String>,
    default_excludes: bool,
    max_file_size: u64,
    recursive: bool,
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            default_excludes: true,
            max_file_size: 1024 * 1024,
            recursive: true,
        }
    }
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add exclude patterns (gitignore syntax globs).
    pub fn with_excludes(mut self, patterns: &[String]) -> Self {
        self.exclude_patterns.extend(patterns.iter().cloned());
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn non_recursive(mut self) -> Self {
        self.recursive = false;
        self
    }

    pub fn without_default_excludes(mut self) -> Self {
        self.default_excludes = false;
        self
    }

    /// Discover parseable files under the root, sorted for determinism.
    pub fn discover(&self, root: &Path, registry: &ParserRegistry) -> Result<Vec<PathBuf>> {
        let default_excludes = if self.default_excludes {
            build_globset(default_exclude_patterns())?
        } else {
            GlobSetBuilder::new().build()?
        };
        let user_excludes = build_globset(self.exclude_patterns.iter().map(|s| s.as_str()))?;

        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false);
        if !self.recursive {
            builder.max_depth(Some(1));
        }

        let mut files = Vec::<PathBuf>::new();
        for entry in builder.build().filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }

            let rel = path.strip_prefix(root).unwrap_or(path);
            if default_excludes.is_match(rel) || user_excludes.is_match(rel) {
                continue;
            }
            if !registry.handles(path) {
                continue;
            }
            if !self.within_size(path) {
                continue;
            }
            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }

    fn within_size(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|m| m.len() <= self.max_file_size)
            .unwrap_or(false)
    }
}

fn default_exclude_patterns() -> Vec<&'static str> {
    vec![
        "**/.git/**",
        "**/.rag-index/**",
        "**/target/**",
        "**/node_modules/**",
        "**/dist/**",
        "**/build/**",
        "**/out/**",
        "**/coverage/**",
        "**/vendor/**",
        "**/.venv/**",
        "**/__pycache__/**",
        "**/.next/**",
        "**/*.min.js",
        "**/*.min.css",
        "**/*.map",
    ]
}

fn build_globset<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn discovers_only_parseable_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.py", "def f(): pass");
        touch(dir.path(), "b.rs", "fn f() {}");
        touch(dir.path(), "notes.txt", "nothing");
        touch(dir.path(), "node_modules/c.js", "ignored()");

        let registry = ParserRegistry::new();
        let files = FileDiscovery::new().discover(dir.path(), &registry).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.py", "b.rs"]);
    }

    #[test]
    fn custom_excludes_apply() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "keep.py", "def f(): pass");
        touch(dir.path(), "generated/skip.py", "def g(): pass");

        let registry = ParserRegistry::new();
        let files = FileDiscovery::new()
            .with_excludes(&["generated/**".to_string()])
            .discover(dir.path(), &registry)
            .unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.py"));
    }

    #[test]
    fn oversized_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "big.py", &"# x\n".repeat(100));
        touch(dir.path(), "small.py", "def f(): pass");

        let registry = ParserRegistry::new();
        let files = FileDiscovery::new()
            .with_max_file_size(64)
            .discover(dir.path(), &registry)
            .unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("small.py"));
    }
}
