//! Shared test fixtures: a core server over a temp workspace with the
//! deterministic hash embedder.
#![allow(dead_code)]

use rag_index::config::Config;
use rag_index::embedding::HashEmbedder;
use rag_index::server::CoreServer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestWorkspace {
    pub core: Arc<CoreServer>,
    pub dir: TempDir,
}

impl TestWorkspace {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }
}

pub fn workspace() -> TestWorkspace {
    workspace_with(Config::default())
}

pub fn workspace_with(config: Config) -> TestWorkspace {
    let dir = TempDir::new().unwrap();
    let core = CoreServer::open_with_embedder(dir.path(), config, Arc::new(HashEmbedder::new(256)))
        .unwrap();
    TestWorkspace { core, dir }
}
