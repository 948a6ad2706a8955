//! rag-server - MCP server entry point.
//!
//! Exposes the semantic code-intelligence engine to AI agents over stdio.

use anyhow::Result;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    // Workspace root from the environment, falling back to the current dir.
    let workspace_root = std::env::var("RAG_WORKSPACE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    rag_index::mcp::run_server(workspace_root).await
}
