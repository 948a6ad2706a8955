//! MCP server shell.
//!
//! Binds the core operation set to Model Context Protocol tools over stdio.
//! The shell validates nothing itself beyond schema shape; the core server
//! owns input validation, and errors surface as `{kind, message, hint?}`.

use crate::config::Config;
use crate::error::Error;
use crate::indexer::IndexOptions;
use crate::search::{FusionStrategy, SearchMode, SearchRequest, SortBy};
use crate::server::{CoreServer, ListRequest, StoreMemoryRequest, UpdateMemoryRequest};
use anyhow::Result;
use rmcp::handler::server::{router::tool::ToolRouter, tool::Parameters};
use rmcp::model::{ErrorData as McpError, *};
use rmcp::transport::stdio;
use rmcp::{schemars, tool, tool_handler, tool_router, ServerHandler, ServiceExt};
use crate::{SERVER_NAME, SERVER_VERSION};
use serde::Deserialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

/// The MCP handler wrapping the core server.
#[derive(Clone)]
pub struct RagServer {
    core: Arc<CoreServer>,
    tool_router: ToolRouter<Self>,
}

impl RagServer {
    pub fn new(core: Arc<CoreServer>) -> Self {
        Self {
            core,
            tool_router: Self::tool_router(),
        }
    }
}

/// Render a core error as the `{kind, message, hint?}` envelope.
fn error_result(error: &Error) -> CallToolResult {
    let mut envelope = serde_json::json!({
        "kind": error.kind(),
        "message": error.to_string(),
    });
    if let Some(hint) = error.remediation() {
        envelope["hint"] = serde_json::json!(hint);
    }
    CallToolResult::error(vec![Content::text(envelope.to_string())])
}

fn json_result(value: impl serde::Serialize) -> Result<CallToolResult, McpError> {
    match serde_json::to_string_pretty(&value) {
        Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
        Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
            "serialization failed: {e}"
        ))])),
    }
}

// ============================================================================
// Tool Argument Types
// ============================================================================

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct MemoryRequest {
    #[schemars(description = "Operation: store, get, update, delete, bulk_delete, list, retrieve")]
    pub op: String,
    #[schemars(description = "Memory id (get, update, delete)")]
    pub id: Option<String>,
    #[schemars(description = "Ids for bulk_delete")]
    pub ids: Option<Vec<String>>,
    #[schemars(description = "Memory content (store, update)")]
    pub content: Option<String>,
    #[schemars(description = "Category: preference, fact, event, workflow, context, code")]
    pub category: Option<String>,
    #[schemars(description = "Context level: user, project, session")]
    pub context_level: Option<String>,
    #[schemars(description = "Scope: global, project")]
    pub scope: Option<String>,
    #[schemars(description = "Owning project")]
    pub project: Option<String>,
    #[schemars(description = "Tags")]
    pub tags: Option<Vec<String>>,
    #[schemars(description = "Importance in [0, 1]")]
    pub importance: Option<f32>,
    #[schemars(description = "Max results (list, retrieve)")]
    pub limit: Option<usize>,
    #[schemars(description = "Offset (list, retrieve)")]
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct QueryRequest {
    #[schemars(description = "Search query")]
    pub query: String,
    #[schemars(description = "Mode: semantic, keyword, hybrid (default hybrid)")]
    pub mode: Option<String>,
    #[schemars(description = "Fusion: weighted, rrf, cascade (default weighted)")]
    pub fusion: Option<String>,
    #[schemars(description = "Semantic weight alpha in [0, 1] (default 0.5)")]
    pub alpha: Option<f32>,
    #[schemars(description = "Max results, 1-100 (default 10)")]
    pub limit: Option<usize>,
    #[schemars(description = "Project filter")]
    pub project: Option<String>,
    #[schemars(description = "Language filter")]
    pub language: Option<String>,
    #[schemars(description = "File glob filter")]
    pub file_pattern: Option<String>,
    #[schemars(description = "Exclude globs")]
    pub exclude_patterns: Option<Vec<String>>,
    #[schemars(description = "Sort: relevance, complexity, size, recency, importance")]
    pub sort_by: Option<String>,
    #[schemars(description = "Search across opted-in projects instead of one project")]
    pub across_projects: Option<bool>,
    #[schemars(description = "Apply MMR diversification")]
    pub diversify: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SimilarRequest {
    #[schemars(description = "Content to match against")]
    pub content: String,
    #[schemars(description = "Project filter")]
    pub project: Option<String>,
    #[schemars(description = "Max results (default 10)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct IndexRequest {
    #[schemars(description = "Operation: build, reindex, watch_on, watch_off")]
    pub op: String,
    #[schemars(description = "Path to index (defaults to the workspace root)")]
    pub path: Option<String>,
    #[schemars(description = "Project name (defaults to the active project)")]
    pub project: Option<String>,
    #[schemars(description = "Exclude globs (gitignore syntax)")]
    pub exclude: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GraphRequest {
    #[schemars(description = "Operation: callers, callees, call_chain, dependencies, dependents")]
    pub op: String,
    #[schemars(description = "Function name (callers/callees) or chain start")]
    pub name: Option<String>,
    #[schemars(description = "Chain target (call_chain)")]
    pub to: Option<String>,
    #[schemars(description = "File path (dependencies/dependents)")]
    pub file: Option<String>,
    #[schemars(description = "Max traversal depth (default 3)")]
    pub max_depth: Option<usize>,
    #[schemars(description = "Max paths for call_chain (default 3)")]
    pub max_paths: Option<usize>,
    #[schemars(description = "Include transitive results (default true)")]
    pub include_indirect: Option<bool>,
    #[schemars(description = "Project (defaults to the active project)")]
    pub project: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ProjectRequest {
    #[schemars(description = "Operation: switch, active, opt_in, opt_out, list_opted_in")]
    pub op: String,
    #[schemars(description = "Project name (switch, opt_in, opt_out)")]
    pub project: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StatusRequest {
    #[schemars(description = "Operation: status, metrics, health")]
    #[serde(default = "default_status_op")]
    pub op: String,
}

fn default_status_op() -> String {
    "status".to_string()
}

// ============================================================================
// Tool Implementations
// ============================================================================

#[tool_router]
impl RagServer {
    #[tool(description = "Store and manage memories: store, get, update, delete, bulk_delete, list, retrieve")]
    async fn memory(
        &self,
        Parameters(req): Parameters<MemoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = match req.op.as_str() {
            "store" => {
                let Some(content) = req.content else {
                    return Ok(CallToolResult::error(vec![Content::text(
                        "content is required for store",
                    )]));
                };
                self.core
                    .store(StoreMemoryRequest {
                        content,
                        category: req.category.unwrap_or_else(|| "fact".to_string()),
                        context_level: req.context_level.unwrap_or_else(|| "user".to_string()),
                        scope: req.scope.unwrap_or_else(|| "global".to_string()),
                        project: req.project,
                        tags: req.tags.unwrap_or_default(),
                        importance: req.importance.unwrap_or(0.5),
                        metadata: Default::default(),
                    })
                    .await
                    .and_then(|id| Ok(serde_json::json!({ "id": id })))
            }
            "get" => match req.id {
                Some(id) => self
                    .core
                    .get(&id)
                    .await
                    .and_then(|m| Ok(serde_json::to_value(m)?)),
                None => return missing("id"),
            },
            "update" => match req.id {
                Some(id) => self
                    .core
                    .update(
                        &id,
                        UpdateMemoryRequest {
                            content: req.content,
                            category: req.category,
                            importance: req.importance,
                            tags: req.tags,
                            metadata: None,
                        },
                    )
                    .await
                    .and_then(|m| Ok(serde_json::to_value(m)?)),
                None => return missing("id"),
            },
            "delete" => match req.id {
                Some(id) => self
                    .core
                    .delete(&id)
                    .await
                    .map(|()| serde_json::json!({ "deleted": id })),
                None => return missing("id"),
            },
            "bulk_delete" => match req.ids {
                Some(ids) => self
                    .core
                    .bulk_delete(&ids)
                    .await
                    .map(|count| serde_json::json!({ "deleted": count })),
                None => return missing("ids"),
            },
            "list" | "retrieve" => {
                let request = ListRequest {
                    project: req.project,
                    category: req.category,
                    context_level: req.context_level,
                    tag: None,
                    limit: req.limit.unwrap_or(50),
                    offset: req.offset.unwrap_or(0),
                };
                let result = if req.op == "list" {
                    self.core.list(request).await
                } else {
                    self.core.retrieve(request).await
                };
                result.and_then(|m| Ok(serde_json::to_value(m)?))
            }
            other => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Unknown operation: {other}. Valid: store, get, update, delete, bulk_delete, list, retrieve"
                ))]));
            }
        };

        match outcome {
            Ok(value) => json_result(value),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Hybrid search over code units and memories. Modes: semantic, keyword, hybrid")]
    async fn search(
        &self,
        Parameters(req): Parameters<QueryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let request = match build_search_request(&req) {
            Ok(request) => request,
            Err(e) => return Ok(error_result(&e)),
        };
        let outcome = if req.across_projects.unwrap_or(false) {
            self.core.search_across_opted_in(request).await
        } else {
            self.core.search(request).await
        };
        match outcome {
            Ok(results) => json_result(results),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Find stored content similar to the given text")]
    async fn find_similar(
        &self,
        Parameters(req): Parameters<SimilarRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .core
            .find_similar(&req.content, req.project.as_deref(), req.limit.unwrap_or(10))
            .await
        {
            Ok(results) => json_result(results),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Index source trees: build, reindex, watch_on, watch_off")]
    async fn index(
        &self,
        Parameters(req): Parameters<IndexRequest>,
    ) -> Result<CallToolResult, McpError> {
        let path = req
            .path
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let outcome = match req.op.as_str() {
            "build" => {
                let options = IndexOptions {
                    recursive: true,
                    exclude_globs: req.exclude.unwrap_or_default(),
                    ..Default::default()
                };
                match req.project {
                    Some(project) => self.core.index_project(&project, &path, options).await,
                    None => self.core.index(&path, options).await,
                }
                .and_then(|report| Ok(serde_json::json!({
                    "files_indexed": report.files_indexed,
                    "files_skipped": report.files_skipped,
                    "files_removed": report.files_removed,
                    "units_added": report.units_added,
                    "units_updated": report.units_updated,
                    "units_removed": report.units_removed,
                    "errors": report.errors.len(),
                    "elapsed_ms": report.elapsed_ms,
                })))
            }
            "reindex" => {
                let project = req.project.unwrap_or_else(|| self.core.default_project());
                self.core
                    .reindex(&project, &path)
                    .await
                    .and_then(|report| Ok(serde_json::json!({
                        "units_added": report.units_added,
                        "elapsed_ms": report.elapsed_ms,
                    })))
            }
            "watch_on" => self
                .core
                .watch(&path, true)
                .await
                .map(|on| serde_json::json!({ "watching": on })),
            "watch_off" => self
                .core
                .watch(&path, false)
                .await
                .map(|on| serde_json::json!({ "watching": on })),
            other => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Unknown operation: {other}. Valid: build, reindex, watch_on, watch_off"
                ))]));
            }
        };

        match outcome {
            Ok(value) => json_result(value),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Call-graph queries: callers, callees, call_chain, dependencies, dependents")]
    async fn call_graph(
        &self,
        Parameters(req): Parameters<GraphRequest>,
    ) -> Result<CallToolResult, McpError> {
        let depth = req.max_depth.unwrap_or(3);
        let indirect = req.include_indirect.unwrap_or(true);
        let project = req.project.as_deref();

        let outcome = match req.op.as_str() {
            "callers" => match &req.name {
                Some(name) => self
                    .core
                    .callers(project, name, depth, indirect)
                    .and_then(|nodes| Ok(serde_json::to_value(nodes)?)),
                None => return missing("name"),
            },
            "callees" => match &req.name {
                Some(name) => self
                    .core
                    .callees(project, name, depth, indirect)
                    .and_then(|nodes| Ok(serde_json::to_value(nodes)?)),
                None => return missing("name"),
            },
            "call_chain" => match (&req.name, &req.to) {
                (Some(from), Some(to)) => self
                    .core
                    .call_chain(project, from, to, depth.max(1), req.max_paths.unwrap_or(3))
                    .and_then(|paths| Ok(serde_json::to_value(paths)?)),
                _ => return missing("name and to"),
            },
            "dependencies" => match &req.file {
                Some(file) => Ok(serde_json::json!(self.core.dependencies(project, file))),
                None => return missing("file"),
            },
            "dependents" => match &req.file {
                Some(file) => Ok(serde_json::json!(self.core.dependents(project, file))),
                None => return missing("file"),
            },
            other => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Unknown operation: {other}. Valid: callers, callees, call_chain, dependencies, dependents"
                ))]));
            }
        };

        match outcome {
            Ok(value) => json_result(value),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Project context: switch, active, opt_in, opt_out, list_opted_in")]
    async fn project(
        &self,
        Parameters(req): Parameters<ProjectRequest>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = match req.op.as_str() {
            "switch" => match &req.project {
                Some(project) => self
                    .core
                    .switch_project(project)
                    .map(|()| serde_json::json!({ "active": project })),
                None => return missing("project"),
            },
            "active" => Ok(serde_json::json!({ "active": self.core.active_project() })),
            "opt_in" => match &req.project {
                Some(project) => self
                    .core
                    .opt_in(project)
                    .map(|()| serde_json::json!({ "opted_in": project })),
                None => return missing("project"),
            },
            "opt_out" => match &req.project {
                Some(project) => {
                    Ok(serde_json::json!({ "removed": self.core.opt_out(project) }))
                }
                None => return missing("project"),
            },
            "list_opted_in" => Ok(serde_json::json!(self
                .core
                .list_opted_in()
                .into_iter()
                .map(|(project, opted_in_at)| serde_json::json!({
                    "project": project,
                    "opted_in_at": opted_in_at,
                }))
                .collect::<Vec<_>>())),
            other => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Unknown operation: {other}. Valid: switch, active, opt_in, opt_out, list_opted_in"
                ))]));
            }
        };

        match outcome {
            Ok(value) => json_result(value),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Engine status, metrics, and health score")]
    async fn status(
        &self,
        Parameters(req): Parameters<StatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        match req.op.as_str() {
            "status" => match self.core.status().await {
                Ok(report) => json_result(report),
                Err(e) => Ok(error_result(&e)),
            },
            "metrics" => match self.core.metrics().await {
                Ok(metrics) => json_result(metrics),
                Err(e) => Ok(error_result(&e)),
            },
            "health" => json_result(serde_json::json!({
                "health_score": self.core.health_score().await,
            })),
            other => Ok(CallToolResult::error(vec![Content::text(format!(
                "Unknown operation: {other}. Valid: status, metrics, health"
            ))])),
        }
    }
}

fn missing(field: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(format!(
        "{field} is required for this operation"
    ))]))
}

fn build_search_request(req: &QueryRequest) -> crate::error::Result<SearchRequest> {
    let mut request = SearchRequest::new(req.query.clone());
    if let Some(mode) = &req.mode {
        request.mode = SearchMode::parse(mode)?;
    }
    if let Some(fusion) = &req.fusion {
        request.fusion = FusionStrategy::parse(fusion)?;
    }
    if let Some(alpha) = req.alpha {
        request.alpha = alpha;
    }
    if let Some(limit) = req.limit {
        request.limit = limit;
    }
    request.project = req.project.clone();
    request.language = req.language.clone();
    request.file_pattern = req.file_pattern.clone();
    request.exclude_patterns = req.exclude_patterns.clone().unwrap_or_default();
    if let Some(sort_by) = &req.sort_by {
        request.sort_by = SortBy::parse(sort_by)?;
    }
    request.diversify = req.diversify.unwrap_or(false);
    Ok(request)
}

// ============================================================================
// MCP Server Handler Implementation
// ============================================================================

#[tool_handler]
impl ServerHandler for RagServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "{SERVER_NAME} v{SERVER_VERSION} - local semantic code intelligence: hybrid search, incremental indexing, call graphs, and memory storage."
            )),
        }
    }
}

// ============================================================================
// Server Entry Point
// ============================================================================

pub async fn run_server(workspace_root: PathBuf) -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rag_index=info".parse().unwrap()),
        )
        .init();

    tracing::info!("Starting {} v{}", SERVER_NAME, SERVER_VERSION);
    tracing::info!("Workspace root: {}", workspace_root.display());

    let config = Config::load(&workspace_root);
    let core = CoreServer::open(&workspace_root, config)?;

    // Periodic maintenance on the same loop: usage flush, lifecycle pass.
    {
        let core = Arc::clone(&core);
        let interval = core.config().lifecycle.flush_interval_secs.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval));
            loop {
                ticker.tick().await;
                if let Err(e) = core.run_maintenance().await {
                    tracing::warn!("maintenance pass failed: {e}");
                }
            }
        });
    }

    let server = RagServer::new(core);
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    tracing::info!("Server shutdown");
    Ok(())
}
