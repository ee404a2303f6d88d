//! MCP tool layer: shared context, tool trait, registry, and the built-in
//! tools.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 ToolRegistry                  │
//! │  scrape_urls   smart_crawl_url   search  ...  │
//! └──────────────────────┬────────────────────────┘
//!                        ▼
//!                  AppContext (single-flight)
//!        crawler · store · embedder · llm · graph
//! ```
//!
//! The [`AppContext`] owns every process-wide handle: it is built once at
//! server start, shared by all concurrent tool calls, and closed at server
//! stop. Tool handlers receive it by reference; no tool owns backend state.
//!
//! Every handler returns either a success JSON object or a [`ToolError`],
//! which the protocol bridge renders as the structured
//! `{success:false, error, error_kind}` contract. No error type crosses the
//! process boundary raw.

pub mod bridge;
pub mod serve;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::{Config, VectorBackend};
use crate::crawler::Crawler;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{ToolError, UrlFailure};
use crate::fetch::{HttpBrowser, PageBrowser};
use crate::ingest::{IngestOptions, IngestPipeline, IngestReport};
use crate::llm::LlmClient;
use crate::rerank::{HttpReranker, Reranker};
use crate::retrieval::{QueryTarget, RetrievalEngine};
use crate::store::memory::MemoryStore;
use crate::store::pgvector::PgVectorStore;
use crate::store::qdrant::QdrantStore;
use crate::store::VectorStore;
use crate::validate::graph::{GraphStore, MemoryGraphStore, Neo4jHttpStore};
use crate::validate::{report_to_value, ValidationEngine, ValidationMode};
use crate::websearch::{filter_result_urls, SearxClient};

/// Process-wide single-flight handles.
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub browser: Arc<dyn PageBrowser>,
    pub crawler: Arc<Crawler>,
    pub llm: Arc<LlmClient>,
    pub retrieval: Arc<RetrievalEngine>,
    pub searx: Option<Arc<SearxClient>>,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub validator: Option<Arc<ValidationEngine>>,
}

impl AppContext {
    /// Build and initialize every shared handle. Any failure here is a
    /// startup failure (exit code 1).
    pub async fn init(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let store: Arc<dyn VectorStore> = match config.vector_backend {
            VectorBackend::Memory => Arc::new(MemoryStore::new(config.embedding_dims)),
            VectorBackend::Qdrant => Arc::new(QdrantStore::new(
                config.qdrant_url.as_deref().unwrap_or_default(),
                config.qdrant_api_key.clone(),
                config.embedding_dims,
                config.request_timeout_secs,
            )?),
            VectorBackend::Pgvector => Arc::new(
                PgVectorStore::connect(
                    config.database_url.as_deref().unwrap_or_default(),
                    config.embedding_dims,
                )
                .await?,
            ),
        };
        store
            .initialize()
            .await
            .map_err(|e| anyhow::anyhow!("vector store initialization failed: {}", e))?;

        let embedder = create_embedder(&config)?;
        let browser: Arc<dyn PageBrowser> =
            Arc::new(HttpBrowser::new(config.request_timeout_secs)?);
        let crawler = Arc::new(Crawler::new(browser.clone(), config.max_concurrent));
        let llm = Arc::new(LlmClient::new(&config)?);

        let reranker: Option<Arc<dyn Reranker>> = if config.use_reranking {
            match config.reranker_url.as_deref() {
                Some(url) => Some(Arc::new(HttpReranker::new(
                    url,
                    config.request_timeout_secs,
                )?)),
                None => {
                    tracing::warn!("USE_RERANKING set but RERANKER_URL missing; reranking disabled");
                    None
                }
            }
        } else {
            None
        };

        let retrieval = Arc::new(RetrievalEngine::new(
            store.clone(),
            embedder.clone(),
            reranker.clone(),
            config.use_hybrid_search,
        ));

        let searx = match config.searxng_url.as_deref() {
            Some(url) => Some(Arc::new(SearxClient::new(url, config.request_timeout_secs)?)),
            None => None,
        };

        let (graph, validator) = if config.use_knowledge_graph {
            let graph: Arc<dyn GraphStore> = match config.neo4j_uri.as_deref() {
                Some(uri) => Arc::new(Neo4jHttpStore::new(
                    uri,
                    config.neo4j_user.as_deref().unwrap_or_default(),
                    config.neo4j_password.as_deref().unwrap_or_default(),
                    config.request_timeout_secs,
                )?),
                None => Arc::new(MemoryGraphStore::new()),
            };
            let validator = Arc::new(ValidationEngine::new(
                graph.clone(),
                store.clone(),
                embedder.clone(),
                reranker.clone(),
            ));
            (Some(graph), Some(validator))
        } else {
            (None, None)
        };

        Ok(Self {
            config,
            store,
            embedder,
            browser,
            crawler,
            llm,
            retrieval,
            searx,
            graph,
            validator,
        })
    }

    /// Release backend resources. Called once at server shutdown.
    pub async fn close(&self) {
        self.store.close().await;
    }

    /// The default pipeline, or one with a per-call concurrency override.
    fn pipeline(&self, max_concurrent: Option<usize>) -> IngestPipeline {
        let crawler = match max_concurrent {
            Some(mc) if mc != self.config.max_concurrent => {
                Arc::new(Crawler::new(self.browser.clone(), mc))
            }
            _ => self.crawler.clone(),
        };
        IngestPipeline::new(
            crawler,
            self.store.clone(),
            self.embedder.clone(),
            self.llm.clone(),
            self.config.clone(),
        )
    }

    fn graph_handle(&self) -> Result<&Arc<dyn GraphStore>, ToolError> {
        self.graph.as_ref().ok_or_else(|| {
            ToolError::invalid_argument("knowledge graph tools require USE_KNOWLEDGE_GRAPH=true")
        })
    }
}

/// One MCP tool: name, schema, handler.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments (`type: "object"`).
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value, ToolError>;
}

/// Ordered tool registry; order is the `tools/list` order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with every tool the configuration enables.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ScrapeUrlsTool));
        registry.register(Box::new(SmartCrawlUrlTool));
        registry.register(Box::new(GetAvailableSourcesTool));
        registry.register(Box::new(PerformRagQueryTool));
        registry.register(Box::new(SearchTool));
        if config.use_agentic_rag {
            registry.register(Box::new(SearchCodeExamplesTool));
        }
        if config.use_knowledge_graph {
            registry.register(Box::new(ParseGithubRepositoryTool));
            registry.register(Box::new(CheckAiScriptHallucinationsTool));
            registry.register(Box::new(QueryKnowledgeGraphTool));
        }
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Argument helpers ============

/// `url` accepts a single string or an array of strings.
fn url_list(params: &Value) -> Result<Vec<String>, ToolError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum UrlArg {
        One(String),
        Many(Vec<String>),
    }

    let raw = params
        .get("url")
        .ok_or_else(|| ToolError::invalid_argument("url is required"))?;

    let urls = match serde_json::from_value::<UrlArg>(raw.clone()) {
        Ok(UrlArg::One(url)) => vec![url],
        Ok(UrlArg::Many(urls)) => urls,
        Err(_) => {
            return Err(ToolError::invalid_argument("url must be string or string[]"));
        }
    };

    if urls.is_empty() {
        return Err(ToolError::invalid_argument("url list must not be empty"));
    }
    Ok(urls)
}

fn opt_usize(params: &Value, key: &str) -> Result<Option<usize>, ToolError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| ToolError::invalid_argument(format!("{} must be an integer", key))),
    }
}

fn opt_bool(params: &Value, key: &str) -> Result<bool, ToolError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ToolError::invalid_argument(format!(
            "{} must be a boolean",
            key
        ))),
    }
}

fn req_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::invalid_argument(format!("{} is required", key)))
}

fn opt_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
}

/// Split URLs into well-formed ones and upfront failures.
fn partition_urls(urls: Vec<String>) -> (Vec<String>, Vec<UrlFailure>) {
    let mut valid = Vec::new();
    let mut failures = Vec::new();
    for url in urls {
        match url::Url::parse(&url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => valid.push(url),
            _ => failures.push(UrlFailure {
                url,
                error: "malformed URL".to_string(),
            }),
        }
    }
    (valid, failures)
}

/// Render an ingest report as the tool response, honoring the
/// partial-failure contract.
fn report_value(report: &IngestReport) -> Value {
    let failures: Vec<UrlFailure> = report
        .results
        .iter()
        .filter(|r| !r.ok)
        .map(|r| UrlFailure {
            url: r.url.clone(),
            error: r.error.clone().unwrap_or_default(),
        })
        .collect();

    let mut value = json!({
        "success": failures.is_empty(),
        "results": report.results,
        "urls_processed": report.urls_processed,
        "chunks_written": report.chunks_written,
        "code_examples_written": report.code_examples_written,
        "elapsed_ms": report.elapsed_ms,
    });

    if !failures.is_empty() {
        value["error"] = json!(format!(
            "{} of {} URLs failed",
            failures.len(),
            report.urls_processed
        ));
        value["error_kind"] = json!("PartialFailure");
        value["failures"] = json!(failures);
    }
    if let Some(ref map) = report.markdown_by_url {
        value["markdown_by_url"] = json!(map);
    }
    value
}

// ============ Tools ============

/// Scrape one or more URLs and index their content.
pub struct ScrapeUrlsTool;

#[async_trait]
impl Tool for ScrapeUrlsTool {
    fn name(&self) -> &str {
        "scrape_urls"
    }

    fn description(&self) -> &str {
        "Scrape one or more URLs, chunk the content, and index it for retrieval"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "description": "A URL or an array of URLs to scrape",
                    "anyOf": [
                        { "type": "string" },
                        { "type": "array", "items": { "type": "string" } }
                    ]
                },
                "return_raw_markdown": { "type": "boolean", "default": false },
                "max_concurrent": { "type": "integer", "minimum": 1 },
                "batch_size": { "type": "integer", "minimum": 1 }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value, ToolError> {
        let urls = url_list(&params)?;
        let (valid, upfront_failures) = partition_urls(urls);
        if valid.is_empty() && !upfront_failures.is_empty() {
            return Err(ToolError::partial(
                "no well-formed URLs in the request",
                upfront_failures,
            ));
        }

        let opts = IngestOptions {
            return_raw_markdown: opt_bool(&params, "return_raw_markdown")?,
            extract_code_examples: ctx.config.use_agentic_rag,
            enable_contextual_embeddings: ctx.config.use_contextual_embeddings,
            upsert_batch: opt_usize(&params, "batch_size")?,
            ..Default::default()
        };

        let pipeline = ctx.pipeline(opt_usize(&params, "max_concurrent")?);
        let mut report = pipeline.ingest_urls(&valid, &opts).await;

        for failure in upfront_failures {
            report
                .results
                .push(crate::models::PageResult::failed(&failure.url, &failure.error));
            report.urls_processed += 1;
        }

        Ok(report_value(&report))
    }
}

/// Crawl a URL with strategy dispatch (text file, sitemap, recursive).
pub struct SmartCrawlUrlTool;

#[async_trait]
impl Tool for SmartCrawlUrlTool {
    fn name(&self) -> &str {
        "smart_crawl_url"
    }

    fn description(&self) -> &str {
        "Crawl a URL intelligently: text files as-is, sitemaps expanded, pages recursively"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "max_depth": { "type": "integer", "minimum": 0, "default": 3 },
                "max_concurrent": { "type": "integer", "minimum": 1, "default": 10 },
                "chunk_size": { "type": "integer", "minimum": 100 }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value, ToolError> {
        let url = req_str(&params, "url")?;
        if url::Url::parse(url).is_err() {
            return Err(ToolError::invalid_argument(format!("malformed URL: {}", url)));
        }

        let opts = IngestOptions {
            max_depth: opt_usize(&params, "max_depth")?.unwrap_or(ctx.config.max_depth),
            extract_code_examples: ctx.config.use_agentic_rag,
            enable_contextual_embeddings: ctx.config.use_contextual_embeddings,
            chunk_size: opt_usize(&params, "chunk_size")?,
            ..Default::default()
        };

        let pipeline = ctx.pipeline(opt_usize(&params, "max_concurrent")?);
        let report = pipeline.smart_ingest(url, &opts).await;
        Ok(report_value(&report))
    }
}

/// List the source registry.
pub struct GetAvailableSourcesTool;

#[async_trait]
impl Tool for GetAvailableSourcesTool {
    fn name(&self) -> &str {
        "get_available_sources"
    }

    fn description(&self) -> &str {
        "List every indexed source with its summary and word count"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &AppContext) -> Result<Value, ToolError> {
        let sources = ctx.store.get_sources().await?;
        Ok(json!({ "success": true, "sources": sources }))
    }
}

/// Grounded retrieval over the chunk collection.
pub struct PerformRagQueryTool;

#[async_trait]
impl Tool for PerformRagQueryTool {
    fn name(&self) -> &str {
        "perform_rag_query"
    }

    fn description(&self) -> &str {
        "Retrieve the most relevant indexed chunks for a query"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "source": { "type": "string", "description": "Restrict to one host" },
                "match_count": { "type": "integer", "minimum": 1, "default": 5 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value, ToolError> {
        let query = req_str(&params, "query")?;
        let k = opt_usize(&params, "match_count")?.unwrap_or(5);
        let source = opt_str(&params, "source");

        let hits = ctx
            .retrieval
            .rag_query(query, k, source, QueryTarget::Chunks)
            .await?;
        Ok(json!({ "success": true, "query": query, "results": hits }))
    }
}

/// Metasearch, ingest the hits, then answer from the ingested content.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web, ingest the result pages, and return grounded content"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "return_raw_markdown": { "type": "boolean", "default": false },
                "num_results": { "type": "integer", "minimum": 1, "default": 6 },
                "batch_size": { "type": "integer", "minimum": 1 },
                "max_concurrent": { "type": "integer", "minimum": 1 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value, ToolError> {
        let query = req_str(&params, "query")?;
        let num_results = opt_usize(&params, "num_results")?.unwrap_or(6);
        let return_raw_markdown = opt_bool(&params, "return_raw_markdown")?;

        let searx = ctx.searx.as_ref().ok_or_else(|| {
            ToolError::invalid_argument("the search tool requires SEARXNG_URL to be configured")
        })?;

        let results = searx.search(query, num_results).await?;
        let urls = filter_result_urls(&results, num_results);
        if urls.is_empty() {
            return Ok(json!({
                "success": true,
                "query": query,
                "results": {},
                "urls": [],
            }));
        }

        let opts = IngestOptions {
            return_raw_markdown,
            extract_code_examples: ctx.config.use_agentic_rag,
            enable_contextual_embeddings: ctx.config.use_contextual_embeddings,
            upsert_batch: opt_usize(&params, "batch_size")?,
            ..Default::default()
        };
        let pipeline = ctx.pipeline(opt_usize(&params, "max_concurrent")?);
        let report = pipeline.ingest_urls(&urls, &opts).await;

        if return_raw_markdown {
            return Ok(json!({
                "success": true,
                "query": query,
                "markdown_by_url": report.markdown_by_url,
            }));
        }

        // Answer from what was just ingested, grouped by URL.
        let mut grouped: serde_json::Map<String, Value> = serde_json::Map::new();
        for result in report.results.iter().filter(|r| r.ok) {
            let source = crate::models::source_id_of(&result.url);
            let hits = ctx
                .retrieval
                .rag_query(query, 5, source.as_deref(), QueryTarget::Chunks)
                .await?;
            let for_url: Vec<&crate::models::ChunkHit> =
                hits.iter().filter(|h| h.url == result.url).collect();
            grouped.insert(result.url.clone(), json!(for_url));
        }

        Ok(json!({
            "success": true,
            "query": query,
            "results": grouped,
            "failures": report.results.iter().filter(|r| !r.ok).collect::<Vec<_>>(),
        }))
    }
}

/// Grounded retrieval over the code-example collection.
pub struct SearchCodeExamplesTool;

#[async_trait]
impl Tool for SearchCodeExamplesTool {
    fn name(&self) -> &str {
        "search_code_examples"
    }

    fn description(&self) -> &str {
        "Retrieve the most relevant indexed code examples for a query"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "source": { "type": "string" },
                "match_count": { "type": "integer", "minimum": 1, "default": 5 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value, ToolError> {
        let query = req_str(&params, "query")?;
        let k = opt_usize(&params, "match_count")?.unwrap_or(5);
        let source = opt_str(&params, "source");

        let hits = ctx
            .retrieval
            .rag_query(query, k, source, QueryTarget::CodeExamples)
            .await?;
        Ok(json!({ "success": true, "query": query, "results": hits }))
    }
}

/// Clone and parse a repository into the knowledge graph.
pub struct ParseGithubRepositoryTool;

#[async_trait]
impl Tool for ParseGithubRepositoryTool {
    fn name(&self) -> &str {
        "parse_github_repository"
    }

    fn description(&self) -> &str {
        "Clone a repository and index its classes, methods, and functions into the knowledge graph"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_url": { "type": "string" }
            },
            "required": ["repo_url"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value, ToolError> {
        let repo_url = req_str(&params, "repo_url")?;
        let graph = ctx.graph_handle()?;

        let repo = crate::validate::graph::parse_repository(repo_url)
            .await
            .map_err(|e| ToolError::backend_rejected(format!("repository parse failed: {}", e)))?;

        graph
            .upsert_repository(&repo)
            .await
            .map_err(|e| ToolError::backend_unavailable(format!("graph upsert failed: {}", e)))?;

        Ok(json!({
            "success": true,
            "repository": repo.name,
            "files_parsed": repo.files.len(),
            "classes": repo.class_count(),
            "functions": repo.function_count(),
        }))
    }
}

/// Validate an AI-generated script against the knowledge graph.
pub struct CheckAiScriptHallucinationsTool;

#[async_trait]
impl Tool for CheckAiScriptHallucinationsTool {
    fn name(&self) -> &str {
        "check_ai_script_hallucinations"
    }

    fn description(&self) -> &str {
        "Cross-check a script's imports, calls, and attributes against parsed repositories"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "script_path": { "type": "string" },
                "mode": {
                    "type": "string",
                    "enum": ["fast", "balanced", "thorough"],
                    "default": "balanced"
                }
            },
            "required": ["script_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value, ToolError> {
        let script_path = req_str(&params, "script_path")?;
        let mode = match opt_str(&params, "mode") {
            Some(m) => ValidationMode::parse(m)?,
            None => ValidationMode::default(),
        };

        let validator = ctx.validator.as_ref().ok_or_else(|| {
            ToolError::invalid_argument(
                "hallucination checks require USE_KNOWLEDGE_GRAPH=true",
            )
        })?;

        let report = validator.validate_script(script_path, mode).await?;
        Ok(report_to_value(&report))
    }
}

/// Query the knowledge graph directly.
pub struct QueryKnowledgeGraphTool;

#[async_trait]
impl Tool for QueryKnowledgeGraphTool {
    fn name(&self) -> &str {
        "query_knowledge_graph"
    }

    fn description(&self) -> &str {
        "Run a graph command: 'repos', 'classes <repo>', or raw Cypher"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value, ToolError> {
        let command = req_str(&params, "command")?;
        let graph = ctx.graph_handle()?;

        let result = graph
            .raw_query(command)
            .await
            .map_err(|e| ToolError::backend_rejected(format!("graph query failed: {}", e)))?;
        Ok(json!({ "success": true, "result": result }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        let mut config = Config::from_env().unwrap();
        config.vector_backend = VectorBackend::Memory;
        config.use_agentic_rag = true;
        config.use_knowledge_graph = true;
        config
    }

    async fn test_ctx() -> AppContext {
        AppContext::init(base_config()).await.unwrap()
    }

    #[tokio::test]
    async fn test_registry_order_and_gating() {
        let registry = ToolRegistry::from_config(&base_config());
        let names: Vec<&str> = registry.tools().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "scrape_urls",
                "smart_crawl_url",
                "get_available_sources",
                "perform_rag_query",
                "search",
                "search_code_examples",
                "parse_github_repository",
                "check_ai_script_hallucinations",
                "query_knowledge_graph",
            ]
        );

        let mut minimal = base_config();
        minimal.use_agentic_rag = false;
        minimal.use_knowledge_graph = false;
        let registry = ToolRegistry::from_config(&minimal);
        assert!(registry.find("search_code_examples").is_none());
        assert!(registry.find("query_knowledge_graph").is_none());
        assert_eq!(registry.len(), 5);
    }

    #[tokio::test]
    async fn test_url_coercion_rejects_wrong_type() {
        let ctx = test_ctx().await;
        let err = ScrapeUrlsTool
            .execute(json!({ "url": 42 }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
        assert_eq!(err.message, "url must be string or string[]");
    }

    #[tokio::test]
    async fn test_url_coercion_accepts_both_forms() {
        assert_eq!(
            url_list(&json!({ "url": "https://a.test/x" })).unwrap(),
            vec!["https://a.test/x"]
        );
        assert_eq!(
            url_list(&json!({ "url": ["https://a.test/x", "https://a.test/y"] })).unwrap(),
            vec!["https://a.test/x", "https://a.test/y"]
        );
    }

    #[tokio::test]
    async fn test_empty_url_list_invalid() {
        let ctx = test_ctx().await;
        let err = ScrapeUrlsTool
            .execute(json!({ "url": [] }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
        // No side effects: the store stays empty.
        assert!(ctx.store.get_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schemas_are_objects() {
        let registry = ToolRegistry::from_config(&base_config());
        for tool in registry.tools() {
            let schema = tool.parameters_schema();
            assert_eq!(schema["type"], "object", "tool {}", tool.name());
            assert!(schema.get("properties").is_some(), "tool {}", tool.name());
        }
    }

    #[tokio::test]
    async fn test_graph_tool_without_flag() {
        let mut config = base_config();
        config.use_knowledge_graph = false;
        let ctx = AppContext::init(config).await.unwrap();
        let err = QueryKnowledgeGraphTool
            .execute(json!({ "command": "repos" }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_query_knowledge_graph_shorthand() {
        let ctx = test_ctx().await;
        let value = QueryKnowledgeGraphTool
            .execute(json!({ "command": "repos" }), &ctx)
            .await
            .unwrap();
        assert_eq!(value["success"], true);
        assert!(value["result"]["repositories"].is_array());
    }
}
