//! crawlh — the Crawl Harness executable.
//!
//! One binary, transport chosen by `TRANSPORT` (stdio or http). Besides the
//! server, a few convenience subcommands wrap the same core functions the
//! MCP tools call, so an operator can crawl and query without an MCP client.
//!
//! Exit codes: 0 normal, 1 unrecoverable startup failure (bad config,
//! unreachable required backend), 2 runtime crash. In stdio mode nothing but
//! JSON-RPC ever reaches stdout; all diagnostics go to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crawl_harness::config::Config;
use crawl_harness::ingest::IngestOptions;
use crawl_harness::mcp::{serve, AppContext};
use crawl_harness::retrieval::QueryTarget;
use crawl_harness::validate::ValidationMode;

#[derive(Parser)]
#[command(
    name = "crawlh",
    about = "Crawl Harness — web ingestion and grounded retrieval over MCP",
    version
)]
struct Cli {
    /// Explicit env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server (default)
    Serve,

    /// Crawl one URL and index it
    Crawl {
        /// URL to crawl
        url: String,

        /// Follow internal links up to this depth
        #[arg(long, default_value_t = 0)]
        max_depth: usize,

        /// Print markdown instead of only counts
        #[arg(long)]
        raw: bool,
    },

    /// Query the indexed content
    Query {
        /// Query text
        query: String,

        /// Restrict results to one source host
        #[arg(long)]
        source: Option<String>,

        /// Maximum number of results
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// List indexed sources
    Sources,

    /// Validate a script against the knowledge graph
    Validate {
        /// Path to the script
        script: PathBuf,

        /// fast, balanced, or thorough
        #[arg(long, default_value = "balanced")]
        mode: String,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    // stderr always: stdio transport owns stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.env_file {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve::run(config).await,
        Commands::Crawl {
            url,
            max_depth,
            raw,
        } => run_crawl(config, &url, max_depth, raw).await,
        Commands::Query {
            query,
            source,
            limit,
        } => run_query(config, &query, source.as_deref(), limit).await,
        Commands::Sources => run_sources(config).await,
        Commands::Validate { script, mode } => run_validate(config, &script, &mode).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "fatal error");
            ExitCode::from(2)
        }
    }
}

async fn run_crawl(config: Config, url: &str, max_depth: usize, raw: bool) -> anyhow::Result<()> {
    let ctx = Arc::new(AppContext::init(config).await?);
    let pipeline = crawl_harness::ingest::IngestPipeline::new(
        ctx.crawler.clone(),
        ctx.store.clone(),
        ctx.embedder.clone(),
        ctx.llm.clone(),
        ctx.config.clone(),
    );

    let opts = IngestOptions {
        max_depth,
        return_raw_markdown: raw,
        extract_code_examples: ctx.config.use_agentic_rag,
        enable_contextual_embeddings: ctx.config.use_contextual_embeddings,
        ..Default::default()
    };
    let report = pipeline.smart_ingest(url, &opts).await;

    if let Some(ref map) = report.markdown_by_url {
        for (url, markdown) in map {
            println!("===== {} =====", url);
            println!("{}", markdown);
        }
    }

    println!("urls processed: {}", report.urls_processed);
    println!("chunks written: {}", report.chunks_written);
    if report.code_examples_written > 0 {
        println!("code examples written: {}", report.code_examples_written);
    }
    for result in report.results.iter().filter(|r| !r.ok) {
        println!(
            "failed: {} ({})",
            result.url,
            result.error.as_deref().unwrap_or("unknown")
        );
    }

    ctx.close().await;
    Ok(())
}

async fn run_query(
    config: Config,
    query: &str,
    source: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    let ctx = Arc::new(AppContext::init(config).await?);
    let hits = ctx
        .retrieval
        .rag_query(query, limit, source, QueryTarget::Chunks)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.message))?;

    if hits.is_empty() {
        println!("No results.");
    }
    for (i, hit) in hits.iter().enumerate() {
        let score = hit.rerank_score.unwrap_or(hit.score);
        println!("{}. [{:.3}] {} #{}", i + 1, score, hit.url, hit.chunk_index);
        let excerpt: String = hit.content.chars().take(200).collect();
        println!("    {}", excerpt.replace('\n', " "));
    }

    ctx.close().await;
    Ok(())
}

async fn run_sources(config: Config) -> anyhow::Result<()> {
    let ctx = Arc::new(AppContext::init(config).await?);
    let sources = ctx
        .store
        .get_sources()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    if sources.is_empty() {
        println!("No sources indexed.");
    }
    for s in &sources {
        println!("{}  ({} words)", s.source_id, s.total_words);
        if !s.summary.is_empty() {
            println!("    {}", s.summary);
        }
    }

    ctx.close().await;
    Ok(())
}

async fn run_validate(config: Config, script: &PathBuf, mode: &str) -> anyhow::Result<()> {
    let mut config = config;
    // The CLI path always has a graph to validate against, memory if nothing
    // else is configured.
    config.use_knowledge_graph = true;

    let ctx = Arc::new(AppContext::init(config).await?);
    let validator = ctx
        .validator
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("validator unavailable"))?;

    let mode = ValidationMode::parse(mode).map_err(|e| anyhow::anyhow!("{}", e.message))?;
    let report = validator
        .validate_script(&script.to_string_lossy(), mode)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.message))?;

    println!(
        "{}: {} validated, {} warnings, {} critical (risk {:.2})",
        report.script_path,
        report.validated_count,
        report.warning_count,
        report.critical_count,
        report.overall_risk
    );
    for f in &report.findings {
        println!(
            "  line {:>4}  {:<16} {:<40} {:.2}",
            f.line,
            f.kind,
            f.name,
            f.confidence
        );
        if !f.suggestions.is_empty() {
            println!("             did you mean: {}", f.suggestions.join(", "));
        }
    }

    ctx.close().await;
    Ok(())
}
