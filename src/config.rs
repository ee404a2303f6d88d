//! Configuration loading and validation.
//!
//! crawl-harness is configured entirely through environment variables, with an
//! optional `.env` file whose values **override** the ambient process
//! environment (loaded via `dotenvy::dotenv_override`). Everything is read
//! eagerly at startup; a bad configuration is a startup failure (exit code 1),
//! never a runtime surprise.
//!
//! # Variables
//!
//! | Variable | Effect | Default |
//! |----------|--------|---------|
//! | `TRANSPORT` | `stdio` or `http` | `stdio` |
//! | `PORT` | HTTP bind port | `8051` |
//! | `VECTOR_DB` | `qdrant`, `pgvector`, or `memory` | `memory` |
//! | `QDRANT_URL`, `QDRANT_API_KEY` | qdrant adapter connection | — |
//! | `DATABASE_URL` | pgvector adapter connection | — |
//! | `EMBEDDING_API_URL`, `EMBEDDING_API_KEY` | embedding API | — |
//! | `EMBEDDING_MODEL` | embedding model name | `text-embedding-3-small` |
//! | `EMBEDDING_DIMS` | embedding dimension | `1536` |
//! | `LLM_API_URL`, `LLM_API_KEY`, `LLM_MODEL` | summarizer API | — |
//! | `SEARXNG_URL` | metasearch backend | — |
//! | `RERANKER_URL` | cross-encoder sidecar | — |
//! | `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD` | graph store | — |
//! | `USE_CONTEXTUAL_EMBEDDINGS` | per-chunk context prefixes | `false` |
//! | `USE_HYBRID_SEARCH` | keyword merge on retrieval | `false` |
//! | `USE_AGENTIC_RAG` | code-example extraction + tool | `false` |
//! | `USE_RERANKING` | cross-encoder reranking | `false` |
//! | `USE_KNOWLEDGE_GRAPH` | validator + graph tools | `false` |
//! | `CHUNK_SIZE` / `CHUNK_OVERLAP` | chunker tuning | `5000` / `200` |
//! | `MAX_CONCURRENT` / `MAX_DEPTH` | crawler tuning | `10` / `3` |
//! | `EMBED_BATCH_SIZE` | embedding batch size | `32` |
//! | `UPSERT_BATCH_SIZE` | store write batch size | `100` |
//! | `REQUEST_TIMEOUT_SECS` | per-request deadline | `30` |

use anyhow::{bail, Result};
use std::path::Path;

/// Which MCP transport the server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

/// Which vector store adapter to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    Qdrant,
    Pgvector,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: Transport,
    pub port: u16,
    pub vector_backend: VectorBackend,

    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub database_url: Option<String>,

    pub embedding_api_url: Option<String>,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dims: usize,

    pub llm_api_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,

    pub searxng_url: Option<String>,
    pub reranker_url: Option<String>,

    pub neo4j_uri: Option<String>,
    pub neo4j_user: Option<String>,
    pub neo4j_password: Option<String>,

    pub use_contextual_embeddings: bool,
    pub use_hybrid_search: bool,
    pub use_agentic_rag: bool,
    pub use_reranking: bool,
    pub use_knowledge_graph: bool,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_concurrent: usize,
    pub max_depth: usize,
    pub embed_batch_size: usize,
    pub upsert_batch_size: usize,
    pub request_timeout_secs: u64,
    pub contextual_concurrency: usize,
    pub min_code_block_chars: usize,
    pub code_context_chars: usize,
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str) -> bool {
    matches!(
        std::env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match env_str(key) {
        None => Ok(default),
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| anyhow::anyhow!("{} must be a positive integer, got '{}'", key, v)),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env_str(key) {
        None => Ok(default),
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| anyhow::anyhow!("{} must be a positive integer, got '{}'", key, v)),
    }
}

impl Config {
    /// Load configuration from the environment, applying `.env` first.
    ///
    /// `.env` values override whatever is already in the process environment.
    pub fn load() -> Result<Self> {
        // Ignore a missing .env file; a malformed one is a startup failure.
        match dotenvy::dotenv_override() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => bail!("failed to load .env: {}", e),
        }
        Self::from_env()
    }

    /// Load configuration from an explicit env file path (used by the CLI
    /// `--env-file` flag). The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        dotenvy::from_path_override(path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {}", path.display(), e))?;
        Self::from_env()
    }

    /// Read and validate the process environment.
    pub fn from_env() -> Result<Self> {
        let transport = match env_str("TRANSPORT").as_deref() {
            None | Some("stdio") => Transport::Stdio,
            Some("http") => Transport::Http,
            Some(other) => bail!("Unknown TRANSPORT: '{}'. Use stdio or http.", other),
        };

        let port = match env_str("PORT") {
            None => 8051,
            Some(v) => v
                .parse::<u16>()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid port number, got '{}'", v))?,
        };

        let vector_backend = match env_str("VECTOR_DB").as_deref() {
            None | Some("memory") => VectorBackend::Memory,
            Some("qdrant") => VectorBackend::Qdrant,
            Some("pgvector") => VectorBackend::Pgvector,
            Some(other) => bail!(
                "Unknown VECTOR_DB: '{}'. Use qdrant, pgvector, or memory.",
                other
            ),
        };

        let config = Self {
            transport,
            port,
            vector_backend,
            qdrant_url: env_str("QDRANT_URL"),
            qdrant_api_key: env_str("QDRANT_API_KEY"),
            database_url: env_str("DATABASE_URL"),
            embedding_api_url: env_str("EMBEDDING_API_URL"),
            embedding_api_key: env_str("EMBEDDING_API_KEY"),
            embedding_model: env_str("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_dims: env_usize("EMBEDDING_DIMS", 1536)?,
            llm_api_url: env_str("LLM_API_URL"),
            llm_api_key: env_str("LLM_API_KEY"),
            llm_model: env_str("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            searxng_url: env_str("SEARXNG_URL"),
            reranker_url: env_str("RERANKER_URL"),
            neo4j_uri: env_str("NEO4J_URI"),
            neo4j_user: env_str("NEO4J_USER"),
            neo4j_password: env_str("NEO4J_PASSWORD"),
            use_contextual_embeddings: env_bool("USE_CONTEXTUAL_EMBEDDINGS"),
            use_hybrid_search: env_bool("USE_HYBRID_SEARCH"),
            use_agentic_rag: env_bool("USE_AGENTIC_RAG"),
            use_reranking: env_bool("USE_RERANKING"),
            use_knowledge_graph: env_bool("USE_KNOWLEDGE_GRAPH"),
            chunk_size: env_usize("CHUNK_SIZE", 5000)?,
            chunk_overlap: env_usize("CHUNK_OVERLAP", 200)?,
            max_concurrent: env_usize("MAX_CONCURRENT", 10)?,
            max_depth: env_usize("MAX_DEPTH", 3)?,
            embed_batch_size: env_usize("EMBED_BATCH_SIZE", 32)?,
            upsert_batch_size: env_usize("UPSERT_BATCH_SIZE", 100)?,
            request_timeout_secs: env_u64("REQUEST_TIMEOUT_SECS", 30)?,
            contextual_concurrency: env_usize("CONTEXTUAL_CONCURRENCY", 4)?,
            min_code_block_chars: env_usize("MIN_CODE_BLOCK_CHARS", 300)?,
            code_context_chars: env_usize("CODE_CONTEXT_CHARS", 500)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("CHUNK_SIZE must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        if self.embedding_dims == 0 {
            bail!("EMBEDDING_DIMS must be > 0");
        }
        if self.max_concurrent == 0 {
            bail!("MAX_CONCURRENT must be > 0");
        }
        if self.embed_batch_size == 0 || self.upsert_batch_size == 0 {
            bail!("EMBED_BATCH_SIZE and UPSERT_BATCH_SIZE must be > 0");
        }

        match self.vector_backend {
            VectorBackend::Qdrant if self.qdrant_url.is_none() => {
                bail!("QDRANT_URL is required when VECTOR_DB=qdrant")
            }
            VectorBackend::Pgvector if self.database_url.is_none() => {
                bail!("DATABASE_URL is required when VECTOR_DB=pgvector")
            }
            _ => {}
        }

        if self.use_knowledge_graph && self.neo4j_uri.is_some() {
            if self.neo4j_user.is_none() || self.neo4j_password.is_none() {
                bail!("NEO4J_USER and NEO4J_PASSWORD are required when NEO4J_URI is set");
            }
        }

        Ok(())
    }

    /// True when an embedding API endpoint is configured.
    pub fn embeddings_enabled(&self) -> bool {
        self.embedding_api_url.is_some()
    }

    /// True when an LLM summarizer endpoint is configured.
    pub fn llm_enabled(&self) -> bool {
        self.llm_api_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; each uses distinct keys read through
    // the same helpers rather than racing over shared ones.

    #[test]
    fn test_env_bool_parsing() {
        std::env::set_var("CH_TEST_FLAG_TRUE", "true");
        std::env::set_var("CH_TEST_FLAG_ONE", "1");
        std::env::set_var("CH_TEST_FLAG_OFF", "false");
        assert!(env_bool("CH_TEST_FLAG_TRUE"));
        assert!(env_bool("CH_TEST_FLAG_ONE"));
        assert!(!env_bool("CH_TEST_FLAG_OFF"));
        assert!(!env_bool("CH_TEST_FLAG_MISSING"));
    }

    #[test]
    fn test_env_usize_default_and_parse() {
        assert_eq!(env_usize("CH_TEST_USIZE_MISSING", 42).unwrap(), 42);
        std::env::set_var("CH_TEST_USIZE_SET", "7");
        assert_eq!(env_usize("CH_TEST_USIZE_SET", 42).unwrap(), 7);
        std::env::set_var("CH_TEST_USIZE_BAD", "seven");
        assert!(env_usize("CH_TEST_USIZE_BAD", 42).is_err());
    }

    #[test]
    fn test_validate_rejects_overlap_ge_size() {
        let mut cfg = Config::from_env().unwrap();
        cfg.chunk_size = 100;
        cfg.chunk_overlap = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_requires_backend_url() {
        let mut cfg = Config::from_env().unwrap();
        cfg.vector_backend = VectorBackend::Qdrant;
        cfg.qdrant_url = None;
        assert!(cfg.validate().is_err());
    }
}
