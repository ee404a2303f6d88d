//! # Crawl Harness
//!
//! **A web ingestion and grounded retrieval MCP server for AI tools.**
//!
//! Crawl Harness accepts URLs or natural-language queries, acquires web
//! content (directly or through a metasearch backend), turns raw pages into
//! chunked markdown and code-block artifacts, stores them with dense-vector
//! embeddings in a pluggable vector store, and serves grounded retrieval back
//! to an LLM-facing client over the Model Context Protocol. An optional
//! graph-backed validator cross-checks AI-generated scripts against parsed
//! repositories to flag hallucinated APIs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌─────────────┐   ┌────────────┐
//! │ Crawler  │──▶│   Chunker    │──▶│  Embedding  │──▶│ VectorStore │
//! │ web/txt/ │   │ + code blocks│   │   client    │   │ qdrant/pg/  │
//! │ sitemap  │   └─────────────┘   └─────────────┘   │ memory      │
//! └────┬─────┘                                        └─────┬──────┘
//!      │                 ┌───────────┐                      │
//!      └────────────────▶│ MCP tools │◀─────────────────────┘
//!                        │ stdio/http│◀──── knowledge graph (validator)
//!                        └───────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **crawler** ([`crawler`]) classifies each input URL (text file,
//!    sitemap, page) and fetches it through the [`fetch::PageBrowser`]
//!    boundary under a global concurrency cap and per-host gate.
//! 2. The **chunker** ([`chunker`]) splits page markdown on header,
//!    paragraph, and sentence boundaries without ever cutting a fenced code
//!    block, and lifts large code blocks out as code examples.
//! 3. The **embedding client** ([`embedding`]) batches texts to an external
//!    embeddings API, with retry, backoff, and zero-vector degradation.
//! 4. The **ingestion pipeline** ([`ingest`]) replaces each URL's previous
//!    chunks, writes the new ones in batches, and keeps the source registry
//!    current.
//! 5. The **retrieval engine** ([`retrieval`]) answers queries by dense
//!    search, optional keyword merge ([`store::fuse_hybrid`]), and optional
//!    cross-encoder reranking ([`rerank`]).
//! 6. The **validator** ([`validate`]) scores script symbols against a
//!    knowledge graph and the code-example collection, fusing both channels
//!    into a confidence classification.
//! 7. The **MCP layer** ([`mcp`]) exposes all of it as typed tools over
//!    stdio or HTTP JSON-RPC.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-first configuration with `.env` override |
//! | [`error`] | Error taxonomy and the structured failure contract |
//! | [`models`] | Core data types: chunks, code examples, sources, hits |
//! | [`chunker`] | Fence-safe markdown chunker and code-block extractor |
//! | [`embedding`] | Embedding client with batching, retry, and degradation |
//! | [`fetch`] | Page browser boundary and HTML→markdown conversion |
//! | [`crawler`] | Strategy dispatch and bounded-concurrency crawling |
//! | [`store`] | `VectorStore` trait with qdrant, pgvector, memory adapters |
//! | [`ingest`] | Crawl → chunk → embed → store orchestration |
//! | [`retrieval`] | Dense, hybrid, and reranked retrieval |
//! | [`rerank`] | Cross-encoder sidecar client |
//! | [`websearch`] | Metasearch client and search-then-ingest composite |
//! | [`llm`] | Summarizer client with deterministic fallbacks |
//! | [`validate`] | AST extraction, knowledge graph, hallucination scoring |
//! | [`mcp`] | Tool registry, shared context, JSON-RPC transports |

pub mod chunker;
pub mod config;
pub mod crawler;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod llm;
pub mod mcp;
pub mod models;
pub mod rerank;
pub mod retrieval;
pub mod store;
pub mod validate;
pub mod websearch;
