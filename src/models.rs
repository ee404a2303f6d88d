//! Core data models used throughout crawl-harness.
//!
//! These types represent the chunks, code examples, and search results that
//! flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Namespace for deriving stable point ids from natural keys.
///
/// Backends that require UUID point ids get `Uuid::new_v5(NS, natural_key)`;
/// the natural key itself is always retained in the payload.
pub const ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8c, 0x1a, 0x6f, 0x2e, 0x54, 0x3b, 0x4d, 0x91, 0x9a, 0x02, 0x7e, 0xc4, 0xd0, 0x5f, 0xb6, 0x33,
]);

/// Derive a stable UUID point id from a natural key (domain, URL, ...).
pub fn point_id(natural_key: &str) -> Uuid {
    Uuid::new_v5(&ID_NAMESPACE, natural_key.as_bytes())
}

/// A chunk of a crawled page, ready for storage.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    /// Stable id derived from `(source_id, url, chunk_index)`.
    pub id: String,
    /// Fetched URL (normalized, scheme preserved).
    pub url: String,
    /// Ordinal within the page, 0-based and dense.
    pub chunk_index: usize,
    /// Chunk text (markdown).
    pub content: String,
    /// Dense embedding; length equals the collection dimension.
    pub embedding: Vec<f32>,
    /// Free-form metadata. Always includes `source_id`, `chunk_size`,
    /// `word_count`; may include `headers`, `crawl_time`,
    /// `contextual_embedding`.
    pub metadata: Map<String, Value>,
    /// Host of `url`.
    pub source_id: String,
}

impl DocumentChunk {
    /// The natural key this chunk's point id is derived from.
    pub fn natural_key(source_id: &str, url: &str, chunk_index: usize) -> String {
        format!("{}|{}|{}", source_id, url, chunk_index)
    }
}

/// An extracted code example, stored in the code collection.
#[derive(Debug, Clone)]
pub struct CodeExample {
    /// Stable id derived from `(source_id, url, code_index)`.
    pub id: String,
    pub url: String,
    pub code_index: usize,
    /// The code block body.
    pub code: String,
    /// Fence language tag, when present.
    pub language: Option<String>,
    /// Model- or heuristic-generated one-paragraph summary.
    pub summary: String,
    /// Text immediately before and after the block.
    pub surrounding_context: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
    pub source_id: String,
}

/// A row in the source registry.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRecord {
    /// Host, primary key.
    pub source_id: String,
    pub summary: String,
    pub total_words: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A hit returned by vector, keyword, or hybrid search.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub id: String,
    pub url: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub source_id: String,
    /// Similarity in `[0, 1]`, higher is closer.
    pub score: f64,
    /// Cross-encoder score, present after reranking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
}

/// Per-URL outcome of a crawl or ingestion batch.
///
/// A single URL failure never aborts the batch; it is reported here.
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub url: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_written: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_examples_written: Option<usize>,
}

impl PageResult {
    pub fn ok(url: impl Into<String>, chunks: usize, code_examples: usize) -> Self {
        Self {
            url: url.into(),
            ok: true,
            error: None,
            chunks_written: Some(chunks),
            code_examples_written: Some(code_examples),
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ok: false,
            error: Some(error.into()),
            chunks_written: None,
            code_examples_written: None,
        }
    }
}

/// Extract the host ("source id") from a URL string.
pub fn source_id_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}
