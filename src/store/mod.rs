//! Storage abstraction for crawl-harness.
//!
//! The [`VectorStore`] trait defines every storage operation the ingestion
//! and retrieval pipeline needs, enabling pluggable backends:
//!
//! | Adapter | Backend | Module |
//! |---------|---------|--------|
//! | `qdrant` | Collection-oriented dense-vector store (REST) | [`qdrant`] |
//! | `pgvector` | PostgreSQL + pgvector | [`pgvector`] |
//! | `memory` | In-process, exact scan | [`memory`] |
//!
//! Three logical collections exist in every backend: crawled page chunks,
//! code examples, and the source registry. The embedding dimension is fixed
//! per store instance; a batch whose vectors disagree is rejected before any
//! write happens.
//!
//! The metadata predicate parameter is named `filter_metadata` on every
//! operation and every adapter — the name is part of the interface. A hit
//! matches when its metadata contains every key/value pair of the filter.
//!
//! Keyword search backends differ by adapter and are documented on
//! [`VectorStore::keyword_search_chunks`].

pub mod memory;
pub mod pgvector;
pub mod qdrant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{ChunkHit, CodeExample, DocumentChunk, SourceRecord};

/// Exact-match metadata predicate: a hit's metadata must contain every
/// key/value pair present here.
pub type MetadataFilter = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable (connection refused, timeout, pool exhausted).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Backend refused the request (dimension mismatch, validation error).
    #[error("store rejected request: {0}")]
    Rejected(String),
    /// The adapter does not implement this optional operation.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Rejected(e.to_string())
        }
    }
}

impl From<StoreError> for crate::error::ToolError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => crate::error::ToolError::backend_unavailable(msg),
            StoreError::Rejected(msg) => crate::error::ToolError::backend_rejected(msg),
            StoreError::NotSupported(op) => {
                crate::error::ToolError::backend_rejected(format!("not supported: {}", op))
            }
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

/// Abstract vector store over the three collections.
///
/// Implementations must tolerate concurrent calls on a shared handle; each
/// adapter declares its own internal serialization (the REST adapter shares a
/// connection pool inside `reqwest`, the relational adapter uses an sqlx
/// pool, the memory adapter an `RwLock`).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Ensure all collections exist with the configured dimension and cosine
    /// distance. Failure to create a collection is fatal.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Insert or overwrite a batch of chunks. All-or-nothing per batch; id
    /// collisions overwrite.
    async fn upsert_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), StoreError>;

    /// Remove every chunk stored for `url`.
    async fn delete_chunks_by_url(&self, url: &str) -> Result<(), StoreError>;

    /// Dense search over page chunks. Returns at most `k` hits, scores in
    /// `[0, 1]` descending.
    async fn search_chunks(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter_metadata: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkHit>, StoreError>;

    /// Substring keyword scan over chunk content, used only for hybrid
    /// merging.
    ///
    /// Backend choice per adapter: pgvector runs it server-side (`ILIKE`);
    /// qdrant and memory scan client-side over stored payloads.
    async fn keyword_search_chunks(
        &self,
        query: &str,
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkHit>, StoreError>;

    /// Insert or overwrite a batch of code examples.
    async fn upsert_code_examples(&self, examples: &[CodeExample]) -> Result<(), StoreError>;

    /// Remove every code example stored for `url`.
    async fn delete_code_examples_by_url(&self, url: &str) -> Result<(), StoreError>;

    /// Dense search over code examples.
    async fn search_code_examples(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter_metadata: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkHit>, StoreError>;

    /// Keyword scan over code example content.
    async fn keyword_search_code_examples(
        &self,
        query: &str,
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkHit>, StoreError>;

    /// Sum of `word_count` over every chunk currently stored for a source.
    /// Feeds the source registry's `total_words`.
    async fn total_words(&self, source_id: &str) -> Result<usize, StoreError>;

    /// List the source registry.
    async fn get_sources(&self) -> Result<Vec<SourceRecord>, StoreError>;

    /// Create or update a source record. Idempotent.
    async fn upsert_source(
        &self,
        source_id: &str,
        summary: &str,
        total_words: usize,
    ) -> Result<(), StoreError>;

    /// Release backend resources. Called once at server shutdown.
    async fn close(&self) {}
}

/// Reject a chunk batch whose vectors disagree with the store dimension.
pub(crate) fn check_chunk_dims(chunks: &[DocumentChunk], dims: usize) -> Result<(), StoreError> {
    for c in chunks {
        if c.embedding.len() != dims {
            return Err(StoreError::Rejected(format!(
                "embedding dimension mismatch for {}: got {}, collection expects {}",
                c.id,
                c.embedding.len(),
                dims
            )));
        }
    }
    Ok(())
}

pub(crate) fn check_code_dims(examples: &[CodeExample], dims: usize) -> Result<(), StoreError> {
    for e in examples {
        if e.embedding.len() != dims {
            return Err(StoreError::Rejected(format!(
                "embedding dimension mismatch for {}: got {}, collection expects {}",
                e.id,
                e.embedding.len(),
                dims
            )));
        }
    }
    Ok(())
}

/// True when `metadata` contains every key/value pair of `filter_metadata`.
pub fn metadata_matches(metadata: &Map<String, Value>, filter_metadata: &MetadataFilter) -> bool {
    filter_metadata
        .iter()
        .all(|(k, v)| metadata.get(k) == Some(v))
}

// ============ Hybrid fusion ============

const RANK_WEIGHT_VECTOR: f64 = 1.0;
const RANK_WEIGHT_KEYWORD: f64 = 0.5;

/// Merge vector and keyword result lists by reciprocal rank.
///
/// Each hit scores `w_v/rank_v + w_k/rank_k` (normalized into `[0, 1]`),
/// missing ranks contributing zero, so items present in both lists are
/// boosted above single-channel items of similar rank. Ties break on lower
/// `chunk_index`, then lexicographic url.
pub fn fuse_hybrid(vector_hits: Vec<ChunkHit>, keyword_hits: Vec<ChunkHit>, k: usize) -> Vec<ChunkHit> {
    use std::collections::HashMap;

    let mut fused: HashMap<String, (ChunkHit, f64)> = HashMap::new();

    for (rank, hit) in vector_hits.into_iter().enumerate() {
        let contribution = RANK_WEIGHT_VECTOR / (rank + 1) as f64;
        fused.insert(hit.id.clone(), (hit, contribution));
    }
    for (rank, hit) in keyword_hits.into_iter().enumerate() {
        let contribution = RANK_WEIGHT_KEYWORD / (rank + 1) as f64;
        fused
            .entry(hit.id.clone())
            .and_modify(|(_, score)| *score += contribution)
            .or_insert((hit, contribution));
    }

    let norm = RANK_WEIGHT_VECTOR + RANK_WEIGHT_KEYWORD;
    let mut hits: Vec<ChunkHit> = fused
        .into_values()
        .map(|(mut hit, score)| {
            hit.score = score / norm;
            hit
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_index.cmp(&b.chunk_index))
            .then(a.url.cmp(&b.url))
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, url: &str, index: usize) -> ChunkHit {
        ChunkHit {
            id: id.to_string(),
            url: url.to_string(),
            chunk_index: index,
            content: String::new(),
            metadata: Map::new(),
            source_id: "example.test".to_string(),
            score: 0.0,
            rerank_score: None,
        }
    }

    #[test]
    fn test_fuse_boosts_items_in_both() {
        let vector = vec![hit("a", "u1", 0), hit("b", "u2", 0)];
        let keyword = vec![hit("b", "u2", 0), hit("c", "u3", 0)];
        let fused = fuse_hybrid(vector, keyword, 10);
        // "b" gets vector rank 2 + keyword rank 1; "a" only vector rank 1.
        // 1/2 + 0.5/1 = 1.0 vs 1/1 = 1.0 -> tie; both outrank "c" (0.5/2).
        let ids: Vec<&str> = fused.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], "c");
    }

    #[test]
    fn test_fuse_scores_in_unit_interval() {
        let vector = vec![hit("a", "u1", 0), hit("b", "u2", 1)];
        let keyword = vec![hit("a", "u1", 0)];
        let fused = fuse_hybrid(vector, keyword, 10);
        for h in &fused {
            assert!(h.score > 0.0 && h.score <= 1.0, "score {}", h.score);
        }
        // "a" is in both channels at rank 1: the maximum possible score.
        assert_eq!(fused[0].id, "a");
        assert!((fused[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fuse_truncates_to_k() {
        let vector = (0..10).map(|i| hit(&format!("v{}", i), "u", i)).collect();
        let fused = fuse_hybrid(vector, Vec::new(), 3);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_fuse_deterministic_tiebreak() {
        // Same score: lower chunk_index wins, then url.
        let vector = vec![hit("a", "u2", 1)];
        let keyword = vec![hit("b", "u1", 1)];
        let fused_a = fuse_hybrid(vector.clone(), keyword.clone(), 10);
        let fused_b = fuse_hybrid(vector, keyword, 10);
        let ids_a: Vec<&str> = fused_a.iter().map(|h| h.id.as_str()).collect();
        let ids_b: Vec<&str> = fused_b.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_metadata_matches_subset() {
        let mut meta = Map::new();
        meta.insert("source_id".into(), "example.test".into());
        meta.insert("word_count".into(), 10.into());

        let mut filter = Map::new();
        filter.insert("source_id".into(), "example.test".into());
        assert!(metadata_matches(&meta, &filter));

        filter.insert("missing".into(), true.into());
        assert!(!metadata_matches(&meta, &filter));
    }
}
