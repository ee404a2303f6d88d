//! In-process vector store.
//!
//! Exact cosine scan over everything, no persistence. Used by the test
//! suite and available as `VECTOR_DB=memory` for running the full pipeline
//! with zero external services.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::embedding::cosine_similarity;
use crate::models::{ChunkHit, CodeExample, DocumentChunk, SourceRecord};

use super::{
    check_chunk_dims, check_code_dims, metadata_matches, MetadataFilter, StoreError, VectorStore,
};

#[derive(Default)]
struct Inner {
    chunks: HashMap<String, DocumentChunk>,
    code: HashMap<String, CodeExample>,
    sources: HashMap<String, SourceRecord>,
}

pub struct MemoryStore {
    dims: usize,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn chunk_to_hit(c: &DocumentChunk, score: f64) -> ChunkHit {
    ChunkHit {
        id: c.id.clone(),
        url: c.url.clone(),
        chunk_index: c.chunk_index,
        content: c.content.clone(),
        metadata: c.metadata.clone(),
        source_id: c.source_id.clone(),
        score,
        rerank_score: None,
    }
}

fn code_to_hit(c: &CodeExample, score: f64) -> ChunkHit {
    ChunkHit {
        id: c.id.clone(),
        url: c.url.clone(),
        chunk_index: c.code_index,
        content: c.code.clone(),
        metadata: c.metadata.clone(),
        source_id: c.source_id.clone(),
        score,
        rerank_score: None,
    }
}

/// Cosine similarity mapped into `[0, 1]`.
fn unit_score(query: &[f32], v: &[f32]) -> f64 {
    (cosine_similarity(query, v) as f64).clamp(0.0, 1.0)
}

fn rank_and_truncate(mut hits: Vec<ChunkHit>, k: usize) -> Vec<ChunkHit> {
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

#[async_trait]
impl VectorStore for MemoryStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), StoreError> {
        check_chunk_dims(chunks, self.dims)?;
        let mut inner = self.write();
        for c in chunks {
            inner.chunks.insert(c.id.clone(), c.clone());
        }
        Ok(())
    }

    async fn delete_chunks_by_url(&self, url: &str) -> Result<(), StoreError> {
        self.write().chunks.retain(|_, c| c.url != url);
        Ok(())
    }

    async fn search_chunks(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter_metadata: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let inner = self.read();
        let hits = inner
            .chunks
            .values()
            .filter(|c| filter_metadata.map_or(true, |f| metadata_matches(&c.metadata, f)))
            .map(|c| chunk_to_hit(c, unit_score(query_embedding, &c.embedding)))
            .collect();
        Ok(rank_and_truncate(hits, k))
    }

    async fn keyword_search_chunks(
        &self,
        query: &str,
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let needle = query.to_lowercase();
        let inner = self.read();
        let hits = inner
            .chunks
            .values()
            .filter(|c| source.map_or(true, |s| c.source_id == s))
            .filter(|c| c.content.to_lowercase().contains(&needle))
            .map(|c| chunk_to_hit(c, 1.0))
            .collect();
        Ok(rank_and_truncate(hits, k))
    }

    async fn upsert_code_examples(&self, examples: &[CodeExample]) -> Result<(), StoreError> {
        check_code_dims(examples, self.dims)?;
        let mut inner = self.write();
        for e in examples {
            inner.code.insert(e.id.clone(), e.clone());
        }
        Ok(())
    }

    async fn delete_code_examples_by_url(&self, url: &str) -> Result<(), StoreError> {
        self.write().code.retain(|_, c| c.url != url);
        Ok(())
    }

    async fn search_code_examples(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter_metadata: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let inner = self.read();
        let hits = inner
            .code
            .values()
            .filter(|c| filter_metadata.map_or(true, |f| metadata_matches(&c.metadata, f)))
            .map(|c| code_to_hit(c, unit_score(query_embedding, &c.embedding)))
            .collect();
        Ok(rank_and_truncate(hits, k))
    }

    async fn keyword_search_code_examples(
        &self,
        query: &str,
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let needle = query.to_lowercase();
        let inner = self.read();
        let hits = inner
            .code
            .values()
            .filter(|c| source.map_or(true, |s| c.source_id == s))
            .filter(|c| {
                c.code.to_lowercase().contains(&needle)
                    || c.summary.to_lowercase().contains(&needle)
            })
            .map(|c| code_to_hit(c, 1.0))
            .collect();
        Ok(rank_and_truncate(hits, k))
    }

    async fn total_words(&self, source_id: &str) -> Result<usize, StoreError> {
        let inner = self.read();
        Ok(inner
            .chunks
            .values()
            .filter(|c| c.source_id == source_id)
            .map(|c| {
                c.metadata
                    .get("word_count")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize
            })
            .sum())
    }

    async fn get_sources(&self) -> Result<Vec<SourceRecord>, StoreError> {
        let mut sources: Vec<SourceRecord> = self.read().sources.values().cloned().collect();
        sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(sources)
    }

    async fn upsert_source(
        &self,
        source_id: &str,
        summary: &str,
        total_words: usize,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut inner = self.write();
        inner
            .sources
            .entry(source_id.to_string())
            .and_modify(|s| {
                s.summary = summary.to_string();
                s.total_words = total_words;
                s.updated_at = now;
            })
            .or_insert_with(|| SourceRecord {
                source_id: source_id.to_string(),
                summary: summary.to_string(),
                total_words,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn chunk(url: &str, index: usize, content: &str, embedding: Vec<f32>) -> DocumentChunk {
        let source_id = crate::models::source_id_of(url).unwrap();
        let mut metadata = Map::new();
        metadata.insert("source_id".into(), source_id.clone().into());
        DocumentChunk {
            id: crate::models::point_id(&DocumentChunk::natural_key(&source_id, url, index))
                .to_string(),
            url: url.to_string(),
            chunk_index: index,
            content: content.to_string(),
            embedding,
            metadata,
            source_id,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let store = MemoryStore::new(3);
        store
            .upsert_chunks(&[
                chunk("https://example.test/a", 0, "hello world", vec![1.0, 0.0, 0.0]),
                chunk("https://example.test/a", 1, "other text", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.search_chunks(&[1.0, 0.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].content.contains("hello"));
        // Scores are monotonically non-increasing.
        assert!(hits[0].score >= hits[1].score);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = MemoryStore::new(3);
        let err = store
            .upsert_chunks(&[chunk("https://example.test/a", 0, "x", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        // Nothing was written.
        assert!(store.search_chunks(&[1.0, 0.0, 0.0], 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_url_removes_all() {
        let store = MemoryStore::new(2);
        store
            .upsert_chunks(&[
                chunk("https://example.test/a", 0, "a0", vec![1.0, 0.0]),
                chunk("https://example.test/a", 1, "a1", vec![1.0, 0.0]),
                chunk("https://example.test/b", 0, "b0", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        store.delete_chunks_by_url("https://example.test/a").await.unwrap();

        let hits = store.search_chunks(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://example.test/b");
    }

    #[tokio::test]
    async fn test_metadata_filter_subset() {
        let store = MemoryStore::new(2);
        store
            .upsert_chunks(&[
                chunk("https://a.test/x", 0, "from a", vec![1.0, 0.0]),
                chunk("https://b.test/y", 0, "from b", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let mut filter = Map::new();
        filter.insert("source_id".into(), "a.test".into());
        let hits = store
            .search_chunks(&[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        // Every hit's metadata contains the filter.
        assert_eq!(hits[0].metadata.get("source_id").unwrap(), "a.test");
    }

    #[tokio::test]
    async fn test_keyword_search_substring() {
        let store = MemoryStore::new(2);
        store
            .upsert_chunks(&[
                chunk("https://a.test/x", 0, "Deployment Runbook", vec![1.0, 0.0]),
                chunk("https://a.test/y", 0, "unrelated", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.keyword_search_chunks("runbook", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("Runbook"));
    }

    #[tokio::test]
    async fn test_source_registry_idempotent_upsert() {
        let store = MemoryStore::new(2);
        store.upsert_source("example.test", "first", 10).await.unwrap();
        store.upsert_source("example.test", "second", 25).await.unwrap();

        let sources = store.get_sources().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].summary, "second");
        assert_eq!(sources[0].total_words, 25);
        assert!(sources[0].updated_at >= sources[0].created_at);
    }

    #[tokio::test]
    async fn test_reingest_replaces_chunks() {
        let store = MemoryStore::new(2);
        let url = "https://example.test/page";
        store
            .upsert_chunks(&[
                chunk(url, 0, "v1 c0", vec![1.0, 0.0]),
                chunk(url, 1, "v1 c1", vec![1.0, 0.0]),
                chunk(url, 2, "v1 c2", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        // Re-ingest with fewer chunks: delete-then-insert, no orphans.
        store.delete_chunks_by_url(url).await.unwrap();
        store
            .upsert_chunks(&[
                chunk(url, 0, "v2 c0", vec![1.0, 0.0]),
                chunk(url, 1, "v2 c1", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let mut hits = store.search_chunks(&[1.0, 0.0], 10, None).await.unwrap();
        hits.sort_by_key(|h| h.chunk_index);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.content.starts_with("v2")));
        let indices: Vec<usize> = hits.iter().map(|h| h.chunk_index).collect();
        assert_eq!(indices, vec![0, 1]);
    }
}
