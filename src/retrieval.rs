//! Retrieval engine: dense search with optional keyword merge and reranking.
//!
//! `rag_query` embeds the query once, widens the candidate set when a merge
//! or rerank stage follows (`k' = 2k`), and returns a deterministically
//! ordered result list: rerank score when present, else vector score, with
//! ties broken by lower `chunk_index` then lexicographic url.

use serde_json::Map;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::ToolError;
use crate::models::ChunkHit;
use crate::rerank::Reranker;
use crate::store::{fuse_hybrid, MetadataFilter, VectorStore};

/// Which collection a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    Chunks,
    CodeExamples,
}

pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    use_hybrid: bool,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        use_hybrid: bool,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
            use_hybrid,
        }
    }

    /// Run a grounded retrieval query.
    ///
    /// `source` restricts hits to one host via the metadata filter.
    pub async fn rag_query(
        &self,
        query: &str,
        k: usize,
        source: Option<&str>,
        target: QueryTarget,
    ) -> Result<Vec<ChunkHit>, ToolError> {
        if query.trim().is_empty() {
            return Err(ToolError::invalid_argument("query must not be empty"));
        }
        if k == 0 {
            return Err(ToolError::invalid_argument("match_count must be > 0"));
        }

        let widened = self.use_hybrid || self.reranker.is_some();
        let k_prime = if widened { k * 2 } else { k };

        let query_embedding = self
            .embedder
            .embed_one(query)
            .await
            .map_err(|e| ToolError::backend_unavailable(format!("embedding failed: {}", e)))?;

        let filter: Option<MetadataFilter> = source.map(|s| {
            let mut f = Map::new();
            f.insert("source_id".into(), s.into());
            f
        });

        let mut hits = match target {
            QueryTarget::Chunks => {
                self.store
                    .search_chunks(&query_embedding, k_prime, filter.as_ref())
                    .await?
            }
            QueryTarget::CodeExamples => {
                self.store
                    .search_code_examples(&query_embedding, k_prime, filter.as_ref())
                    .await?
            }
        };

        if self.use_hybrid {
            let keyword_hits = match target {
                QueryTarget::Chunks => {
                    self.store
                        .keyword_search_chunks(query, k_prime, source)
                        .await?
                }
                QueryTarget::CodeExamples => {
                    self.store
                        .keyword_search_code_examples(query, k_prime, source)
                        .await?
                }
            };
            hits = fuse_hybrid(hits, keyword_hits, k_prime);
        }

        if self.reranker.is_some() {
            hits = self.rerank(query, hits).await;
        }

        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    /// Apply the cross-encoder; scoring failure keeps the original order.
    async fn rerank(&self, query: &str, mut hits: Vec<ChunkHit>) -> Vec<ChunkHit> {
        let Some(ref reranker) = self.reranker else {
            return hits;
        };
        if hits.is_empty() {
            return hits;
        }

        let documents: Vec<String> = hits.iter().map(|h| h.content.clone()).collect();
        match reranker.score(query, &documents).await {
            Ok(scores) => {
                for (hit, score) in hits.iter_mut().zip(scores) {
                    hit.rerank_score = Some(score as f64);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "reranking failed; keeping vector order");
            }
        }
        hits
    }
}

/// Deterministic result ordering: rerank score if present else vector score
/// (descending), then lower chunk_index, then lexicographic url.
pub fn sort_hits(hits: &mut [ChunkHit]) {
    hits.sort_by(|a, b| {
        let a_key = a.rerank_score.unwrap_or(a.score);
        let b_key = b.rerank_score.unwrap_or(b.score);
        b_key
            .partial_cmp(&a_key)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_index.cmp(&b.chunk_index))
            .then(a.url.cmp(&b.url))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentChunk;
    use crate::rerank::testing::WordOverlapReranker;
    use crate::store::memory::MemoryStore;
    use anyhow::Result;
    use async_trait::async_trait;

    struct HashEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dims];
                    for word in t.split_whitespace() {
                        let h = word
                            .bytes()
                            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                        v[h % self.dims] += 1.0;
                    }
                    v
                })
                .collect())
        }

        fn dims(&self) -> usize {
            self.dims
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new(8));
        let embedder = HashEmbedder { dims: 8 };
        let contents = [
            ("https://a.test/x", 0, "hello world greeting page"),
            ("https://a.test/x", 1, "unrelated filler text"),
            ("https://b.test/y", 0, "hello again world"),
        ];
        let mut chunks = Vec::new();
        for (url, index, content) in contents {
            let source_id = crate::models::source_id_of(url).unwrap();
            let embedding = embedder
                .embed_batch(&[content.to_string()])
                .await
                .unwrap()
                .remove(0);
            let mut metadata = Map::new();
            metadata.insert("source_id".into(), source_id.clone().into());
            metadata.insert("word_count".into(), 3.into());
            chunks.push(DocumentChunk {
                id: format!("{}#{}", url, index),
                url: url.to_string(),
                chunk_index: index,
                content: content.to_string(),
                embedding,
                metadata,
                source_id,
            });
        }
        store.upsert_chunks(&chunks).await.unwrap();
        store
    }

    fn engine(
        store: Arc<MemoryStore>,
        reranker: Option<Arc<dyn Reranker>>,
        hybrid: bool,
    ) -> RetrievalEngine {
        RetrievalEngine::new(store, Arc::new(HashEmbedder { dims: 8 }), reranker, hybrid)
    }

    #[tokio::test]
    async fn test_vector_query_returns_k() {
        let store = seeded_store().await;
        let engine = engine(store, None, false);
        let hits = engine
            .rag_query("hello world", 2, None, QueryTarget::Chunks)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        // Scores are non-increasing.
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_source_filter_restricts() {
        let store = seeded_store().await;
        let engine = engine(store, None, false);
        let hits = engine
            .rag_query("hello", 10, Some("b.test"), QueryTarget::Chunks)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.source_id == "b.test"));
    }

    #[tokio::test]
    async fn test_empty_query_invalid() {
        let store = seeded_store().await;
        let engine = engine(store, None, false);
        let err = engine
            .rag_query("   ", 5, None, QueryTarget::Chunks)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_query_empty_store_ok() {
        let store = Arc::new(MemoryStore::new(8));
        let engine = engine(store, None, false);
        let hits = engine
            .rag_query("anything", 5, None, QueryTarget::Chunks)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_rerank_orders_by_cross_encoder() {
        let store = seeded_store().await;
        let engine = engine(store, Some(Arc::new(WordOverlapReranker)), false);
        let hits = engine
            .rag_query("hello world", 3, None, QueryTarget::Chunks)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].rerank_score.is_some());
        // The filler chunk shares no words with the query; it cannot lead.
        assert!(hits[0].content.contains("hello"));
        for pair in hits.windows(2) {
            assert!(pair[0].rerank_score.unwrap() >= pair[1].rerank_score.unwrap());
        }
    }

    #[tokio::test]
    async fn test_hybrid_includes_keyword_only_matches() {
        let store = seeded_store().await;
        let engine = engine(store, None, true);
        let hits = engine
            .rag_query("greeting", 3, None, QueryTarget::Chunks)
            .await
            .unwrap();
        // The keyword channel guarantees the literal match surfaces.
        assert!(hits.iter().any(|h| h.content.contains("greeting")));
    }

    #[tokio::test]
    async fn test_ordering_stable_across_runs() {
        let store = seeded_store().await;
        let engine = engine(store, None, false);
        let a = engine
            .rag_query("hello world", 3, None, QueryTarget::Chunks)
            .await
            .unwrap();
        let b = engine
            .rag_query("hello world", 3, None, QueryTarget::Chunks)
            .await
            .unwrap();
        let ids_a: Vec<&str> = a.iter().map(|h| h.id.as_str()).collect();
        let ids_b: Vec<&str> = b.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
