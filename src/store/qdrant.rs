//! Qdrant adapter: collection-oriented dense-vector store over REST.
//!
//! Three collections are created at [`initialize`](VectorStore::initialize)
//! with the configured dimension and cosine distance; failure to create any
//! of them is fatal. Qdrant point ids must be UUIDs or integers, so natural
//! keys (domains, URLs) are hashed into stable UUIDv5 ids and the natural key
//! is kept in the payload.
//!
//! Chunk metadata lives under the `metadata` payload key; filtered search
//! translates the `filter_metadata` predicate into nested `metadata.<key>`
//! match conditions evaluated server-side. Keyword search is a client-side
//! substring scan over scrolled payloads (this adapter has no text index).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::models::{point_id, ChunkHit, CodeExample, DocumentChunk, SourceRecord};

use super::{check_chunk_dims, check_code_dims, MetadataFilter, StoreError, VectorStore};

pub const CHUNKS_COLLECTION: &str = "crawled_pages";
pub const CODE_COLLECTION: &str = "code_examples";
pub const SOURCES_COLLECTION: &str = "sources";

/// Page size and safety cap for client-side keyword scans.
const SCROLL_PAGE: usize = 256;
const SCROLL_CAP: usize = 10_000;

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    dims: usize,
}

impl QdrantStore {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        dims: usize,
        timeout_secs: u64,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            dims,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    /// Send a request and decode the JSON body, mapping HTTP failures onto
    /// [`StoreError`].
    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, StoreError> {
        let mut req = self.request(method, path);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await.map_err(|e| {
            StoreError::Unavailable(format!("qdrant unreachable: {}", e))
        })?;

        let status = response.status();
        let value: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            Ok(value)
        } else if status.is_server_error() {
            Err(StoreError::Unavailable(format!(
                "qdrant {}: {}",
                status,
                value["status"]["error"].as_str().unwrap_or("")
            )))
        } else {
            Err(StoreError::Rejected(format!(
                "qdrant {}: {}",
                status,
                value["status"]["error"].as_str().unwrap_or("")
            )))
        }
    }

    async fn ensure_collection(&self, name: &str) -> Result<(), StoreError> {
        let exists = self
            .call(reqwest::Method::GET, &format!("/collections/{}", name), None)
            .await;
        if exists.is_ok() {
            return Ok(());
        }

        self.call(
            reqwest::Method::PUT,
            &format!("/collections/{}", name),
            Some(json!({
                "vectors": {"size": self.dims, "distance": "Cosine"}
            })),
        )
        .await
        .map(|_| ())
    }

    async fn upsert_points(&self, collection: &str, points: Vec<Value>) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }
        self.call(
            reqwest::Method::PUT,
            &format!("/collections/{}/points?wait=true", collection),
            Some(json!({"points": points})),
        )
        .await
        .map(|_| ())
    }

    async fn delete_by_url(&self, collection: &str, url: &str) -> Result<(), StoreError> {
        self.call(
            reqwest::Method::POST,
            &format!("/collections/{}/points/delete?wait=true", collection),
            Some(json!({
                "filter": {"must": [{"key": "url", "match": {"value": url}}]}
            })),
        )
        .await
        .map(|_| ())
    }

    async fn dense_search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
        filter_metadata: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let mut body = json!({
            "vector": query_embedding,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter_metadata {
            if !filter.is_empty() {
                let must: Vec<Value> = filter
                    .iter()
                    .map(|(key, value)| {
                        json!({"key": format!("metadata.{}", key), "match": {"value": value}})
                    })
                    .collect();
                body["filter"] = json!({"must": must});
            }
        }

        let result = self
            .call(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", collection),
                Some(body),
            )
            .await?;

        let hits = result["result"]
            .as_array()
            .map(|points| {
                points
                    .iter()
                    .filter_map(|p| {
                        let score = p["score"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0);
                        payload_to_hit(&p["payload"], score)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(hits)
    }

    /// Scroll a collection's payloads, optionally restricted to a source.
    async fn scroll_payloads(
        &self,
        collection: &str,
        source: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut payloads = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(src) = source {
                body["filter"] = json!({
                    "must": [{"key": "source_id", "match": {"value": src}}]
                });
            }
            if let Some(ref off) = offset {
                body["offset"] = off.clone();
            }

            let result = self
                .call(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/scroll", collection),
                    Some(body),
                )
                .await?;

            if let Some(points) = result["result"]["points"].as_array() {
                payloads.extend(points.iter().map(|p| p["payload"].clone()));
            }

            offset = match result["result"]["next_page_offset"].clone() {
                Value::Null => None,
                off => Some(off),
            };

            if offset.is_none() || payloads.len() >= SCROLL_CAP {
                break;
            }
        }

        Ok(payloads)
    }

    async fn keyword_scan(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let needle = query.to_lowercase();
        let payloads = self.scroll_payloads(collection, source).await?;

        let mut hits: Vec<ChunkHit> = payloads
            .iter()
            .filter_map(|p| {
                let content = p["content"].as_str()?;
                let occurrences = content.to_lowercase().matches(&needle).count();
                if occurrences == 0 {
                    return None;
                }
                payload_to_hit(p, occurrences as f64)
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
        // Occurrence counts are rank fodder only; clamp into the score range.
        for h in &mut hits {
            h.score = h.score.min(1.0);
        }
        Ok(hits)
    }
}

fn chunk_payload(c: &DocumentChunk) -> Value {
    json!({
        "natural_key": DocumentChunk::natural_key(&c.source_id, &c.url, c.chunk_index),
        "url": c.url,
        "chunk_index": c.chunk_index,
        "content": c.content,
        "source_id": c.source_id,
        "metadata": Value::Object(c.metadata.clone()),
    })
}

fn code_payload(c: &CodeExample) -> Value {
    let mut metadata = c.metadata.clone();
    metadata.insert("summary".into(), c.summary.clone().into());
    if let Some(ref lang) = c.language {
        metadata.insert("language".into(), lang.clone().into());
    }
    metadata.insert(
        "surrounding_context".into(),
        c.surrounding_context.clone().into(),
    );
    json!({
        "natural_key": format!("{}|{}|code:{}", c.source_id, c.url, c.code_index),
        "url": c.url,
        "chunk_index": c.code_index,
        "content": c.code,
        "source_id": c.source_id,
        "metadata": Value::Object(metadata),
    })
}

fn payload_to_hit(payload: &Value, score: f64) -> Option<ChunkHit> {
    let metadata = payload["metadata"]
        .as_object()
        .cloned()
        .unwrap_or_else(Map::new);
    Some(ChunkHit {
        id: payload["natural_key"].as_str().unwrap_or_default().to_string(),
        url: payload["url"].as_str()?.to_string(),
        chunk_index: payload["chunk_index"].as_u64().unwrap_or(0) as usize,
        content: payload["content"].as_str().unwrap_or_default().to_string(),
        metadata,
        source_id: payload["source_id"].as_str().unwrap_or_default().to_string(),
        score,
        rerank_score: None,
    })
}

/// Deterministic placeholder vector for collections that require one but
/// carry no meaningful embedding (the source registry).
fn placeholder_vector(dims: usize) -> Vec<f32> {
    let mut v = vec![0.0; dims];
    if let Some(first) = v.first_mut() {
        *first = 1.0;
    }
    v
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        for name in [CHUNKS_COLLECTION, CODE_COLLECTION, SOURCES_COLLECTION] {
            self.ensure_collection(name).await?;
        }
        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), StoreError> {
        check_chunk_dims(chunks, self.dims)?;
        let points = chunks
            .iter()
            .map(|c| {
                json!({
                    "id": point_id(&DocumentChunk::natural_key(&c.source_id, &c.url, c.chunk_index)).to_string(),
                    "vector": c.embedding,
                    "payload": chunk_payload(c),
                })
            })
            .collect();
        self.upsert_points(CHUNKS_COLLECTION, points).await
    }

    async fn delete_chunks_by_url(&self, url: &str) -> Result<(), StoreError> {
        self.delete_by_url(CHUNKS_COLLECTION, url).await
    }

    async fn search_chunks(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter_metadata: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        self.dense_search(CHUNKS_COLLECTION, query_embedding, k, filter_metadata)
            .await
    }

    async fn keyword_search_chunks(
        &self,
        query: &str,
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        self.keyword_scan(CHUNKS_COLLECTION, query, k, source).await
    }

    async fn upsert_code_examples(&self, examples: &[CodeExample]) -> Result<(), StoreError> {
        check_code_dims(examples, self.dims)?;
        let points = examples
            .iter()
            .map(|c| {
                json!({
                    "id": point_id(&format!("{}|{}|code:{}", c.source_id, c.url, c.code_index)).to_string(),
                    "vector": c.embedding,
                    "payload": code_payload(c),
                })
            })
            .collect();
        self.upsert_points(CODE_COLLECTION, points).await
    }

    async fn delete_code_examples_by_url(&self, url: &str) -> Result<(), StoreError> {
        self.delete_by_url(CODE_COLLECTION, url).await
    }

    async fn search_code_examples(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter_metadata: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        self.dense_search(CODE_COLLECTION, query_embedding, k, filter_metadata)
            .await
    }

    async fn keyword_search_code_examples(
        &self,
        query: &str,
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        self.keyword_scan(CODE_COLLECTION, query, k, source).await
    }

    async fn total_words(&self, source_id: &str) -> Result<usize, StoreError> {
        let payloads = self
            .scroll_payloads(CHUNKS_COLLECTION, Some(source_id))
            .await?;
        Ok(payloads
            .iter()
            .map(|p| p["metadata"]["word_count"].as_u64().unwrap_or(0) as usize)
            .sum())
    }

    async fn get_sources(&self) -> Result<Vec<SourceRecord>, StoreError> {
        let payloads = self.scroll_payloads(SOURCES_COLLECTION, None).await?;
        let mut sources: Vec<SourceRecord> = payloads
            .iter()
            .filter_map(|p| {
                Some(SourceRecord {
                    source_id: p["source_id"].as_str()?.to_string(),
                    summary: p["summary"].as_str().unwrap_or_default().to_string(),
                    total_words: p["total_words"].as_u64().unwrap_or(0) as usize,
                    created_at: p["created_at"]
                        .as_str()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or_else(Utc::now),
                    updated_at: p["updated_at"]
                        .as_str()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or_else(Utc::now),
                })
            })
            .collect();
        sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(sources)
    }

    async fn upsert_source(
        &self,
        source_id: &str,
        summary: &str,
        total_words: usize,
    ) -> Result<(), StoreError> {
        let id = point_id(source_id).to_string();

        // Preserve created_at across updates.
        let existing = self
            .call(
                reqwest::Method::POST,
                &format!("/collections/{}/points", SOURCES_COLLECTION),
                Some(json!({"ids": [id], "with_payload": true})),
            )
            .await
            .ok();
        let created_at = existing
            .as_ref()
            .and_then(|v| v["result"].as_array())
            .and_then(|points| points.first())
            .and_then(|p| p["payload"]["created_at"].as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        let point = json!({
            "id": id,
            "vector": placeholder_vector(self.dims),
            "payload": {
                "source_id": source_id,
                "summary": summary,
                "total_words": total_words,
                "created_at": created_at,
                "updated_at": Utc::now().to_rfc3339(),
            }
        });
        self.upsert_points(SOURCES_COLLECTION, vec![point]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_vector_deterministic() {
        let v = placeholder_vector(4);
        assert_eq!(v, vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(placeholder_vector(4), v);
    }

    #[test]
    fn test_payload_round_trip() {
        let mut metadata = Map::new();
        metadata.insert("source_id".into(), "example.test".into());
        let chunk = DocumentChunk {
            id: "x".into(),
            url: "https://example.test/a".into(),
            chunk_index: 2,
            content: "body".into(),
            embedding: vec![0.0; 3],
            metadata,
            source_id: "example.test".into(),
        };
        let payload = chunk_payload(&chunk);
        let hit = payload_to_hit(&payload, 0.5).unwrap();
        assert_eq!(hit.url, chunk.url);
        assert_eq!(hit.chunk_index, 2);
        assert_eq!(hit.content, "body");
        assert_eq!(hit.source_id, "example.test");
        assert_eq!(hit.metadata.get("source_id").unwrap(), "example.test");
    }

    #[test]
    fn test_code_payload_carries_summary() {
        let code = CodeExample {
            id: "c".into(),
            url: "https://example.test/a".into(),
            code_index: 0,
            code: "print('hi')".into(),
            language: Some("python".into()),
            summary: "prints hi".into(),
            surrounding_context: "ctx".into(),
            embedding: vec![0.0; 3],
            metadata: Map::new(),
            source_id: "example.test".into(),
        };
        let payload = code_payload(&code);
        assert_eq!(payload["metadata"]["summary"], "prints hi");
        assert_eq!(payload["metadata"]["language"], "python");
        assert_eq!(payload["content"], "print('hi')");
    }
}
