//! Embedding client: batched requests, retry with backoff, zero-vector
//! degradation.
//!
//! The embedding model is an external HTTP API: `POST {base}/embeddings` with
//! `{model, input: [strings]}` returning `{data: [{embedding: [floats]}]}`.
//! The dimension is constant for the lifetime of a collection.
//!
//! # Retry strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s with a small random jitter
//!
//! After the final retry fails, [`HttpEmbedder::embed_batch`] returns
//! zero-vectors of the configured dimension and logs one warning per batch,
//! so ingestion continues with degraded recall rather than aborting. A
//! response with the wrong dimension is never papered over: that is a
//! [`BackendRejected`](crate::error::ErrorKind::BackendRejected)-class error
//! and nothing is written downstream.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

use crate::config::Config;

const MAX_ATTEMPTS: u32 = 3;

/// Batch embedding interface.
///
/// The HTTP implementation is the production path; tests substitute a
/// deterministic in-process embedder.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    ///
    /// Transport failures degrade to zero-vectors (see module docs); a
    /// dimension mismatch from the backend is a hard error.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let out = self.embed_batch(&[text.to_string()]).await?;
        out.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    /// Vector dimensionality for every embedding this client produces.
    fn dims(&self) -> usize;
}

/// Embedding client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    batch_size: usize,
}

impl HttpEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .embedding_api_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("EMBEDDING_API_URL is not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.embedding_api_key.clone(),
            model: config.embedding_model.clone(),
            dims: config.embedding_dims,
            batch_size: config.embed_batch_size,
        })
    }

    /// One API round trip for a single batch, with retries.
    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let base = Duration::from_secs(1 << (attempt - 1));
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                tokio::time::sleep(base + jitter).await;
            }

            let mut req = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .header("Content-Type", "application/json")
                .json(&body);
            if let Some(ref key) = self.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json, self.dims, texts.len());
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("embedding API error {}: {}", status, text));
                        continue;
                    }

                    let text = response.text().await.unwrap_or_default();
                    bail!("embedding API error {}: {}", status, text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            match self.request_batch(batch).await {
                Ok(vectors) => out.extend(vectors),
                Err(e) if is_dimension_error(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        batch_len = batch.len(),
                        error = %e,
                        "embedding batch failed after retries; storing zero-vectors"
                    );
                    out.extend(std::iter::repeat(vec![0.0; self.dims]).take(batch.len()));
                }
            }
        }

        Ok(out)
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn is_dimension_error(e: &anyhow::Error) -> bool {
    e.to_string().contains("dimension")
}

/// Parse `{data: [{embedding: [...]}, ...]}` and enforce count + dimension.
fn parse_embedding_response(
    json: &serde_json::Value,
    dims: usize,
    expected: usize,
) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embedding response: missing data array"))?;

    if data.len() != expected {
        bail!(
            "invalid embedding response: {} vectors for {} inputs",
            data.len(),
            expected
        );
    }

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid embedding response: missing embedding"))?;

        if embedding.len() != dims {
            bail!(
                "embedding dimension mismatch: got {}, collection expects {}",
                embedding.len(),
                dims
            );
        }

        vectors.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }

    Ok(vectors)
}

/// Embedder used when no embedding API is configured: every text maps to a
/// zero-vector. Dense search over zero-vectors returns zero scores, so the
/// system stays functional (keyword search, crawling, storage) with
/// explicitly degraded recall.
pub struct ZeroEmbedder {
    dims: usize,
}

impl ZeroEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for ZeroEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(vec![vec![0.0; self.dims]; texts.len()])
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Build the embedder the configuration calls for.
pub fn create_embedder(config: &Config) -> Result<std::sync::Arc<dyn Embedder>> {
    if config.embeddings_enabled() {
        Ok(std::sync::Arc::new(HttpEmbedder::new(config)?))
    } else {
        tracing::warn!("EMBEDDING_API_URL not set; dense recall is degraded to zero-vectors");
        Ok(std::sync::Arc::new(ZeroEmbedder::new(config.embedding_dims)))
    }
}

/// Cosine similarity between two vectors, `0.0` for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_response_ok() {
        let json = json!({
            "data": [
                {"embedding": [1.0, 0.0, 0.0]},
                {"embedding": [0.0, 1.0, 0.0]},
            ]
        });
        let vecs = parse_embedding_response(&json, 3, 2).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0], vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_parse_response_dimension_mismatch() {
        let json = json!({"data": [{"embedding": [1.0, 0.0]}]});
        let err = parse_embedding_response(&json, 3, 1).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
        assert!(is_dimension_error(&err));
    }

    #[test]
    fn test_parse_response_count_mismatch() {
        let json = json!({"data": [{"embedding": [1.0, 0.0, 0.0]}]});
        assert!(parse_embedding_response(&json, 3, 2).is_err());
    }

    #[test]
    fn test_parse_response_missing_data() {
        let json = json!({"error": "nope"});
        assert!(parse_embedding_response(&json, 3, 1).is_err());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
