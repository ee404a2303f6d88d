//! Cross-encoder reranking.
//!
//! The reranker is an external local model behind a narrow interface:
//! `(query, documents[]) → scores[]`. The HTTP implementation talks to a
//! sidecar exposing `POST {base}/rerank`; scoring failures degrade to a
//! no-op (candidates keep their original order) with a single warning,
//! because reranking is an optional quality layer, not a correctness one.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each document against the query. Returns one score per
    /// document, in input order; higher is more relevant.
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

/// Client for a cross-encoder sidecar: `POST /rerank {query, documents}`
/// returning `{scores: [f32]}`.
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReranker {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "query": query,
            "documents": documents,
        });

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("reranker error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        let scores: Vec<f32> = json
            .get("scores")
            .and_then(|s| s.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid reranker response: missing scores"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if scores.len() != documents.len() {
            bail!(
                "reranker returned {} scores for {} documents",
                scores.len(),
                documents.len()
            );
        }

        Ok(scores)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Scores documents by shared-word overlap with the query. Deterministic.
    pub struct WordOverlapReranker;

    #[async_trait]
    impl Reranker for WordOverlapReranker {
        async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
            let query_words: Vec<String> = query
                .to_lowercase()
                .split_whitespace()
                .map(|w| w.to_string())
                .collect();
            Ok(documents
                .iter()
                .map(|d| {
                    let lower = d.to_lowercase();
                    query_words.iter().filter(|w| lower.contains(*w)).count() as f32
                })
                .collect())
        }
    }
}
