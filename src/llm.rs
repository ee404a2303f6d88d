//! Summarizer client for contextual embeddings, code-example summaries, and
//! source descriptions.
//!
//! Talks to an OpenAI-style chat-completions endpoint. When no endpoint is
//! configured every call degrades to a deterministic heuristic (a trimmed
//! head of the input), so ingestion never depends on an LLM being reachable.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::Config;

/// Maximum characters of source material fed into a summary prompt.
const SUMMARY_INPUT_CAP: usize = 20_000;

pub struct LlmClient {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    model: String,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config
                .llm_api_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// One chat completion; errors if no endpoint is configured.
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let Some(ref base) = self.base_url else {
            bail!("LLM endpoint not configured");
        };

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.2,
        });

        let mut req = self
            .client
            .post(format!("{}/chat/completions", base))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("LLM API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("invalid LLM response: missing message content"))
    }

    /// Short context line situating a chunk within its full document,
    /// prepended to the chunk before embedding.
    pub async fn chunk_context(&self, full_document: &str, chunk: &str) -> Result<String> {
        if !self.is_enabled() {
            return Ok(heuristic_context(chunk));
        }
        let doc_head = head(full_document, SUMMARY_INPUT_CAP);
        let user = format!(
            "<document>\n{}\n</document>\n\nHere is the chunk to situate:\n<chunk>\n{}\n</chunk>\n\n\
             Give a short succinct context to situate this chunk within the overall document \
             for the purposes of improving search retrieval. Answer only with the context.",
            doc_head,
            head(chunk, 4_000)
        );
        self.complete(
            "You situate document chunks for retrieval. Reply with one or two sentences.",
            &user,
        )
        .await
        .or_else(|e| {
            tracing::warn!(error = %e, "chunk contextualization failed; using heuristic");
            Ok(heuristic_context(chunk))
        })
    }

    /// One-paragraph summary of a code example given its surrounding prose.
    pub async fn code_summary(&self, code: &str, surrounding: &str) -> Result<String> {
        if !self.is_enabled() {
            return Ok(heuristic_context(code));
        }
        let user = format!(
            "<context>\n{}\n</context>\n\n<code>\n{}\n</code>\n\n\
             Summarize in one paragraph what this code example demonstrates.",
            head(surrounding, 2_000),
            head(code, 8_000)
        );
        self.complete("You summarize code examples for a search index.", &user)
            .await
            .or_else(|e| {
                tracing::warn!(error = %e, "code summary failed; using heuristic");
                Ok(heuristic_context(code))
            })
    }

    /// Summary of a source from the head of its aggregated content.
    pub async fn source_summary(&self, source_id: &str, aggregated: &str) -> Result<String> {
        if !self.is_enabled() {
            return Ok(heuristic_source_summary(source_id, aggregated));
        }
        let user = format!(
            "Source: {}\n\n<content>\n{}\n</content>\n\n\
             Describe this documentation source in 2-3 sentences.",
            source_id,
            head(aggregated, SUMMARY_INPUT_CAP)
        );
        self.complete("You write short library/source descriptions.", &user)
            .await
            .or_else(|e| {
                tracing::warn!(error = %e, "source summary failed; using heuristic");
                Ok(heuristic_source_summary(source_id, aggregated))
            })
    }
}

fn head(text: &str, cap: usize) -> &str {
    let mut end = cap.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn heuristic_context(text: &str) -> String {
    head(text.trim(), 160).replace('\n', " ")
}

fn heuristic_source_summary(source_id: &str, aggregated: &str) -> String {
    let lead = heuristic_context(aggregated);
    if lead.is_empty() {
        format!("Content from {}", source_id)
    } else {
        format!("Content from {}: {}", source_id, lead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_client() -> LlmClient {
        LlmClient {
            client: reqwest::Client::new(),
            base_url: None,
            api_key: None,
            model: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_disabled_chunk_context_is_heuristic() {
        let client = disabled_client();
        let ctx = client
            .chunk_context("full document", "A chunk\nwith lines")
            .await
            .unwrap();
        assert_eq!(ctx, "A chunk with lines");
    }

    #[tokio::test]
    async fn test_disabled_source_summary_names_source() {
        let client = disabled_client();
        let s = client.source_summary("docs.example.test", "Intro.").await.unwrap();
        assert!(s.contains("docs.example.test"));
        assert!(s.contains("Intro."));
    }

    #[test]
    fn test_head_respects_char_boundaries() {
        let text = "héllo wörld";
        // Cutting mid-codepoint must back off to a boundary.
        let h = head(text, 2);
        assert!(text.starts_with(h));
    }
}
