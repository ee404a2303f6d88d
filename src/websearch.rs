//! Metasearch client (SearXNG-compatible) and URL post-processing.
//!
//! `GET {base}/search?q=…&format=json&categories=general&limit=N`. The
//! backend applies bot detection, so the client always sends a browser-like
//! header set; without it the backend answers 403/429 or returns an HTML
//! challenge page instead of JSON. Any non-2xx status or non-JSON body is
//! surfaced as a backend rejection carrying a truncated body snippet for
//! diagnostics — no ingestion is attempted on such a response.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::ToolError;
use crate::fetch::canonical_url;

/// Hosts that never carry ingestable content (tracker/login/share pages).
const DENYLIST: &[&str] = &[
    "accounts.google.com",
    "login.microsoftonline.com",
    "facebook.com",
    "www.facebook.com",
    "twitter.com",
    "x.com",
    "t.co",
    "linkedin.com",
    "www.linkedin.com",
    "pinterest.com",
];

const SNIPPET_LIMIT: usize = 512;

/// One result row from the metasearch backend.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Client for a SearXNG-style metasearch endpoint.
pub struct SearxClient {
    client: reqwest::Client,
    base_url: String,
}

impl SearxClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Run a query and return the raw result rows.
    ///
    /// Bot-detection responses (non-2xx, or HTML where JSON was requested)
    /// are returned as `BackendRejected` with a body snippet.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ToolError> {
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("categories", "general"),
                ("limit", &limit.to_string()),
            ])
            .header(
                "Accept",
                "text/html,application/json;q=0.9,*/*;q=0.8",
            )
            .header(
                "User-Agent",
                "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0",
            )
            .header("Accept-Encoding", "gzip, deflate")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| {
                ToolError::backend_unavailable(format!("search backend unreachable: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ToolError::backend_rejected(format!(
                "search backend returned {}: {}",
                status,
                snippet(&body)
            )));
        }

        let parsed: SearchResponse = serde_json::from_str(&body).map_err(|_| {
            ToolError::backend_rejected(format!(
                "search backend returned non-JSON (bot detection?): {}",
                snippet(&body)
            ))
        })?;

        Ok(parsed.results.into_iter().take(limit).collect())
    }
}

/// Truncate a response body for diagnostics.
fn snippet(body: &str) -> String {
    let mut end = SNIPPET_LIMIT.min(body.len());
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Deduplicate result URLs (canonicalized) and drop denylisted hosts.
pub fn filter_result_urls(results: &[SearchResult], cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for r in results {
        let url = canonical_url(&r.url);
        let Some(host) = crate::models::source_id_of(&url) else {
            continue;
        };
        if DENYLIST.contains(&host.as_str()) {
            continue;
        }
        if seen.insert(url.clone()) {
            urls.push(url);
        }
        if urls.len() >= cap {
            break;
        }
    }

    urls
}

/// Parse a metasearch JSON body in isolation (used by tests and retries).
pub fn parse_results(body: &str) -> Result<Vec<SearchResult>> {
    let parsed: SearchResponse =
        serde_json::from_str(body).context("metasearch response was not valid JSON")?;
    Ok(parsed.results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str) -> SearchResult {
        SearchResult {
            url: url.to_string(),
            title: None,
            content: None,
        }
    }

    #[test]
    fn test_filter_dedupes_and_caps() {
        let results = vec![
            result("https://example.test/a"),
            result("https://example.test/a#section"),
            result("https://example.test/b"),
            result("https://example.test/c"),
        ];
        let urls = filter_result_urls(&results, 2);
        assert_eq!(urls, vec!["https://example.test/a", "https://example.test/b"]);
    }

    #[test]
    fn test_filter_drops_denylisted_hosts() {
        let results = vec![
            result("https://twitter.com/somebody/status/1"),
            result("https://docs.example.test/guide"),
        ];
        let urls = filter_result_urls(&results, 10);
        assert_eq!(urls, vec!["https://docs.example.test/guide"]);
    }

    #[test]
    fn test_parse_results_ok() {
        let body = r#"{"results":[{"url":"https://a.test/x","title":"A"},{"url":"https://b.test/y"}]}"#;
        let results = parse_results(body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title.as_deref(), Some("A"));
    }

    #[test]
    fn test_parse_results_html_rejected() {
        assert!(parse_results("<html>Access denied</html>").is_err());
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "x".repeat(2000);
        assert_eq!(snippet(&long).len(), SNIPPET_LIMIT);
        assert_eq!(snippet("short"), "short");
    }
}
