//! Crawler driver: strategy dispatch and bounded-concurrency fetching.
//!
//! Input URLs are classified into one of three strategies:
//!
//! | Strategy | Trigger | Behavior |
//! |----------|---------|----------|
//! | text file | `.txt` suffix or `/llms.txt` | fetch raw, one document |
//! | sitemap | `sitemap*.xml` URL or XML body with `<urlset>`/`<sitemapindex>` | parse `<loc>` entries, crawl as a batch |
//! | page | everything else | single page, or recursive walk of internal links up to `max_depth` |
//!
//! Concurrency discipline: a process-wide semaphore caps parallel fetches at
//! `max_concurrent`; a per-host gate allows one in-flight request per host;
//! every fetch carries the browser's request timeout. Work beyond
//! `max_concurrent × 2` stays in the backlog rather than being enqueued.
//!
//! A single URL failure is isolated: it becomes an error entry in the batch
//! result and never aborts the rest of the batch.

use futures::stream::{FuturesUnordered, StreamExt};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

use crate::error::UrlFailure;
use crate::fetch::{canonical_url, same_site, CrawledPage, PageBrowser};

/// How an input URL will be crawled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStrategy {
    TextFile,
    Sitemap,
    Page,
}

/// Classify a URL before fetching it.
pub fn detect_strategy(url: &str) -> CrawlStrategy {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    if path.ends_with(".txt") {
        CrawlStrategy::TextFile
    } else if path.ends_with("sitemap.xml")
        || (path.contains("sitemap") && path.ends_with(".xml"))
    {
        CrawlStrategy::Sitemap
    } else {
        CrawlStrategy::Page
    }
}

/// One successfully crawled document.
#[derive(Debug, Clone)]
pub struct CrawledDoc {
    pub url: String,
    pub markdown: String,
}

/// Outcome of a crawl: documents in no particular order plus isolated
/// per-URL failures.
#[derive(Debug, Default)]
pub struct CrawlOutput {
    pub pages: Vec<CrawledDoc>,
    pub failures: Vec<UrlFailure>,
}

/// Crawler over a shared [`PageBrowser`], holding the process-wide
/// concurrency semaphore and per-host gates.
pub struct Crawler {
    browser: Arc<dyn PageBrowser>,
    semaphore: Arc<Semaphore>,
    host_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    max_concurrent: usize,
}

impl Crawler {
    pub fn new(browser: Arc<dyn PageBrowser>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            browser,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            host_gates: Mutex::new(HashMap::new()),
            max_concurrent,
        }
    }

    /// Fetch one URL under the global semaphore and its host gate.
    async fn fetch_gated(&self, url: &str) -> anyhow::Result<CrawledPage> {
        let _global = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("crawler shutting down"))?;

        let host = crate::models::source_id_of(url).unwrap_or_else(|| "unknown".to_string());
        let gate = {
            let mut gates = self.host_gates.lock().await;
            gates
                .entry(host)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        let _host = gate
            .acquire_owned()
            .await
            .map_err(|_| anyhow::anyhow!("crawler shutting down"))?;

        self.browser.crawl(url).await
    }

    /// Crawl a single URL, dispatching on its strategy.
    ///
    /// `max_depth = 0` disables link following; text files and sitemaps
    /// ignore the depth entirely. A page whose response turns out to be an
    /// XML sitemap (regardless of its URL shape) is expanded like one.
    pub async fn crawl(&self, url: &str, max_depth: usize) -> CrawlOutput {
        match detect_strategy(url) {
            CrawlStrategy::TextFile => self.crawl_text(url).await,
            CrawlStrategy::Sitemap => self.crawl_sitemap(url).await,
            CrawlStrategy::Page => {
                let first = match self.fetch_gated(url).await {
                    Ok(page) => page,
                    Err(e) => {
                        return CrawlOutput {
                            pages: Vec::new(),
                            failures: vec![UrlFailure {
                                url: url.to_string(),
                                error: e.to_string(),
                            }],
                        }
                    }
                };

                if first.content_type.contains("xml") {
                    let locs = parse_sitemap_locs(&first.markdown);
                    if !locs.is_empty() {
                        tracing::info!(sitemap = url, urls = locs.len(), "expanding sitemap");
                        return self.crawl_batch(&locs).await;
                    }
                }

                self.walk_from(url, first, max_depth).await
            }
        }
    }

    /// Fetch a raw text document as a single page.
    async fn crawl_text(&self, url: &str) -> CrawlOutput {
        let mut out = CrawlOutput::default();
        match self.fetch_gated(url).await {
            Ok(page) => out.pages.push(CrawledDoc {
                url: page.url,
                markdown: page.markdown,
            }),
            Err(e) => out.failures.push(UrlFailure {
                url: url.to_string(),
                error: e.to_string(),
            }),
        }
        out
    }

    /// Fetch a sitemap, then crawl each `<loc>` entry as a batch.
    async fn crawl_sitemap(&self, url: &str) -> CrawlOutput {
        let body = match self.fetch_gated(url).await {
            Ok(page) => page.markdown,
            Err(e) => {
                return CrawlOutput {
                    pages: Vec::new(),
                    failures: vec![UrlFailure {
                        url: url.to_string(),
                        error: e.to_string(),
                    }],
                }
            }
        };

        let locs = parse_sitemap_locs(&body);
        if locs.is_empty() {
            return CrawlOutput {
                pages: Vec::new(),
                failures: vec![UrlFailure {
                    url: url.to_string(),
                    error: "sitemap contained no <loc> entries".to_string(),
                }],
            };
        }

        tracing::info!(sitemap = url, urls = locs.len(), "expanding sitemap");
        self.crawl_batch(&locs).await
    }

    /// Crawl a set of URLs in parallel. Duplicates (after canonicalization)
    /// are fetched once.
    pub async fn crawl_batch(&self, urls: &[String]) -> CrawlOutput {
        let mut seen = HashSet::new();
        let unique: Vec<String> = urls
            .iter()
            .map(|u| canonical_url(u))
            .filter(|u| seen.insert(u.clone()))
            .collect();

        let mut futures: FuturesUnordered<_> = unique
            .iter()
            .map(|u| async move {
                let result = self.fetch_gated(u).await;
                (u.clone(), result)
            })
            .collect();

        let mut out = CrawlOutput::default();
        while let Some((url, result)) = futures.next().await {
            match result {
                Ok(page) => {
                    // A batch entry that turns out to be XML is not a page.
                    if page.content_type.contains("xml") {
                        out.failures.push(UrlFailure {
                            url,
                            error: "expected a page, got an XML document".to_string(),
                        });
                    } else {
                        out.pages.push(CrawledDoc {
                            url: page.url,
                            markdown: page.markdown,
                        });
                    }
                }
                Err(e) => out.failures.push(UrlFailure {
                    url,
                    error: e.to_string(),
                }),
            }
        }
        out
    }

    /// Recursive walk of internal links up to `max_depth`.
    pub async fn crawl_recursive(&self, start: &str, max_depth: usize) -> CrawlOutput {
        let first = match self.fetch_gated(start).await {
            Ok(page) => page,
            Err(e) => {
                return CrawlOutput {
                    pages: Vec::new(),
                    failures: vec![UrlFailure {
                        url: start.to_string(),
                        error: e.to_string(),
                    }],
                }
            }
        };
        self.walk_from(start, first, max_depth).await
    }

    /// Walk internal links starting from an already-fetched page.
    ///
    /// `(url, depth)` jobs are drawn from a backlog; at most `max_concurrent`
    /// fetches are in flight and at most `max_concurrent × 2` jobs are
    /// promoted out of the backlog at a time. The visited set is keyed on
    /// canonical URLs, so revisits within one walk are suppressed.
    async fn walk_from(&self, start: &str, first: CrawledPage, max_depth: usize) -> CrawlOutput {
        let start_url = canonical_url(start);
        let mut visited: HashSet<String> = HashSet::new();
        let mut backlog: VecDeque<(String, usize)> = VecDeque::new();
        let mut out = CrawlOutput::default();

        visited.insert(start_url.clone());
        visited.insert(canonical_url(&first.url));

        if max_depth > 0 {
            for link in &first.links {
                if same_site(&start_url, link) && visited.insert(link.clone()) {
                    backlog.push_back((link.clone(), 1));
                }
            }
        }
        if !first.markdown.trim().is_empty() {
            out.pages.push(CrawledDoc {
                url: first.url,
                markdown: first.markdown,
            });
        }

        let pending_cap = self.max_concurrent * 2;
        let mut in_flight: FuturesUnordered<_> = FuturesUnordered::new();
        let mut pending = 0usize;

        loop {
            while pending < pending_cap {
                let Some((url, depth)) = backlog.pop_front() else {
                    break;
                };
                pending += 1;
                in_flight.push(async move {
                    let result = self.fetch_gated(&url).await;
                    (url, depth, result)
                });
            }

            let Some((url, depth, result)) = in_flight.next().await else {
                break;
            };
            pending -= 1;

            match result {
                Ok(page) => {
                    if depth < max_depth {
                        for link in &page.links {
                            if same_site(&start_url, link) && visited.insert(link.clone()) {
                                backlog.push_back((link.clone(), depth + 1));
                            }
                        }
                    }
                    if !page.markdown.trim().is_empty() {
                        out.pages.push(CrawledDoc {
                            url: page.url,
                            markdown: page.markdown,
                        });
                    }
                }
                Err(e) => out.failures.push(UrlFailure {
                    url,
                    error: e.to_string(),
                }),
            }
        }

        out
    }
}

/// Extract `<loc>` entries from sitemap XML (urlset or sitemapindex).
pub fn parse_sitemap_locs(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut in_loc = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"loc" => in_loc = true,
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Text(e)) if in_loc => {
                if let Ok(text) = e.unescape() {
                    let url = text.trim().to_string();
                    if !url.is_empty() {
                        locs.push(url);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    locs
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_detect_strategy() {
        assert_eq!(
            detect_strategy("https://example.test/llms.txt"),
            CrawlStrategy::TextFile
        );
        assert_eq!(
            detect_strategy("https://example.test/notes.txt?v=2"),
            CrawlStrategy::TextFile
        );
        assert_eq!(
            detect_strategy("https://example.test/sitemap.xml"),
            CrawlStrategy::Sitemap
        );
        assert_eq!(
            detect_strategy("https://example.test/sitemap-posts.xml"),
            CrawlStrategy::Sitemap
        );
        assert_eq!(
            detect_strategy("https://example.test/docs"),
            CrawlStrategy::Page
        );
    }

    #[test]
    fn test_parse_sitemap_locs() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>https://example.test/a</loc></url>
              <url><loc>https://example.test/b</loc></url>
              <url><loc> https://example.test/c </loc></url>
            </urlset>"#;
        let locs = parse_sitemap_locs(xml);
        assert_eq!(
            locs,
            vec![
                "https://example.test/a",
                "https://example.test/b",
                "https://example.test/c"
            ]
        );
    }

    #[test]
    fn test_parse_sitemap_not_xml() {
        assert!(parse_sitemap_locs("<html><body>bot check</body></html>").is_empty());
    }

    /// Serves canned pages; counts fetches per URL.
    struct FakeBrowser {
        pages: HashMap<String, CrawledPage>,
        fetches: AtomicUsize,
    }

    impl FakeBrowser {
        fn new(pages: Vec<CrawledPage>) -> Self {
            Self {
                pages: pages.into_iter().map(|p| (p.url.clone(), p)).collect(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageBrowser for FakeBrowser {
        async fn crawl(&self, url: &str) -> Result<CrawledPage> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(&canonical_url(url))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("HTTP 404 fetching {}", url))
        }
    }

    fn page(url: &str, markdown: &str, links: &[&str]) -> CrawledPage {
        CrawledPage {
            url: url.to_string(),
            content_type: "text/html".to_string(),
            markdown: markdown.to_string(),
            links: links.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let browser = Arc::new(FakeBrowser::new(vec![page(
            "https://example.test/a",
            "# A",
            &[],
        )]));
        let crawler = Crawler::new(browser, 4);
        let out = crawler
            .crawl_batch(&[
                "https://example.test/a".to_string(),
                "https://example.test/missing".to_string(),
            ])
            .await;
        assert_eq!(out.pages.len(), 1);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].url, "https://example.test/missing");
    }

    #[tokio::test]
    async fn test_batch_dedupes_urls() {
        let browser = Arc::new(FakeBrowser::new(vec![page(
            "https://example.test/a",
            "# A",
            &[],
        )]));
        let crawler = Crawler::new(browser.clone(), 4);
        let out = crawler
            .crawl_batch(&[
                "https://example.test/a".to_string(),
                "https://example.test/a/".to_string(),
                "https://example.test/a#frag".to_string(),
            ])
            .await;
        assert_eq!(out.pages.len(), 1);
        assert_eq!(browser.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recursive_follows_internal_links_only() {
        let browser = Arc::new(FakeBrowser::new(vec![
            page(
                "https://example.test/a",
                "# A",
                &["https://example.test/b", "https://other.test/x"],
            ),
            page("https://example.test/b", "# B", &["https://example.test/a"]),
            page("https://other.test/x", "# X", &[]),
        ]));
        let crawler = Crawler::new(browser.clone(), 4);
        let out = crawler.crawl_recursive("https://example.test/a", 3).await;
        let mut urls: Vec<_> = out.pages.iter().map(|p| p.url.as_str()).collect();
        urls.sort();
        assert_eq!(urls, vec!["https://example.test/a", "https://example.test/b"]);
        // The cycle back to /a is suppressed by the visited set.
        assert_eq!(browser.fetches.load(Ordering::SeqCst), 2);
        assert!(out.failures.is_empty());
    }

    #[tokio::test]
    async fn test_recursive_respects_depth() {
        let browser = Arc::new(FakeBrowser::new(vec![
            page("https://example.test/0", "# 0", &["https://example.test/1"]),
            page("https://example.test/1", "# 1", &["https://example.test/2"]),
            page("https://example.test/2", "# 2", &["https://example.test/3"]),
            page("https://example.test/3", "# 3", &[]),
        ]));
        let crawler = Crawler::new(browser, 4);
        let out = crawler.crawl_recursive("https://example.test/0", 1).await;
        let mut urls: Vec<_> = out.pages.iter().map(|p| p.url.as_str()).collect();
        urls.sort();
        assert_eq!(urls, vec!["https://example.test/0", "https://example.test/1"]);
    }

    #[tokio::test]
    async fn test_text_strategy_single_doc() {
        let mut p = page("https://example.test/llms.txt", "plain text body", &[]);
        p.content_type = "text/plain".to_string();
        let browser = Arc::new(FakeBrowser::new(vec![p]));
        let crawler = Crawler::new(browser, 4);
        let out = crawler.crawl("https://example.test/llms.txt", 3).await;
        assert_eq!(out.pages.len(), 1);
        assert_eq!(out.pages[0].markdown, "plain text body");
    }
}
