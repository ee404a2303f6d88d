//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow: crawl → chunk → (optional contextual prefix) →
//! embed → store, plus the code-example side channel and the source registry
//! update. Per-URL failures are isolated into the report; the batch as a
//! whole never aborts.
//!
//! Replacement semantics: before a URL's chunks are written, every previously
//! stored chunk for that URL is deleted, so re-ingestion leaves no orphans
//! and `chunk_index` stays dense from 0.

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::chunker::{extract_code_blocks, smart_chunk};
use crate::config::Config;
use crate::crawler::{CrawlOutput, CrawledDoc, Crawler};
use crate::embedding::Embedder;
use crate::llm::LlmClient;
use crate::models::{source_id_of, CodeExample, DocumentChunk, PageResult};
use crate::store::VectorStore;

/// Per-call switches for the pipeline.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Follow internal links up to this depth (0 = the page itself only).
    pub max_depth: usize,
    /// Include each page's markdown in the report.
    pub return_raw_markdown: bool,
    /// Extract and store code examples.
    pub extract_code_examples: bool,
    /// Prepend a model-generated context line to each chunk before embedding.
    pub enable_contextual_embeddings: bool,
    /// Override the configured chunk size.
    pub chunk_size: Option<usize>,
    /// Override the configured store write batch size.
    pub upsert_batch: Option<usize>,
}

/// Aggregate outcome of one ingestion call.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub results: Vec<PageResult>,
    pub urls_processed: usize,
    pub chunks_written: usize,
    pub code_examples_written: usize,
    pub elapsed_ms: u64,
    /// Present when `return_raw_markdown` was requested.
    pub markdown_by_url: Option<BTreeMap<String, String>>,
}

/// Per-page result internal to the pipeline: counts plus the first
/// store-write error, if any batch failed.
#[derive(Debug, Default)]
struct PageOutcome {
    chunks_written: usize,
    code_examples_written: usize,
    error: Option<String>,
}

/// The ingestion pipeline over shared single-flight handles.
pub struct IngestPipeline {
    crawler: Arc<Crawler>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<LlmClient>,
    config: Arc<Config>,
}

impl IngestPipeline {
    pub fn new(
        crawler: Arc<Crawler>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<LlmClient>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            crawler,
            store,
            embedder,
            llm,
            config,
        }
    }

    /// Ingest a flat list of URLs (batch mode).
    pub async fn ingest_urls(&self, urls: &[String], opts: &IngestOptions) -> IngestReport {
        let crawl = self.crawler.crawl_batch(urls).await;
        self.ingest_crawl_output(crawl, opts).await
    }

    /// Ingest one URL with strategy dispatch (txt / sitemap / recursive).
    pub async fn smart_ingest(&self, url: &str, opts: &IngestOptions) -> IngestReport {
        let crawl = self.crawler.crawl(url, opts.max_depth).await;
        self.ingest_crawl_output(crawl, opts).await
    }

    async fn ingest_crawl_output(&self, crawl: CrawlOutput, opts: &IngestOptions) -> IngestReport {
        let started = Instant::now();
        let mut report = IngestReport {
            urls_processed: crawl.pages.len() + crawl.failures.len(),
            ..Default::default()
        };

        for failure in &crawl.failures {
            report
                .results
                .push(PageResult::failed(&failure.url, &failure.error));
        }

        let mut markdown_by_url = opts.return_raw_markdown.then(BTreeMap::new);
        // Aggregated page text per source, for summary regeneration.
        let mut source_content: HashMap<String, String> = HashMap::new();

        for page in &crawl.pages {
            if let Some(ref mut map) = markdown_by_url {
                map.insert(page.url.clone(), page.markdown.clone());
            }

            match self.ingest_page(page, opts).await {
                Ok(outcome) => {
                    report.chunks_written += outcome.chunks_written;
                    report.code_examples_written += outcome.code_examples_written;

                    match outcome.error {
                        None => {
                            report.results.push(PageResult::ok(
                                &page.url,
                                outcome.chunks_written,
                                outcome.code_examples_written,
                            ));
                            if let Some(source_id) = source_id_of(&page.url) {
                                let agg = source_content.entry(source_id).or_default();
                                if agg.len() < 20_000 {
                                    agg.push_str(&page.markdown);
                                    agg.push('\n');
                                }
                            }
                        }
                        Some(error) => {
                            // Some batches landed; report the failure with
                            // the partial counts.
                            tracing::warn!(url = %page.url, error, "partial page ingestion");
                            let mut result = PageResult::failed(&page.url, error);
                            result.chunks_written = Some(outcome.chunks_written);
                            result.code_examples_written = Some(outcome.code_examples_written);
                            report.results.push(result);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %page.url, error = %e, "page ingestion failed");
                    report.results.push(PageResult::failed(&page.url, e.to_string()));
                }
            }
        }

        for (source_id, aggregated) in source_content {
            if let Err(e) = self.update_source(&source_id, &aggregated).await {
                tracing::warn!(source_id, error = %e, "source registry update failed");
            }
        }

        report.markdown_by_url = markdown_by_url;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report
    }

    /// Ingest one crawled page.
    ///
    /// A store-write failure aborts only the batch it happened in; the
    /// remaining batches still run and the outcome carries both the partial
    /// count and the error.
    async fn ingest_page(
        &self,
        page: &CrawledDoc,
        opts: &IngestOptions,
    ) -> anyhow::Result<PageOutcome> {
        let source_id = source_id_of(&page.url)
            .ok_or_else(|| anyhow::anyhow!("URL has no host: {}", page.url))?;

        let chunk_size = opts.chunk_size.unwrap_or(self.config.chunk_size);
        let pieces = smart_chunk(&page.markdown, chunk_size, self.config.chunk_overlap);

        // Replacement invariant: clear previous chunks for this URL first.
        self.store.delete_chunks_by_url(&page.url).await?;

        if pieces.is_empty() {
            return Ok(PageOutcome::default());
        }

        let contextualize = opts.enable_contextual_embeddings && self.llm.is_enabled();
        let contents: Vec<String> = if contextualize {
            self.contextualize_chunks(&page.markdown, pieces.iter().map(|p| p.content.as_str()))
                .await
        } else {
            pieces.iter().map(|p| p.content.clone()).collect()
        };

        let embeddings = self.embedder.embed_batch(&contents).await?;

        let crawl_time = Utc::now().to_rfc3339();
        let chunks: Vec<DocumentChunk> = pieces
            .iter()
            .zip(contents.iter().zip(embeddings))
            .enumerate()
            .map(|(index, (piece, (content, embedding)))| {
                let mut metadata = Map::new();
                metadata.insert("source_id".into(), source_id.clone().into());
                metadata.insert("chunk_size".into(), content.len().into());
                metadata.insert("word_count".into(), piece.word_count.into());
                if !piece.header_path.is_empty() {
                    metadata.insert("headers".into(), piece.header_path.clone().into());
                }
                metadata.insert("crawl_time".into(), crawl_time.clone().into());
                if contextualize {
                    metadata.insert("contextual_embedding".into(), Value::Bool(true));
                }

                DocumentChunk {
                    id: crate::models::point_id(&DocumentChunk::natural_key(
                        &source_id, &page.url, index,
                    ))
                    .to_string(),
                    url: page.url.clone(),
                    chunk_index: index,
                    content: content.clone(),
                    embedding,
                    metadata,
                    source_id: source_id.clone(),
                }
            })
            .collect();

        let batch_size = opts.upsert_batch.unwrap_or(self.config.upsert_batch_size).max(1);
        let mut outcome = PageOutcome::default();
        for batch in chunks.chunks(batch_size) {
            match self.store.upsert_chunks(batch).await {
                Ok(()) => outcome.chunks_written += batch.len(),
                Err(e) => outcome.error = Some(e.to_string()),
            }
        }

        if opts.extract_code_examples {
            match self.ingest_code_examples(page, &source_id, batch_size).await {
                Ok(written) => outcome.code_examples_written = written,
                Err(e) => {
                    if outcome.error.is_none() {
                        outcome.error = Some(e.to_string());
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Generate context lines for chunks under the contextual semaphore,
    /// preserving input order.
    async fn contextualize_chunks<'a>(
        &self,
        full_document: &str,
        chunks: impl Iterator<Item = &'a str>,
    ) -> Vec<String> {
        let semaphore = Arc::new(Semaphore::new(self.config.contextual_concurrency.max(1)));
        let futures: Vec<_> = chunks
            .map(|chunk| {
                let semaphore = semaphore.clone();
                let chunk = chunk.to_string();
                async move {
                    let _permit = semaphore.acquire().await;
                    match self.llm.chunk_context(full_document, &chunk).await {
                        Ok(context) if !context.is_empty() => {
                            format!("{}\n\n{}", context, chunk)
                        }
                        _ => chunk,
                    }
                }
            })
            .collect();

        futures::future::join_all(futures).await
    }

    /// Extract, summarize, embed, and store code examples for a page.
    async fn ingest_code_examples(
        &self,
        page: &CrawledDoc,
        source_id: &str,
        batch_size: usize,
    ) -> anyhow::Result<usize> {
        let blocks = extract_code_blocks(
            &page.markdown,
            self.config.min_code_block_chars,
            self.config.code_context_chars,
        );

        self.store.delete_code_examples_by_url(&page.url).await?;

        if blocks.is_empty() {
            return Ok(0);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.contextual_concurrency.max(1)));
        let summaries: Vec<String> = futures::future::join_all(blocks.iter().map(|b| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await;
                let surrounding = format!("{}\n{}", b.context_before, b.context_after);
                self.llm
                    .code_summary(&b.code, &surrounding)
                    .await
                    .unwrap_or_default()
            }
        }))
        .await;

        // Embed the summary together with the code for better recall.
        let embed_inputs: Vec<String> = blocks
            .iter()
            .zip(&summaries)
            .map(|(b, s)| format!("{}\n\n{}", s, b.code))
            .collect();
        let embeddings = self.embedder.embed_batch(&embed_inputs).await?;

        let examples: Vec<CodeExample> = blocks
            .iter()
            .zip(summaries.iter().zip(embeddings))
            .enumerate()
            .map(|(index, (block, (summary, embedding)))| {
                let mut metadata = Map::new();
                metadata.insert("source_id".into(), source_id.to_string().into());
                metadata.insert("chunk_size".into(), block.code.len().into());
                metadata.insert(
                    "word_count".into(),
                    block.code.split_whitespace().count().into(),
                );

                CodeExample {
                    id: crate::models::point_id(&format!(
                        "{}|{}|code:{}",
                        source_id, page.url, index
                    ))
                    .to_string(),
                    url: page.url.clone(),
                    code_index: index,
                    code: block.code.clone(),
                    language: block.language.clone(),
                    summary: summary.clone(),
                    surrounding_context: format!(
                        "{}\n{}",
                        block.context_before, block.context_after
                    ),
                    embedding,
                    metadata,
                    source_id: source_id.to_string(),
                }
            })
            .collect();

        for batch in examples.chunks(batch_size) {
            self.store.upsert_code_examples(batch).await?;
        }

        Ok(examples.len())
    }

    /// Regenerate the source record: summary from this ingest's aggregated
    /// content, `total_words` summed over everything stored for the source.
    async fn update_source(&self, source_id: &str, aggregated: &str) -> anyhow::Result<()> {
        let summary = self.llm.source_summary(source_id, aggregated).await?;
        let total_words = self.store.total_words(source_id).await?;
        self.store
            .upsert_source(source_id, &summary, total_words)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::Crawler;
    use crate::fetch::{CrawledPage, PageBrowser};
    use crate::store::memory::MemoryStore;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Deterministic embedder: hashes words into a small vector.
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

    struct StaticBrowser {
        pages: std::collections::HashMap<String, CrawledPage>,
    }

    #[async_trait]
    impl PageBrowser for StaticBrowser {
        async fn crawl(&self, url: &str) -> Result<CrawledPage> {
            self.pages
                .get(&crate::fetch::canonical_url(url))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("HTTP 404 fetching {}", url))
        }
    }

    fn pipeline_with(
        pages: Vec<(&str, &str)>,
    ) -> (IngestPipeline, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(8));
        let browser = Arc::new(StaticBrowser {
            pages: pages
                .into_iter()
                .map(|(url, md)| {
                    (
                        url.to_string(),
                        CrawledPage {
                            url: url.to_string(),
                            content_type: "text/html".to_string(),
                            markdown: md.to_string(),
                            links: Vec::new(),
                        },
                    )
                })
                .collect(),
        });
        let crawler = Arc::new(Crawler::new(browser, 4));
        let mut config = Config::from_env().unwrap();
        config.embedding_dims = 8;
        let config = Arc::new(config);
        let llm = Arc::new(LlmClient::new(&config).unwrap());
        let pipeline = IngestPipeline::new(
            crawler,
            store.clone(),
            Arc::new(HashEmbedder { dims: 8 }),
            llm,
            config,
        );
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_ingest_single_page() {
        let (pipeline, store) =
            pipeline_with(vec![("https://example.test/a", "# Title\n\nHello world.")]);

        let report = pipeline
            .ingest_urls(&["https://example.test/a".to_string()], &IngestOptions::default())
            .await;

        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].ok);
        assert_eq!(report.results[0].chunks_written, Some(1));
        assert_eq!(report.chunks_written, 1);

        let sources = store.get_sources().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_id, "example.test");
        assert!(sources[0].total_words > 0);
    }

    #[tokio::test]
    async fn test_ingest_isolates_bad_urls() {
        let (pipeline, _store) =
            pipeline_with(vec![("https://example.test/a", "# A\n\nContent here.")]);

        let report = pipeline
            .ingest_urls(
                &[
                    "https://example.test/a".to_string(),
                    "https://example.test/missing".to_string(),
                ],
                &IngestOptions::default(),
            )
            .await;

        assert_eq!(report.results.len(), 2);
        let ok_count = report.results.iter().filter(|r| r.ok).count();
        assert_eq!(ok_count, 1);
        let failed: Vec<_> = report.results.iter().filter(|r| !r.ok).collect();
        assert_eq!(failed[0].url, "https://example.test/missing");
        assert!(failed[0].error.is_some());
    }

    #[tokio::test]
    async fn test_reingest_same_chunk_count() {
        let markdown = format!("# Doc\n\n{}", "Some sentence here. ".repeat(400));
        let (pipeline, store) = pipeline_with(vec![("https://example.test/a", &markdown)]);
        let urls = vec!["https://example.test/a".to_string()];

        let first = pipeline.ingest_urls(&urls, &IngestOptions::default()).await;
        let second = pipeline.ingest_urls(&urls, &IngestOptions::default()).await;
        assert_eq!(first.chunks_written, second.chunks_written);

        // Contiguous indices from 0 after re-ingest, no orphans.
        let mut hits = store.search_chunks(&[1.0; 8], 100, None).await.unwrap();
        hits.sort_by_key(|h| h.chunk_index);
        let indices: Vec<usize> = hits.iter().map(|h| h.chunk_index).collect();
        let expected: Vec<usize> = (0..hits.len()).collect();
        assert_eq!(indices, expected);
        assert_eq!(hits.len(), first.chunks_written);
    }

    #[tokio::test]
    async fn test_raw_markdown_included() {
        let (pipeline, _store) =
            pipeline_with(vec![("https://example.test/a", "# A\n\nBody.")]);

        let opts = IngestOptions {
            return_raw_markdown: true,
            ..Default::default()
        };
        let report = pipeline
            .ingest_urls(&["https://example.test/a".to_string()], &opts)
            .await;

        let map = report.markdown_by_url.unwrap();
        assert_eq!(map.get("https://example.test/a").unwrap(), "# A\n\nBody.");
    }

    #[tokio::test]
    async fn test_code_examples_extracted() {
        let code = "def greet(name):\n    return f'hello {name}'\n".repeat(10);
        let markdown = format!(
            "# API\n\nUsage example below.\n\n```python\n{}```\n\nThat was the example.",
            code
        );
        let (pipeline, store) = pipeline_with(vec![("https://example.test/api", &markdown)]);

        let opts = IngestOptions {
            extract_code_examples: true,
            ..Default::default()
        };
        let report = pipeline
            .ingest_urls(&["https://example.test/api".to_string()], &opts)
            .await;

        assert_eq!(report.code_examples_written, 1);
        let hits = store
            .keyword_search_code_examples("greet", 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.get("source_id").unwrap(), "example.test");
    }

    #[tokio::test]
    async fn test_metadata_fields_present() {
        let (pipeline, store) = pipeline_with(vec![(
            "https://example.test/a",
            "# Title\n\nHello world from the chunk.",
        )]);

        pipeline
            .ingest_urls(&["https://example.test/a".to_string()], &IngestOptions::default())
            .await;

        let hits = store.search_chunks(&[1.0; 8], 10, None).await.unwrap();
        let meta = &hits[0].metadata;
        assert_eq!(meta.get("source_id").unwrap(), "example.test");
        assert!(meta.get("chunk_size").unwrap().as_u64().unwrap() > 0);
        assert!(meta.get("word_count").unwrap().as_u64().unwrap() > 0);
        assert!(meta.contains_key("crawl_time"));
    }
}
