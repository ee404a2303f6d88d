//! Page acquisition boundary: fetch a URL, return markdown and links.
//!
//! The HTML-to-markdown engine is an external collaborator behind the
//! [`PageBrowser`] trait: `crawl(url)` yields the page as markdown plus the
//! links discovered on it. The built-in [`HttpBrowser`] implementation uses
//! `reqwest` for transport and `scraper` for a conservative HTML→markdown
//! conversion (headings, paragraphs, lists, fenced code blocks). Plain-text
//! and XML responses pass through untouched so the crawler can branch on
//! them.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html};
use std::time::Duration;
use url::Url;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0 crawl-harness/0.4";

/// A fetched page, normalized for the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    /// Final URL after redirects, canonicalized.
    pub url: String,
    /// Response `Content-Type`, lowercased, parameters stripped.
    pub content_type: String,
    /// Markdown rendition for HTML pages; the raw body otherwise.
    pub markdown: String,
    /// Absolute `http(s)` links discovered on the page.
    pub links: Vec<String>,
}

/// External browser-engine boundary: URL in, markdown + links out.
#[async_trait]
pub trait PageBrowser: Send + Sync {
    async fn crawl(&self, url: &str) -> Result<CrawledPage>;
}

/// Built-in reqwest + scraper implementation of [`PageBrowser`].
pub struct HttpBrowser {
    client: reqwest::Client,
}

impl HttpBrowser {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageBrowser for HttpBrowser {
    async fn crawl(&self, url: &str) -> Result<CrawledPage> {
        let parsed = Url::parse(url).with_context(|| format!("invalid URL: {}", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("unsupported URL scheme: {}", parsed.scheme());
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .with_context(|| format!("request failed: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} fetching {}", status, url);
        }

        let final_url = canonical_url(response.url().as_str());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .split(';')
            .next()
            .unwrap_or("text/html")
            .trim()
            .to_lowercase();

        let body = response.text().await?;

        if content_type.contains("html") {
            let (markdown, links) = html_to_markdown(&body, &final_url);
            Ok(CrawledPage {
                url: final_url,
                content_type,
                markdown,
                links,
            })
        } else {
            Ok(CrawledPage {
                url: final_url,
                content_type,
                markdown: body,
                links: Vec::new(),
            })
        }
    }
}

/// Canonicalize a URL for visited-set and storage purposes: strip the
/// fragment and any trailing slash on a non-root path. The scheme is kept.
pub fn canonical_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut u) => {
            u.set_fragment(None);
            let path = u.path().to_string();
            if path.len() > 1 && path.ends_with('/') {
                u.set_path(path.trim_end_matches('/'));
            }
            u.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// Registrable-domain comparison used to keep recursive crawls internal.
///
/// Approximates eTLD+1 by the last two host labels; exact hosts always match.
pub fn same_site(a: &str, b: &str) -> bool {
    fn registrable(url: &str) -> Option<String> {
        let host = Url::parse(url).ok()?.host_str()?.to_lowercase();
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() <= 2 {
            return Some(host);
        }
        Some(labels[labels.len() - 2..].join("."))
    }
    match (registrable(a), registrable(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

// ============ HTML → markdown ============

/// Convert an HTML document to markdown and collect its absolute links.
pub fn html_to_markdown(html: &str, base_url: &str) -> (String, Vec<String>) {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();

    let mut out = String::new();
    let mut links = Vec::new();

    if let Some(root) = document
        .select(&scraper::Selector::parse("body").unwrap())
        .next()
    {
        walk_element(root, &mut out, &base, &mut links);
    } else {
        walk_element(document.root_element(), &mut out, &base, &mut links);
    }

    links.sort();
    links.dedup();

    (collapse_blank_lines(&out), links)
}

fn walk_element(el: ElementRef, out: &mut String, base: &Option<Url>, links: &mut Vec<String>) {
    let name = el.value().name();
    match name {
        "script" | "style" | "noscript" | "template" | "svg" | "nav" | "footer" => {}
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name.as_bytes()[1] - b'0';
            out.push_str("\n\n");
            out.push_str(&"#".repeat(level as usize));
            out.push(' ');
            out.push_str(inline_text(el).trim());
            out.push_str("\n\n");
            collect_links(el, base, links);
        }
        "p" | "blockquote" | "td" | "dd" | "figcaption" => {
            let text = inline_text(el);
            if !text.trim().is_empty() {
                out.push_str("\n\n");
                out.push_str(text.trim());
                out.push_str("\n\n");
            }
            collect_links(el, base, links);
        }
        "pre" => {
            let code_el = el
                .children()
                .filter_map(ElementRef::wrap)
                .find(|c| c.value().name() == "code");
            let (lang, body) = match code_el {
                Some(code) => (language_from_class(code), inline_text(code)),
                None => (None, inline_text(el)),
            };
            out.push_str("\n\n```");
            if let Some(l) = lang {
                out.push_str(&l);
            }
            out.push('\n');
            out.push_str(body.trim_end_matches('\n'));
            out.push_str("\n```\n\n");
        }
        "li" => {
            let text = inline_text(el);
            if !text.trim().is_empty() {
                out.push_str("- ");
                out.push_str(text.trim());
                out.push('\n');
            }
            collect_links(el, base, links);
        }
        "ul" | "ol" => {
            out.push('\n');
            for child in el.children().filter_map(ElementRef::wrap) {
                walk_element(child, out, base, links);
            }
            out.push('\n');
        }
        "a" => {
            push_link(el.value().attr("href"), base, links);
            let text = inline_text(el);
            if !text.trim().is_empty() {
                out.push_str(text.trim());
                out.push(' ');
            }
        }
        "br" => out.push('\n'),
        _ => {
            for child in el.children() {
                if let Some(child_el) = ElementRef::wrap(child) {
                    walk_element(child_el, out, base, links);
                } else if let Some(text) = child.value().as_text() {
                    // Bare text directly under a structural container.
                    let t = text.trim();
                    if !t.is_empty() {
                        out.push_str(t);
                        out.push('\n');
                    }
                }
            }
        }
    }
}

fn inline_text(el: ElementRef) -> String {
    let mut text = String::new();
    for piece in el.text() {
        if !piece.trim().is_empty() {
            if !text.is_empty() && !text.ends_with(' ') && !text.ends_with('\n') {
                text.push(' ');
            }
            text.push_str(piece.trim());
        } else if piece.contains('\n') && text.ends_with(|c: char| !c.is_whitespace()) {
            text.push(' ');
        }
    }
    text
}

fn language_from_class(el: ElementRef) -> Option<String> {
    el.value().attr("class").and_then(|classes| {
        classes.split_whitespace().find_map(|c| {
            c.strip_prefix("language-")
                .or_else(|| c.strip_prefix("lang-"))
                .map(|l| l.to_string())
        })
    })
}

fn collect_links(el: ElementRef, base: &Option<Url>, links: &mut Vec<String>) {
    for a in el.select(&scraper::Selector::parse("a[href]").unwrap()) {
        push_link(a.value().attr("href"), base, links);
    }
}

fn push_link(href: Option<&str>, base: &Option<Url>, links: &mut Vec<String>) {
    let Some(href) = href else { return };
    let resolved = match base {
        Some(b) => b.join(href).ok(),
        None => Url::parse(href).ok(),
    };
    if let Some(u) = resolved {
        if matches!(u.scheme(), "http" | "https") {
            links.push(canonical_url(u.as_str()));
        }
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_url_strips_fragment_and_slash() {
        assert_eq!(
            canonical_url("https://example.test/docs/#intro"),
            "https://example.test/docs"
        );
        assert_eq!(canonical_url("https://example.test/"), "https://example.test/");
        assert_eq!(
            canonical_url("https://example.test/a?x=1#y"),
            "https://example.test/a?x=1"
        );
    }

    #[test]
    fn test_same_site() {
        assert!(same_site(
            "https://docs.example.test/a",
            "https://www.example.test/b"
        ));
        assert!(!same_site("https://example.test/a", "https://other.test/b"));
    }

    #[test]
    fn test_html_to_markdown_basic() {
        let html = r#"<html><body>
            <h1>Title</h1>
            <p>Hello <b>world</b>.</p>
            <ul><li>one</li><li>two</li></ul>
        </body></html>"#;
        let (md, _links) = html_to_markdown(html, "https://example.test/");
        assert!(md.contains("# Title"));
        assert!(md.contains("Hello world ."), "markdown was: {}", md);
        assert!(md.contains("- one"));
        assert!(md.contains("- two"));
    }

    #[test]
    fn test_html_to_markdown_code_block() {
        let html = r#"<body><pre><code class="language-python">print("hi")</code></pre></body>"#;
        let (md, _) = html_to_markdown(html, "https://example.test/");
        assert!(md.contains("```python"));
        assert!(md.contains("print(\"hi\")"));
        assert!(md.contains("\n```"));
    }

    #[test]
    fn test_html_to_markdown_links_absolute() {
        let html = r#"<body><p>See <a href="/docs/page2">page two</a> and
            <a href="https://other.test/x#frag">external</a>.</p></body>"#;
        let (_, links) = html_to_markdown(html, "https://example.test/docs/");
        assert!(links.contains(&"https://example.test/docs/page2".to_string()));
        assert!(links.contains(&"https://other.test/x".to_string()));
    }

    #[test]
    fn test_script_and_style_dropped() {
        let html = r#"<body><script>var x=1;</script><style>p{}</style><p>kept</p></body>"#;
        let (md, _) = html_to_markdown(html, "https://example.test/");
        assert!(md.contains("kept"));
        assert!(!md.contains("var x"));
        assert!(!md.contains("p{}"));
    }
}
