//! Content extraction behind one interface
//!
//! Both extractor variants (static HTTP and headless-rendered) produce the
//! same [`ExtractedContent`] record, so downstream code never needs to know
//! which one ran.

use super::links::LinkExtractor;
use crate::config::CrawlConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::detect::PageType;

/// Which extractor variant to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Lightweight HTTP fetch + HTML parse (reference name: "cheerio")
    #[serde(alias = "cheerio")]
    Static,
    /// Headless-browser rendering (reference names: "playwright", "browser")
    #[serde(alias = "playwright", alias = "browser")]
    Rendered,
}

/// Uniform extraction result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub url: String,
    pub title: Option<String>,
    /// Raw markup as fetched or rendered
    pub raw_content: String,
    /// Visible text with scripts/styles stripped
    pub plain_text: String,
    /// Structured metadata: description, keywords, canonical, author, og:*
    pub metadata: HashMap<String, String>,
    /// Same-domain document links, normalized and deduplicated
    pub links: Vec<String>,
}

/// Per-call extraction options
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Collect same-domain links from the page
    pub extract_links: bool,
    /// Rendered extractor only: wait for this selector before reading the DOM
    pub wait_for_selector: Option<String>,
    /// Rendered extractor only: fixed wait after navigation (milliseconds)
    pub render_wait_ms: Option<u64>,
}

/// One extractor variant
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, url: &str, options: &ExtractOptions) -> Result<ExtractedContent>;

    fn supports_page_type(&self, page_type: PageType) -> bool;

    fn kind(&self) -> ExtractorKind;

    /// Release held resources. Must be safe to call at any time, including
    /// before the first extraction.
    async fn cleanup(&self) -> Result<()>;
}

/// Static HTML extractor: one bounded GET, no script execution
pub struct StaticExtractor {
    client: Client,
    links: LinkExtractor,
}

impl StaticExtractor {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_millis(config.timeout_ms))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| Error::Crawl(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            links: LinkExtractor::new(),
        })
    }
}

#[async_trait]
impl ContentExtractor for StaticExtractor {
    async fn extract(&self, url: &str, options: &ExtractOptions) -> Result<ExtractedContent> {
        debug!("static extract: {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        if !content_type.is_empty() && !is_parseable_content_type(&content_type) {
            return Err(Error::UnsupportedContentType(format!(
                "{} at {}",
                content_type, url
            )));
        }

        let final_url = response.url().to_string();
        let raw = response.text().await?;

        let mut content = parse_page(&final_url, &raw);
        if options.extract_links {
            content.links = self.links.extract_links(&raw, &final_url, &final_url)?;
        }
        Ok(content)
    }

    fn supports_page_type(&self, page_type: PageType) -> bool {
        page_type == PageType::Static
    }

    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Static
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

fn is_parseable_content_type(content_type: &str) -> bool {
    content_type.contains("text/html")
        || content_type.contains("application/xhtml")
        || content_type.contains("text/plain")
}

/// Shared markup-to-record parsing used by both extractor variants
pub(crate) fn parse_page(url: &str, raw: &str) -> ExtractedContent {
    let document = Html::parse_document(raw);

    let title = Selector::parse("title").ok().and_then(|sel| {
        document
            .select(&sel)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    });

    let metadata = extract_metadata(&document);

    // Visible text: scripts/styles/media are dropped by the text renderer
    let body = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|e| e.html())
        .unwrap_or_else(|| raw.to_string());
    let plain_text = html2text::from_read(body.as_bytes(), 80)
        .map(|t| normalize_whitespace(&t))
        .unwrap_or_default();

    ExtractedContent {
        url: url.to_string(),
        title,
        raw_content: raw.to_string(),
        plain_text,
        metadata,
        links: Vec::new(),
    }
}

fn extract_metadata(document: &Html) -> HashMap<String, String> {
    let mut metadata = HashMap::new();

    if let Ok(sel) = Selector::parse("meta[name][content]") {
        for elem in document.select(&sel) {
            let (Some(name), Some(content)) =
                (elem.value().attr("name"), elem.value().attr("content"))
            else {
                continue;
            };
            let name = name.to_lowercase();
            if matches!(name.as_str(), "description" | "keywords" | "author") {
                metadata.insert(name, content.trim().to_string());
            }
        }
    }

    if let Ok(sel) = Selector::parse("meta[property][content]") {
        for elem in document.select(&sel) {
            let (Some(property), Some(content)) =
                (elem.value().attr("property"), elem.value().attr("content"))
            else {
                continue;
            };
            let property = property.to_lowercase();
            if property.starts_with("og:") {
                metadata.insert(property, content.trim().to_string());
            }
        }
    }

    if let Ok(sel) = Selector::parse("link[rel=\"canonical\"][href]") {
        if let Some(elem) = document.select(&sel).next() {
            if let Some(href) = elem.value().attr("href") {
                metadata.insert("canonical".to_string(), href.trim().to_string());
            }
        }
    }

    metadata
}

/// Collapse runs of whitespace, preserving paragraph breaks
pub(crate) fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut last_was_whitespace = true;
    let mut newline_count = 0;

    for c in text.chars() {
        if c.is_whitespace() {
            if c == '\n' {
                newline_count += 1;
            }
            last_was_whitespace = true;
        } else {
            if last_was_whitespace && !result.is_empty() {
                if newline_count >= 2 {
                    result.push_str("\n\n");
                } else if newline_count == 1 {
                    result.push('\n');
                } else {
                    result.push(' ');
                }
            }
            newline_count = 0;
            result.push(c);
            last_was_whitespace = false;
        }
    }

    result.trim().to_string()
}
