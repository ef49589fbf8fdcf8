//! Same-domain link discovery inside fetched HTML

use super::{domain_of, normalize_url};
use crate::error::Result;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::trace;
use url::Url;

/// Pagination containers, tried in order; the first selector producing any
/// matches wins and later ones are not merged in.
const PAGINATION_SELECTORS: &[&str] = &[
    ".pagination a[href]",
    ".pager a[href]",
    "a.page-numbers[href]",
    "a[rel=\"next\"][href]",
];

/// Non-document file extensions that are never worth crawling
const SKIP_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "svg", "webp", "mp3", "mp4", "wav", "ogg", "webm",
    "avi", "mov", "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "exe", "dll", "so", "dylib",
    "bin", "woff", "woff2", "ttf", "otf", "eot", "pdf", "css", "js",
];

/// Finds same-domain outbound links in HTML
#[derive(Debug, Default)]
pub struct LinkExtractor;

impl LinkExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract same-domain document links: anchors resolved against
    /// `current_url`, normalized, restricted to `base_url`'s domain, and
    /// deduplicated in discovery order.
    pub fn extract_links(
        &self,
        html: &str,
        base_url: &str,
        current_url: &str,
    ) -> Result<Vec<String>> {
        let document = Html::parse_document(html);
        let Ok(selector) = Selector::parse("a[href]") else {
            return Ok(Vec::new());
        };
        let hrefs = document
            .select(&selector)
            .filter_map(|e| e.value().attr("href"));
        self.resolve_and_filter(hrefs, base_url, current_url)
    }

    /// Extract links from pagination containers only
    pub fn extract_pagination_links(
        &self,
        html: &str,
        base_url: &str,
        current_url: &str,
    ) -> Result<Vec<String>> {
        let document = Html::parse_document(html);
        for selector_str in PAGINATION_SELECTORS {
            let Ok(selector) = Selector::parse(selector_str) else {
                continue;
            };
            let hrefs: Vec<&str> = document
                .select(&selector)
                .filter_map(|e| e.value().attr("href"))
                .collect();
            if hrefs.is_empty() {
                continue;
            }
            trace!("pagination selector matched: {}", selector_str);
            return self.resolve_and_filter(hrefs.into_iter(), base_url, current_url);
        }
        Ok(Vec::new())
    }

    fn resolve_and_filter<'a>(
        &self,
        hrefs: impl Iterator<Item = &'a str>,
        base_url: &str,
        current_url: &str,
    ) -> Result<Vec<String>> {
        let base_domain = domain_of(base_url)?;
        let current = Url::parse(current_url)?;

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for href in hrefs {
            let href = href.trim();
            if !is_candidate_href(href) {
                continue;
            }
            let Ok(resolved) = current.join(href) else {
                continue;
            };
            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }
            let Some(host) = resolved.host_str() else {
                continue;
            };
            if !host.eq_ignore_ascii_case(&base_domain) {
                continue;
            }
            if should_skip_extension(resolved.path()) {
                continue;
            }
            let normalized = normalize_url(resolved.as_str());
            if seen.insert(normalized.clone()) {
                links.push(normalized);
            }
        }
        Ok(links)
    }
}

fn is_candidate_href(href: &str) -> bool {
    if href.is_empty() || href.starts_with('#') {
        return false;
    }
    let lower = href.to_lowercase();
    !(lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:"))
}

/// Whether a URL path points at a non-document file
pub fn should_skip_extension(path: &str) -> bool {
    let Some(ext) = path.rsplit('/').next().and_then(|seg| {
        let (_, ext) = seg.rsplit_once('.')?;
        Some(ext.to_lowercase())
    }) else {
        return false;
    };
    SKIP_EXTENSIONS.contains(&ext.as_str())
}
