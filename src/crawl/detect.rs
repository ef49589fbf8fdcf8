//! Page-type detection: static HTML vs. script-rendered application
//!
//! Rendering is expensive, so the detector decides per URL whether the
//! lightweight static extractor suffices. Three signature families are
//! scored independently (framework markers, DOM-skeleton shells, client-side
//! routing APIs) plus a minimal-body signal, each with a fixed weight;
//! matched weight over total possible weight gives the static-analysis score.
//!
//! Unlike the robots policy, detection fails loud: a fetch error propagates
//! to the caller instead of silently defaulting to a page type. The strategy
//! selector is the layer that softens that into a static-extractor fallback.

use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

/// Classification of a page's rendering technology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Static,
    Spa,
}

/// How the verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Static,
    Dynamic,
    Hybrid,
}

/// A detection verdict, cached per domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageTypeResult {
    pub page_type: PageType,
    pub is_spa: bool,
    /// Confidence in the emitted classification, in [0, 1]
    pub confidence: f32,
    pub method: DetectionMethod,
    /// Framework markers that matched, e.g. "React", "Vue"
    pub frameworks: Vec<String>,
}

/// Dynamic-analysis hook consulted when the static score is inconclusive.
/// The renderer module provides a headless-browser-backed implementation.
#[async_trait]
pub trait DynamicAnalyzer: Send + Sync {
    /// Return a score in [0, 1]: how much the rendered page differs from the
    /// static HTML (1.0 = content appears only after script execution).
    async fn analyze(&self, url: &str, static_html: &str) -> Result<f32>;
}

// Family weights. They sum to 1.0, so the static score is matched weight
// over total possible weight.
const WEIGHT_FRAMEWORK: f32 = 0.35;
const WEIGHT_SKELETON: f32 = 0.30;
const WEIGHT_ROUTING: f32 = 0.20;
const WEIGHT_MINIMAL_BODY: f32 = 0.15;

/// Static score below this is conclusively static; between this and the
/// configured threshold the verdict is inconclusive and dynamic analysis
/// (when enabled) is blended in.
const INCONCLUSIVE_LOW: f32 = 0.35;

const MINIMAL_BODY_TEXT_CHARS: usize = 200;
const MINIMAL_BODY_SCRIPT_COUNT: usize = 3;

/// Detects whether pages need JavaScript rendering, with a per-domain
/// verdict cache (rendering technology is assumed homogeneous per site)
pub struct PageTypeDetector {
    client: Client,
    config: DetectorConfig,
    dynamic: Option<Arc<dyn DynamicAnalyzer>>,
    cache: RwLock<HashMap<String, PageTypeResult>>,
}

impl PageTypeDetector {
    pub fn new(client: Client, config: DetectorConfig) -> Self {
        Self {
            client,
            config,
            dynamic: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a dynamic analyzer for the hybrid detection path
    pub fn with_dynamic_analyzer(mut self, analyzer: Arc<dyn DynamicAnalyzer>) -> Self {
        self.dynamic = Some(analyzer);
        self
    }

    /// Classify a URL. `html` can carry already-fetched markup; otherwise the
    /// page is fetched, and any fetch failure is returned as an error.
    pub async fn detect(&self, url: &str, html: Option<&str>) -> Result<PageTypeResult> {
        let domain = domain_key(url)?;

        if self.config.cache_results {
            if let Some(hit) = self.cache.read().await.get(&domain) {
                debug!("page-type cache hit for {}: {:?}", domain, hit.page_type);
                return Ok(hit.clone());
            }
        }

        let fetched;
        let html = match html {
            Some(h) => h,
            None => {
                fetched = self.fetch_html(url).await?;
                &fetched
            }
        };

        let analysis = analyze_static(html);
        let mut score = analysis.score;
        let mut method = DetectionMethod::Static;

        let inconclusive =
            score >= INCONCLUSIVE_LOW && score < self.config.confidence_threshold;
        if inconclusive && self.config.dynamic_analysis {
            if let Some(analyzer) = &self.dynamic {
                let dynamic_score = analyzer.analyze(url, html).await?;
                score = score * self.config.static_weight
                    + dynamic_score * self.config.dynamic_weight;
                method = DetectionMethod::Hybrid;
                debug!(
                    "hybrid detection for {}: static {:.2} + dynamic {:.2} -> {:.2}",
                    url, analysis.score, dynamic_score, score
                );
            }
        }

        let is_spa = score >= self.config.confidence_threshold;
        let confidence = if is_spa { score } else { 1.0 - score }.clamp(0.0, 1.0);
        let result = PageTypeResult {
            page_type: if is_spa { PageType::Spa } else { PageType::Static },
            is_spa,
            confidence,
            method,
            frameworks: analysis.frameworks,
        };

        info!(
            "page type for {}: {:?} (confidence {:.0}%, {:?})",
            url,
            result.page_type,
            result.confidence * 100.0,
            result.method
        );

        if self.config.cache_results {
            self.cache
                .write()
                .await
                .insert(domain, result.clone());
        }
        Ok(result)
    }

    /// Cached verdict for a domain, if any
    pub async fn cached_verdict(&self, url: &str) -> Option<PageTypeResult> {
        let domain = domain_key(url).ok()?;
        self.cache.read().await.get(&domain).cloned()
    }

    /// Clear the per-domain verdict cache
    pub async fn reset(&self) {
        self.cache.write().await.clear();
    }

    async fn fetch_html(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Detection(format!("fetch failed for {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Detection(format!("HTTP {} fetching {}", status, url)));
        }
        response
            .text()
            .await
            .map_err(|e| Error::Detection(format!("body read failed for {}: {}", url, e)))
    }
}

struct StaticAnalysis {
    score: f32,
    frameworks: Vec<String>,
}

/// Score HTML with the weighted signature families
fn analyze_static(html: &str) -> StaticAnalysis {
    let html_lower = html.to_lowercase();
    let mut score = 0.0;

    let frameworks = detect_frameworks(html, &html_lower);
    if !frameworks.is_empty() {
        score += WEIGHT_FRAMEWORK;
    }
    if matches_skeleton_shell(html) {
        score += WEIGHT_SKELETON;
    }
    if matches_routing_api(&html_lower) {
        score += WEIGHT_ROUTING;
    }
    if has_minimal_body(html, &html_lower) {
        score += WEIGHT_MINIMAL_BODY;
    }

    StaticAnalysis {
        score: score.clamp(0.0, 1.0),
        frameworks,
    }
}

/// Framework script/markup signatures. Shared with the rendered extractor,
/// which records what it sees in the final DOM.
pub(crate) fn detect_frameworks(html: &str, html_lower: &str) -> Vec<String> {
    let mut found = Vec::new();

    if html_lower.contains("ng-version") || html.contains("_ngcontent") {
        found.push("Angular".to_string());
    }
    if html_lower.contains("__next") || html_lower.contains("_next/static") {
        found.push("Next.js".to_string());
    }
    if html_lower.contains("__nuxt") || html_lower.contains("/_nuxt/") {
        found.push("Nuxt".to_string());
    }
    if html_lower.contains("___gatsby") || html_lower.contains("/page-data/") {
        found.push("Gatsby".to_string());
    }
    if html_lower.contains("data-reactroot")
        || html_lower.contains("react-dom")
        || script_src_matches(html_lower, "react")
    {
        found.push("React".to_string());
    }
    if html_lower.contains("data-v-")
        || html_lower.contains("v-cloak")
        || script_src_matches(html_lower, "vue")
    {
        found.push("Vue".to_string());
    }
    if html_lower.contains("svelte-") || html.contains("__svelte") {
        found.push("Svelte".to_string());
    }
    if html_lower.contains("ember-view") || html_lower.contains("data-ember") {
        found.push("Ember".to_string());
    }

    found
}

fn script_src_matches(html_lower: &str, name: &str) -> bool {
    let pattern = format!(r#"src\s*=\s*["'][^"']*{}[^"']*\.js"#, name);
    Regex::new(&pattern)
        .map(|re| re.is_match(html_lower))
        .unwrap_or(false)
}

/// Empty root containers that client-side frameworks mount into
fn matches_skeleton_shell(html: &str) -> bool {
    let patterns = [
        r"(?i)<app-root[^>]*>\s*</app-root>",
        r#"(?i)<div\s+id\s*=\s*["']root["'][^>]*>\s*</div>"#,
        r#"(?i)<div\s+id\s*=\s*["']app["'][^>]*>\s*</div>"#,
        r#"(?i)<div\s+id\s*=\s*["']__next["'][^>]*>\s*</div>"#,
        r#"(?i)<div\s+id\s*=\s*["']__nuxt["'][^>]*>"#,
        r#"(?i)<div\s+id\s*=\s*["']main-app["'][^>]*>\s*</div>"#,
    ];
    patterns.iter().any(|p| {
        Regex::new(p)
            .map(|re| re.is_match(html))
            .unwrap_or(false)
    })
}

/// Client-side routing API usage
fn matches_routing_api(html_lower: &str) -> bool {
    let markers = [
        "history.pushstate",
        "react-router",
        "vue-router",
        "$router.push",
        "router-outlet",
        "router-view",
        "onhashchange",
    ];
    markers.iter().any(|m| html_lower.contains(m))
}

/// Near-empty visible body combined with several script tags
fn has_minimal_body(html: &str, html_lower: &str) -> bool {
    let script_count = html_lower.matches("<script").count();
    if script_count < MINIMAL_BODY_SCRIPT_COUNT {
        return false;
    }
    visible_text_len(html) < MINIMAL_BODY_TEXT_CHARS
}

pub(crate) fn visible_text_len(html: &str) -> usize {
    // Strip scripts and styles before counting text between tags
    let script_re = Regex::new(r"(?is)<script[^>]*>.*?</script>").ok();
    let style_re = Regex::new(r"(?is)<style[^>]*>.*?</style>").ok();
    let tag_re = Regex::new(r"<[^>]+>").ok();

    let mut cleaned = html.to_string();
    if let Some(re) = script_re {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    if let Some(re) = style_re {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    if let Some(re) = tag_re {
        cleaned = re.replace_all(&cleaned, " ").into_owned();
    }
    cleaned.split_whitespace().map(|w| w.len()).sum()
}

fn domain_key(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    parsed
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or_else(|| Error::Detection(format!("URL has no host: {}", url)))
}
