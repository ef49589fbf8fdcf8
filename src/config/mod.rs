//! Crawl engine configuration
//!
//! The engine consumes these structs; loading them from a file (or merging
//! them into a larger service config) is the embedding application's job.
//! Every field has a serde default so hosts can specify only what they
//! override.

mod defaults;

pub use defaults::*;

use crate::crawl::ExtractorKind;
use serde::{Deserialize, Serialize};

/// Configuration for one crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Maximum crawl depth from the seed URL
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Default inter-request interval per domain (milliseconds)
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Whether to fetch and honor robots.txt
    #[serde(default = "default_respect_robots")]
    pub respect_robots_txt: bool,

    /// User agent sent with every request (and matched against robots groups)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum redirects to follow per request
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Force a specific extractor, bypassing page-type detection.
    /// Accepts "static"/"cheerio" and "rendered"/"playwright"/"browser".
    #[serde(default)]
    pub force_strategy: Option<ExtractorKind>,

    /// Restrict discovered links to this domain instead of the seed's domain
    #[serde(default)]
    pub base_url: Option<String>,

    /// Reuse a recent document for a URL instead of re-fetching it
    #[serde(default)]
    pub reuse_cached_content: bool,

    /// Freshness window for cached-document reuse (days)
    #[serde(default = "default_cache_expiry_days")]
    pub cache_expiry_days: u32,

    /// Token-bucket capacity per domain (1 = strict one-at-a-time)
    #[serde(default = "default_max_tokens_per_domain")]
    pub max_tokens_per_domain: u32,

    /// Optional process-wide request cap (requests per second)
    #[serde(default)]
    pub global_rate_limit_rps: Option<u32>,

    /// Only enqueue links matching at least one of these regexes (empty = all)
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Never enqueue links matching any of these regexes
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Page-type detection tuning
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Headless renderer tuning
    #[serde(default)]
    pub renderer: RendererConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            rate_limit_ms: default_rate_limit_ms(),
            respect_robots_txt: default_respect_robots(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_redirects: default_max_redirects(),
            force_strategy: None,
            base_url: None,
            reuse_cached_content: false,
            cache_expiry_days: default_cache_expiry_days(),
            max_tokens_per_domain: default_max_tokens_per_domain(),
            global_rate_limit_rps: None,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            detector: DetectorConfig::default(),
            renderer: RendererConfig::default(),
        }
    }
}

/// Page-type detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Combined score at or above which a page is classified SPA
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Weight of the static-analysis score when blending
    #[serde(default = "default_static_weight")]
    pub static_weight: f32,

    /// Weight of the dynamic-analysis score when blending
    #[serde(default = "default_dynamic_weight")]
    pub dynamic_weight: f32,

    /// Run dynamic analysis for inconclusive static scores
    #[serde(default)]
    pub dynamic_analysis: bool,

    /// Cache verdicts per domain
    #[serde(default = "default_cache_detection")]
    pub cache_results: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            static_weight: default_static_weight(),
            dynamic_weight: default_dynamic_weight(),
            dynamic_analysis: false,
            cache_results: default_cache_detection(),
        }
    }
}

/// Headless browser renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Navigation timeout (milliseconds)
    #[serde(default = "default_page_load_timeout_ms")]
    pub page_load_timeout_ms: u64,

    /// Fixed wait after navigation for late-arriving content (milliseconds)
    #[serde(default = "default_render_wait_ms")]
    pub render_wait_ms: u64,

    /// Wait for this selector to appear before reading the DOM
    #[serde(default)]
    pub wait_for_selector: Option<String>,

    /// Enable the browser sandbox (disable for Docker/CI)
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,

    /// Disable image/font/media loading to reduce render cost
    #[serde(default = "default_block_resources")]
    pub block_resources: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            page_load_timeout_ms: default_page_load_timeout_ms(),
            render_wait_ms: default_render_wait_ms(),
            wait_for_selector: None,
            sandbox: default_sandbox(),
            block_resources: default_block_resources(),
        }
    }
}
