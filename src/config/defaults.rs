//! Default values for configuration

/// Default maximum crawl depth from the seed URL
pub fn default_max_depth() -> u32 {
    3
}

/// Default inter-request interval per domain (milliseconds)
pub fn default_rate_limit_ms() -> u64 {
    1000
}

/// Default: respect robots.txt
pub fn default_respect_robots() -> bool {
    true
}

/// Default user agent
pub fn default_user_agent() -> String {
    format!("doccrawl/{} (Documentation Crawler)", env!("CARGO_PKG_VERSION"))
}

/// Default request timeout (milliseconds)
pub fn default_timeout_ms() -> u64 {
    30000
}

/// Default maximum redirects to follow
pub fn default_max_redirects() -> usize {
    5
}

/// Default freshness window for reusing cached documents (days)
pub fn default_cache_expiry_days() -> u32 {
    7
}

/// Default token-bucket capacity per domain (strict one-at-a-time)
pub fn default_max_tokens_per_domain() -> u32 {
    1
}

/// Default SPA confidence threshold
pub fn default_confidence_threshold() -> f32 {
    0.6
}

/// Default weight of the static-analysis score in hybrid detection
pub fn default_static_weight() -> f32 {
    0.7
}

/// Default weight of the dynamic-analysis score in hybrid detection
pub fn default_dynamic_weight() -> f32 {
    0.3
}

/// Default: cache detection verdicts per domain
pub fn default_cache_detection() -> bool {
    true
}

/// Default page load timeout for the headless browser (milliseconds)
pub fn default_page_load_timeout_ms() -> u64 {
    30000
}

/// Default post-load wait for dynamic content (milliseconds)
pub fn default_render_wait_ms() -> u64 {
    2000
}

/// Default: run the browser with its sandbox enabled
pub fn default_sandbox() -> bool {
    true
}

/// Default: block image/font/media requests while rendering
pub fn default_block_resources() -> bool {
    true
}
