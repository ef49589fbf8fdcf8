//! Crawl orchestration engine
//!
//! This module tree provides:
//! - A FIFO URL frontier with normalization-based deduplication
//! - Per-domain token-bucket rate limiting (plus an optional global cap)
//! - robots.txt loading and enforcement with fail-open semantics
//! - Static vs SPA page-type detection
//! - Strategy-selected content extraction (plain HTTP or headless browser)
//! - The [`Crawler`] state machine driving one job at a time

mod detect;
mod extract;
mod frontier;
mod links;
mod rate_limit;
mod renderer;
mod robots;
mod strategy;

pub use detect::*;
pub use extract::*;
pub use frontier::*;
pub use links::*;
pub use rate_limit::*;
pub use renderer::*;
pub use robots::*;
pub use strategy::*;

use crate::config::CrawlConfig;
use crate::error::{Error, Result};
use crate::job::{CrawlStats, DocumentSink, JobManager, NewDocument};
use chrono::Utc;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

/// Normalize a URL for deduplication: strip the fragment and any trailing
/// slash from the path. Parsing through `Url` also canonicalizes scheme and
/// host casing. Unparseable input is returned unchanged.
pub fn normalize_url(url: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        let mut normalized = parsed.clone();
        normalized.set_fragment(None);

        let path = parsed.path().trim_end_matches('/');
        if path.is_empty() {
            normalized.set_path("/");
        } else {
            normalized.set_path(path);
        }

        normalized.to_string()
    } else {
        url.to_string()
    }
}

/// Lowercased host of a URL
pub fn domain_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    parsed
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or_else(|| Error::Crawl(format!("URL has no host: {}", url)))
}

/// Lifecycle state of the crawler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlerState {
    Idle,
    Initializing,
    Running,
    Paused,
    Stopping,
    Error,
}

/// Progress snapshot derived from frontier counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlProgress {
    pub total_urls: usize,
    pub crawled_urls: usize,
    pub pending_urls: usize,
    /// Percent complete, capped at 100
    pub percent: f32,
}

/// Crawl orchestrator: one crawl run at a time, driven against external
/// [`JobManager`] and [`DocumentSink`] collaborators.
pub struct Crawler {
    config: CrawlConfig,
    state: RwLock<CrawlerState>,
    current_job: RwLock<Option<String>>,
    frontier: Mutex<Frontier>,
    rate_limiter: Arc<DomainRateLimiter>,
    global_limiter: Option<GlobalRateLimiter>,
    robots: RobotsPolicy,
    selector: StrategySelector,
    jobs: Arc<dyn JobManager>,
    documents: Arc<dyn DocumentSink>,
    include_patterns: Vec<Regex>,
    exclude_patterns: Vec<Regex>,
}

impl Crawler {
    /// Create a crawler with its own per-domain rate limiter.
    pub fn new(
        config: CrawlConfig,
        jobs: Arc<dyn JobManager>,
        documents: Arc<dyn DocumentSink>,
    ) -> Result<Self> {
        let rate_limiter = Arc::new(DomainRateLimiter::new(
            Duration::from_millis(config.rate_limit_ms),
            config.max_tokens_per_domain,
        ));
        Self::with_rate_limiter(config, jobs, documents, rate_limiter)
    }

    /// Create a crawler sharing per-domain buckets with other crawlers.
    /// Concurrent crawls that hand the same limiter to this constructor
    /// serialize their requests per domain instead of double-spending.
    pub fn with_rate_limiter(
        config: CrawlConfig,
        jobs: Arc<dyn JobManager>,
        documents: Arc<dyn DocumentSink>,
        rate_limiter: Arc<DomainRateLimiter>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_millis(config.timeout_ms))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| Error::Crawl(format!("Failed to create HTTP client: {}", e)))?;

        let static_extractor: Arc<dyn ContentExtractor> = Arc::new(StaticExtractor::new(&config)?);
        let rendered = Arc::new(RenderedExtractor::new(config.renderer.clone()));

        #[allow(unused_mut)]
        let mut detector = PageTypeDetector::new(client.clone(), config.detector.clone());
        #[cfg(feature = "js-rendering")]
        if config.detector.dynamic_analysis {
            detector = detector
                .with_dynamic_analyzer(Arc::new(RenderedDynamicAnalyzer::new(Arc::clone(&rendered))));
        }

        let selector = StrategySelector::new(
            static_extractor,
            rendered,
            Arc::new(detector),
            config.force_strategy,
        );

        let include_patterns = compile_patterns(&config.include_patterns)?;
        let exclude_patterns = compile_patterns(&config.exclude_patterns)?;

        let global_limiter = config.global_rate_limit_rps.map(GlobalRateLimiter::new);

        Ok(Self {
            rate_limiter,
            global_limiter,
            robots: RobotsPolicy::new(client),
            selector,
            state: RwLock::new(CrawlerState::Idle),
            current_job: RwLock::new(None),
            frontier: Mutex::new(Frontier::new()),
            jobs,
            documents,
            include_patterns,
            exclude_patterns,
            config,
        })
    }

    pub async fn state(&self) -> CrawlerState {
        *self.state.read().await
    }

    /// Progress derived from frontier counts alone
    pub async fn progress(&self) -> CrawlProgress {
        let frontier = self.frontier.lock().await;
        let crawled = frontier.visited_len();
        let pending = frontier.pending_len();
        let total = crawled + pending;
        let percent = if total == 0 {
            0.0
        } else {
            ((crawled as f32 / total as f32) * 100.0).min(100.0)
        };
        CrawlProgress {
            total_urls: total,
            crawled_urls: crawled,
            pending_urls: pending,
            percent,
        }
    }

    /// Pause a running crawl; the loop idles until [`Crawler::resume`]
    pub async fn pause(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != CrawlerState::Running {
            return Err(Error::InvalidState(format!(
                "Cannot pause from {:?}",
                *state
            )));
        }
        *state = CrawlerState::Paused;
        drop(state);

        if let Some(job_id) = self.current_job.read().await.clone() {
            self.jobs.pause_job(&job_id).await?;
        }
        info!("Crawl paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != CrawlerState::Paused {
            return Err(Error::InvalidState(format!(
                "Cannot resume from {:?}",
                *state
            )));
        }
        *state = CrawlerState::Running;
        drop(state);

        if let Some(job_id) = self.current_job.read().await.clone() {
            self.jobs.resume_job(&job_id).await?;
        }
        info!("Crawl resumed");
        Ok(())
    }

    /// Request a graceful stop. The loop finishes its current URL, marks the
    /// job completed, and returns; a stopped run is a short successful run.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        match *state {
            CrawlerState::Running | CrawlerState::Paused => {
                *state = CrawlerState::Stopping;
                info!("Crawl stop requested");
                Ok(())
            }
            other => Err(Error::InvalidState(format!("Cannot stop from {:?}", other))),
        }
    }

    /// Release extractor resources (headless browser). Safe to call at any
    /// time; the crawler remains usable afterwards.
    pub async fn cleanup(&self) -> Result<()> {
        self.selector.cleanup().await
    }

    /// Run a crawl for an existing job from a seed URL.
    ///
    /// Per-URL failures (fetch errors, unsupported content, sink write
    /// failures) are recorded in the returned stats and the crawl continues.
    /// Job Manager failures are fatal: the job is marked failed and the
    /// error propagates.
    pub async fn crawl(&self, job_id: &str, start_url: &str) -> Result<CrawlStats> {
        {
            let mut state = self.state.write().await;
            if *state != CrawlerState::Idle {
                return Err(Error::InvalidState(format!(
                    "Cannot start a crawl from {:?}",
                    *state
                )));
            }
            *state = CrawlerState::Initializing;
        }
        *self.current_job.write().await = Some(job_id.to_string());

        let mut stats = CrawlStats::default();
        match self.run(job_id, start_url, &mut stats).await {
            Ok(completed) => {
                if completed {
                    if let Err(e) = self.jobs.mark_completed(job_id, &stats).await {
                        return Err(self.fail(job_id, &stats, e).await);
                    }
                    info!(
                        "Crawl complete: {} processed, {} skipped, {} errors",
                        stats.pages_processed,
                        stats.pages_skipped,
                        stats.errors.len()
                    );
                } else {
                    info!("Crawl cancelled externally, leaving job status as-is");
                }
                *self.state.write().await = CrawlerState::Idle;
                *self.current_job.write().await = None;
                Ok(stats)
            }
            Err(e) => Err(self.fail(job_id, &stats, e).await),
        }
    }

    /// Crawl loop body. Returns `Ok(true)` when the run finished (frontier
    /// exhausted or stopped) and `Ok(false)` when external cancellation was
    /// observed; errors are fatal.
    async fn run(&self, job_id: &str, start_url: &str, stats: &mut CrawlStats) -> Result<bool> {
        let seed = Url::parse(start_url)?;
        let start_domain = domain_of(start_url)?;
        let scope_domain = match &self.config.base_url {
            Some(base) => domain_of(base)?,
            None => start_domain.clone(),
        };

        if self.jobs.find_job(job_id).await?.is_none() {
            return Err(Error::Job(format!("Unknown job: {}", job_id)));
        }

        self.robots.reset().await;
        if self.config.respect_robots_txt {
            self.robots.load(&seed, &self.config.user_agent).await?;

            // robots.txt pacing can only slow us down, never speed us up
            if let Some(delay_ms) = self.robots.crawl_delay_ms().await {
                let interval = delay_ms.max(self.config.rate_limit_ms);
                info!(
                    "Applying crawl-delay for {}: {}ms",
                    start_domain, interval
                );
                self.rate_limiter
                    .set_rate_limit(&start_domain, Duration::from_millis(interval))
                    .await;
            }

            let sitemaps = self.robots.sitemap_urls().await;
            if !sitemaps.is_empty() {
                info!("robots.txt lists {} sitemap(s)", sitemaps.len());
                for sitemap in &sitemaps {
                    debug!("  Sitemap: {}", sitemap);
                }
            }
        }

        {
            let mut frontier = self.frontier.lock().await;
            frontier.clear();
            if !frontier.add(start_url, 0) {
                return Err(Error::Crawl(format!("Invalid seed URL: {}", start_url)));
            }
        }

        *self.state.write().await = CrawlerState::Running;
        info!("Starting crawl of {} (job {})", start_url, job_id);

        'crawl: loop {
            // Idle while paused, still honoring cancellation and stop
            loop {
                match *self.state.read().await {
                    CrawlerState::Paused => {
                        if !self.jobs.should_continue(job_id).await? {
                            return Ok(false);
                        }
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    _ => break,
                }
            }

            if *self.state.read().await == CrawlerState::Stopping {
                info!("Stopping crawl on request");
                break 'crawl;
            }

            if !self.jobs.should_continue(job_id).await? {
                return Ok(false);
            }

            let entry = { self.frontier.lock().await.get_next() };
            let Some(entry) = entry else {
                break 'crawl;
            };

            self.process_entry(job_id, &entry, &scope_domain, stats)
                .await;

            let progress = self.progress().await;
            self.jobs
                .update_progress(job_id, progress.percent / 100.0, stats)
                .await?;
        }

        Ok(true)
    }

    /// Handle one frontier entry. All failures here are per-URL recoverable:
    /// they are recorded or counted, the URL is marked visited, and the
    /// caller's loop continues.
    ///
    /// The domain token is acquired up front and held for the whole of the
    /// URL's processing; it is returned on every exit path, so a completed
    /// request frees the domain for the next waiter without sitting out the
    /// full refill interval.
    async fn process_entry(
        &self,
        job_id: &str,
        entry: &FrontierEntry,
        scope_domain: &str,
        stats: &mut CrawlStats,
    ) {
        let url = entry.url.as_str();
        let depth = entry.depth;

        if depth > self.config.max_depth {
            debug!("Skipping {} - beyond max depth {}", url, self.config.max_depth);
            stats.pages_skipped += 1;
            self.mark_visited(url).await;
            return;
        }

        let domain = match domain_of(url) {
            Ok(d) => d,
            Err(e) => {
                stats.errors.push(format!("{}: {}", url, e));
                self.mark_visited(url).await;
                return;
            }
        };

        if let Some(global) = &self.global_limiter {
            global.wait().await;
        }
        self.rate_limiter.acquire(&domain).await;
        self.process_acquired(job_id, url, depth, scope_domain, stats)
            .await;
        self.rate_limiter.release(&domain).await;

        self.mark_visited(url).await;
    }

    /// Robots check, cache reuse, extraction, and persistence for one URL,
    /// run while its domain token is held.
    async fn process_acquired(
        &self,
        job_id: &str,
        url: &str,
        depth: u32,
        scope_domain: &str,
        stats: &mut CrawlStats,
    ) {
        if self.config.respect_robots_txt && !self.robots.is_allowed(url).await {
            debug!("Skipping {} - disallowed by robots.txt", url);
            stats.pages_skipped += 1;
            return;
        }

        if self.config.reuse_cached_content {
            match self
                .documents
                .find_recent_document(url, self.config.cache_expiry_days)
                .await
            {
                Ok(Some(existing)) => {
                    debug!("Reusing cached document for {}", url);
                    match self.documents.copy_document(&existing, job_id, depth).await {
                        Ok(copy) => {
                            stats.pages_skipped += 1;
                            stats.total_chunks += copy.chunk_count;
                        }
                        Err(e) => {
                            warn!("Failed to copy cached document for {}: {}", url, e);
                            stats.errors.push(format!("{}: {}", url, e));
                        }
                    }
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    // Cache lookup failure falls through to a normal fetch
                    warn!("Cached-document lookup failed for {}: {}", url, e);
                }
            }
        }

        let extractor = self.selector.extractor_for_url(url, None).await;
        let extract_links = depth < self.config.max_depth;
        let options = ExtractOptions {
            extract_links,
            ..Default::default()
        };

        match extractor.extract(url, &options).await {
            Ok(content) => {
                debug!(
                    "Extracted {} ({} chars, {} links)",
                    content.url,
                    content.plain_text.len(),
                    content.links.len()
                );

                let doc = NewDocument {
                    url: content.url.clone(),
                    title: content.title.clone(),
                    content: content.plain_text.clone(),
                    metadata: content.metadata.clone(),
                    crawl_date: Utc::now(),
                    level: depth,
                    job_id: job_id.to_string(),
                };
                match self.documents.create_document(doc).await {
                    Ok(stored) => {
                        stats.pages_processed += 1;
                        stats.total_chunks += stored.chunk_count;
                    }
                    Err(e) => {
                        warn!("Failed to store document for {}: {}", url, e);
                        stats.errors.push(format!("{}: {}", url, e));
                    }
                }

                if extract_links {
                    let mut frontier = self.frontier.lock().await;
                    for link in &content.links {
                        if self.link_in_scope(link, scope_domain) {
                            frontier.add(link, depth + 1);
                        }
                    }
                }

                if content.url != url {
                    self.mark_visited(&content.url).await;
                }
            }
            Err(e) => {
                warn!("Failed to process {}: {}", url, e);
                stats.errors.push(format!("{}: {}", url, e));
            }
        }
    }

    async fn mark_visited(&self, url: &str) {
        self.frontier.lock().await.mark_visited(url);
    }

    fn link_in_scope(&self, url: &str, scope_domain: &str) -> bool {
        match domain_of(url) {
            Ok(d) if d == scope_domain => {}
            _ => return false,
        }
        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|re| re.is_match(url))
        {
            return false;
        }
        !self.exclude_patterns.iter().any(|re| re.is_match(url))
    }

    async fn fail(&self, job_id: &str, stats: &CrawlStats, error: Error) -> Error {
        warn!("Crawl failed fatally: {}", error);
        if let Err(e) = self
            .jobs
            .mark_failed(job_id, &error.to_string(), stats)
            .await
        {
            warn!("Failed to record job failure for {}: {}", job_id, e);
        }
        *self.state.write().await = CrawlerState::Error;
        *self.current_job.write().await = None;
        error
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| Error::Config(format!("Invalid pattern {}: {}", p, e))))
        .collect()
}
