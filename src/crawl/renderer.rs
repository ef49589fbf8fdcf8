//! Headless-browser extraction for JavaScript-rendered pages
//!
//! Uses the Chrome DevTools Protocol via chromiumoxide. The browser is a
//! shared lazily-launched singleton reused across calls; each extraction
//! opens its own page and always closes it, on success and failure alike.
//! Compiled behind the `js-rendering` feature with an error-returning stub
//! otherwise, so the strategy selector can hold a rendered extractor either
//! way.

use crate::config::RendererConfig;
use crate::error::{Error, Result};

/// A page as produced by the headless browser
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Final URL after redirects
    pub url: String,
    /// Fully rendered DOM serialization
    pub html: String,
    pub title: Option<String>,
    pub render_time_ms: u64,
}

#[cfg(feature = "js-rendering")]
mod browser_impl {
    use super::*;
    use crate::crawl::detect::{detect_frameworks, visible_text_len, DynamicAnalyzer};
    use crate::crawl::extract::{
        parse_page, ContentExtractor, ExtractOptions, ExtractedContent, ExtractorKind,
    };
    use crate::crawl::links::LinkExtractor;
    use crate::crawl::PageType;
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use chromiumoxide::page::Page;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::{timeout, Instant};
    use tracing::{debug, info, warn};

    /// Headless-browser content extractor
    pub struct RenderedExtractor {
        config: RendererConfig,
        links: LinkExtractor,
        browser: Arc<Mutex<Option<Browser>>>,
        handler_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    }

    impl RenderedExtractor {
        pub fn new(config: RendererConfig) -> Self {
            Self {
                config,
                links: LinkExtractor::new(),
                browser: Arc::new(Mutex::new(None)),
                handler_handle: Arc::new(Mutex::new(None)),
            }
        }

        /// Launch the shared browser if it is not already running. A failed
        /// launch leaves the slot empty so the next call can retry.
        async fn ensure_browser(&self) -> Result<()> {
            let mut browser_guard = self.browser.lock().await;
            if browser_guard.is_some() {
                return Ok(());
            }

            info!("Launching headless browser...");

            let mut builder = BrowserConfig::builder()
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--disable-extensions");
            if !self.config.sandbox {
                builder = builder.no_sandbox();
            }
            if self.config.block_resources {
                // Keep renders cheap: no images, no remote fonts
                builder = builder
                    .arg("--blink-settings=imagesEnabled=false")
                    .arg("--disable-remote-fonts");
            }

            let browser_config = builder
                .build()
                .map_err(|e| Error::Render(format!("Failed to build browser config: {}", e)))?;

            let (browser, mut handler) = Browser::launch(browser_config)
                .await
                .map_err(|e| Error::Render(format!("Failed to launch browser: {}", e)))?;

            let handle = tokio::spawn(async move {
                while let Some(result) = handler.next().await {
                    if result.is_err() {
                        break;
                    }
                }
            });

            *browser_guard = Some(browser);
            *self.handler_handle.lock().await = Some(handle);

            info!("Headless browser ready");
            Ok(())
        }

        /// Render a page and return its final DOM
        pub async fn render(&self, url: &str, options: &ExtractOptions) -> Result<RenderedPage> {
            self.ensure_browser().await?;

            let start = Instant::now();
            debug!("Rendering: {}", url);

            let page = {
                let browser_guard = self.browser.lock().await;
                let browser = browser_guard
                    .as_ref()
                    .ok_or_else(|| Error::Render("Browser not initialized".to_string()))?;
                browser
                    .new_page(url)
                    .await
                    .map_err(|e| Error::Render(format!("Failed to open page: {}", e)))?
            };

            // The page must be closed whether rendering succeeded or not
            let rendered = self.render_on_page(&page, url, options).await;
            if let Err(e) = page.close().await {
                warn!("Failed to close page for {}: {}", url, e);
            }
            let (final_url, html, title) = rendered?;

            let render_time_ms = start.elapsed().as_millis() as u64;
            debug!("Rendered {} in {}ms ({} bytes)", url, render_time_ms, html.len());

            Ok(RenderedPage {
                url: final_url,
                html,
                title,
                render_time_ms,
            })
        }

        async fn render_on_page(
            &self,
            page: &Page,
            url: &str,
            options: &ExtractOptions,
        ) -> Result<(String, String, Option<String>)> {
            let load_timeout = Duration::from_millis(self.config.page_load_timeout_ms);
            timeout(load_timeout, page.wait_for_navigation())
                .await
                .map_err(|_| Error::Render(format!("Page load timeout: {}", url)))?
                .map_err(|e| Error::Render(format!("Navigation failed: {}", e)))?;

            let render_wait = options.render_wait_ms.unwrap_or(self.config.render_wait_ms);
            if render_wait > 0 {
                tokio::time::sleep(Duration::from_millis(render_wait)).await;
            }

            let selector = options
                .wait_for_selector
                .as_ref()
                .or(self.config.wait_for_selector.as_ref());
            if let Some(selector) = selector {
                let selector_timeout = Duration::from_secs(10);
                match timeout(selector_timeout, page.find_element(selector.as_str())).await {
                    Ok(Ok(_)) => debug!("Found selector: {}", selector),
                    Ok(Err(e)) => warn!("Selector {} not found: {}", selector, e),
                    Err(_) => warn!("Timeout waiting for selector: {}", selector),
                }
            }

            let final_url = page
                .url()
                .await
                .map_err(|e| Error::Render(format!("Failed to read URL: {}", e)))?
                .unwrap_or_else(|| url.to_string());

            let html = page
                .content()
                .await
                .map_err(|e| Error::Render(format!("Failed to read content: {}", e)))?;

            let title = page
                .evaluate("document.title")
                .await
                .ok()
                .and_then(|v| v.into_value::<String>().ok())
                .filter(|t| !t.is_empty());

            Ok((final_url, html, title))
        }

        /// Close all pages and the shared browser; safe to call repeatedly
        /// or before anything was launched
        pub async fn close(&self) -> Result<()> {
            let mut browser_guard = self.browser.lock().await;
            if let Some(mut browser) = browser_guard.take() {
                browser
                    .close()
                    .await
                    .map_err(|e| Error::Render(format!("Failed to close browser: {}", e)))?;
            }
            let mut handle_guard = self.handler_handle.lock().await;
            if let Some(handle) = handle_guard.take() {
                handle.abort();
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ContentExtractor for RenderedExtractor {
        async fn extract(&self, url: &str, options: &ExtractOptions) -> Result<ExtractedContent> {
            let rendered = self.render(url, options).await?;

            let mut content = parse_page(&rendered.url, &rendered.html);
            if content.title.is_none() {
                content.title = rendered.title;
            }

            let html_lower = rendered.html.to_lowercase();
            let frameworks = detect_frameworks(&rendered.html, &html_lower);
            if !frameworks.is_empty() {
                content
                    .metadata
                    .insert("spa_frameworks".to_string(), frameworks.join(", "));
            }
            content
                .metadata
                .insert("renderer".to_string(), "chromiumoxide".to_string());

            if options.extract_links {
                content.links =
                    self.links
                        .extract_links(&rendered.html, &rendered.url, &rendered.url)?;
            }
            Ok(content)
        }

        fn supports_page_type(&self, page_type: PageType) -> bool {
            page_type == PageType::Spa
        }

        fn kind(&self) -> ExtractorKind {
            ExtractorKind::Rendered
        }

        async fn cleanup(&self) -> Result<()> {
            self.close().await
        }
    }

    /// Dynamic analysis for the detector's hybrid path: render the page and
    /// score how much visible text appears only after script execution.
    pub struct RenderedDynamicAnalyzer {
        extractor: Arc<RenderedExtractor>,
    }

    impl RenderedDynamicAnalyzer {
        pub fn new(extractor: Arc<RenderedExtractor>) -> Self {
            Self { extractor }
        }
    }

    #[async_trait]
    impl DynamicAnalyzer for RenderedDynamicAnalyzer {
        async fn analyze(&self, url: &str, static_html: &str) -> Result<f32> {
            let rendered = self
                .extractor
                .render(url, &ExtractOptions::default())
                .await?;
            let static_len = visible_text_len(static_html) as f32;
            let rendered_len = visible_text_len(&rendered.html) as f32;
            if rendered_len <= 0.0 {
                return Ok(0.0);
            }
            Ok((1.0 - (static_len / rendered_len)).clamp(0.0, 1.0))
        }
    }
}

#[cfg(feature = "js-rendering")]
pub use browser_impl::{RenderedDynamicAnalyzer, RenderedExtractor};

/// Stub extractor compiled when the `js-rendering` feature is disabled.
/// Selecting it always fails the extraction call, which the orchestrator
/// treats as a per-URL recoverable error.
#[cfg(not(feature = "js-rendering"))]
pub struct RenderedExtractor {
    _config: RendererConfig,
}

#[cfg(not(feature = "js-rendering"))]
mod stub_impl {
    use super::*;
    use crate::crawl::extract::{ContentExtractor, ExtractOptions, ExtractedContent, ExtractorKind};
    use crate::crawl::PageType;
    use async_trait::async_trait;

    impl RenderedExtractor {
        pub fn new(config: RendererConfig) -> Self {
            Self { _config: config }
        }

        pub async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ContentExtractor for RenderedExtractor {
        async fn extract(&self, url: &str, _options: &ExtractOptions) -> Result<ExtractedContent> {
            Err(Error::Render(format!(
                "JavaScript rendering not available for {}. \
                 Compile with --features js-rendering to enable headless browser support.",
                url
            )))
        }

        fn supports_page_type(&self, page_type: PageType) -> bool {
            page_type == PageType::Spa
        }

        fn kind(&self) -> ExtractorKind {
            ExtractorKind::Rendered
        }

        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
    }
}

/// Whether headless rendering was compiled in
pub fn is_js_rendering_available() -> bool {
    cfg!(feature = "js-rendering")
}
