//! Extractor selection
//!
//! Maps a page-type verdict (or a configured override) to the extractor that
//! should handle the page. A forced strategy bypasses detection entirely, so
//! a crawl pinned to the static extractor never touches the network for
//! classification.

use std::sync::Arc;

use tracing::{debug, warn};

use super::detect::{PageType, PageTypeDetector};
use super::extract::{ContentExtractor, ExtractorKind};

pub struct StrategySelector {
    static_extractor: Arc<dyn ContentExtractor>,
    rendered_extractor: Arc<dyn ContentExtractor>,
    detector: Arc<PageTypeDetector>,
    forced: Option<ExtractorKind>,
}

impl StrategySelector {
    pub fn new(
        static_extractor: Arc<dyn ContentExtractor>,
        rendered_extractor: Arc<dyn ContentExtractor>,
        detector: Arc<PageTypeDetector>,
        forced: Option<ExtractorKind>,
    ) -> Self {
        Self {
            static_extractor,
            rendered_extractor,
            detector,
            forced,
        }
    }

    /// Pick the extractor for a URL. `html`, when already fetched, is passed
    /// through to the detector so it can classify without another request.
    ///
    /// Detection failures are recoverable here: the crawl continues with the
    /// static extractor rather than dropping the page.
    pub async fn extractor_for_url(
        &self,
        url: &str,
        html: Option<&str>,
    ) -> Arc<dyn ContentExtractor> {
        if let Some(kind) = self.forced {
            debug!("Using forced extraction strategy {:?} for {}", kind, url);
            return self.extractor_for_kind(kind);
        }

        match self.detector.detect(url, html).await {
            Ok(result) => {
                debug!(
                    "Detected {:?} (confidence {:.2}) for {}",
                    result.page_type, result.confidence, url
                );
                self.extractor_for_page_type(result.page_type)
            }
            Err(e) => {
                warn!(
                    "Page type detection failed for {}, falling back to static extraction: {}",
                    url, e
                );
                Arc::clone(&self.static_extractor)
            }
        }
    }

    /// Direct page-type to extractor mapping, no detection involved
    pub fn extractor_for_page_type(&self, page_type: PageType) -> Arc<dyn ContentExtractor> {
        match page_type {
            PageType::Static => Arc::clone(&self.static_extractor),
            PageType::Spa => Arc::clone(&self.rendered_extractor),
        }
    }

    fn extractor_for_kind(&self, kind: ExtractorKind) -> Arc<dyn ContentExtractor> {
        match kind {
            ExtractorKind::Static => Arc::clone(&self.static_extractor),
            ExtractorKind::Rendered => Arc::clone(&self.rendered_extractor),
        }
    }

    pub fn forced_strategy(&self) -> Option<ExtractorKind> {
        self.forced
    }

    /// Release resources held by either extractor
    pub async fn cleanup(&self) -> crate::error::Result<()> {
        self.static_extractor.cleanup().await?;
        self.rendered_extractor.cleanup().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrawlConfig, DetectorConfig, RendererConfig};
    use crate::crawl::extract::StaticExtractor;
    use crate::crawl::renderer::RenderedExtractor;

    fn build_selector(forced: Option<ExtractorKind>) -> StrategySelector {
        let config = CrawlConfig::default();
        let static_extractor: Arc<dyn ContentExtractor> =
            Arc::new(StaticExtractor::new(&config).unwrap());
        let rendered_extractor: Arc<dyn ContentExtractor> =
            Arc::new(RenderedExtractor::new(RendererConfig::default()));
        let client = reqwest::Client::new();
        let detector = Arc::new(PageTypeDetector::new(client, DetectorConfig::default()));
        StrategySelector::new(static_extractor, rendered_extractor, detector, forced)
    }

    #[test]
    fn test_page_type_mapping() {
        let selector = build_selector(None);
        assert_eq!(
            selector.extractor_for_page_type(PageType::Static).kind(),
            ExtractorKind::Static
        );
        assert_eq!(
            selector.extractor_for_page_type(PageType::Spa).kind(),
            ExtractorKind::Rendered
        );
    }

    #[tokio::test]
    async fn test_forced_strategy_skips_detection() {
        // Unreachable URL: detection would fail loudly, but a forced
        // strategy must never consult the detector at all.
        let selector = build_selector(Some(ExtractorKind::Static));
        let extractor = selector
            .extractor_for_url("http://127.0.0.1:1/never-fetched", None)
            .await;
        assert_eq!(extractor.kind(), ExtractorKind::Static);
    }

    #[tokio::test]
    async fn test_forced_rendered_strategy() {
        let selector = build_selector(Some(ExtractorKind::Rendered));
        let extractor = selector
            .extractor_for_url("http://127.0.0.1:1/never-fetched", None)
            .await;
        assert_eq!(extractor.kind(), ExtractorKind::Rendered);
    }

    #[tokio::test]
    async fn test_detection_failure_falls_back_to_static() {
        let selector = build_selector(None);
        let extractor = selector
            .extractor_for_url("http://127.0.0.1:1/unreachable", None)
            .await;
        assert_eq!(extractor.kind(), ExtractorKind::Static);
    }
}
