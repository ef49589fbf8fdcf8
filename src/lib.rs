//! doccrawl: crawl orchestration engine for documentation websites
//!
//! The engine walks a documentation site from a seed URL, chooses the right
//! extraction strategy per page (plain HTTP for static HTML, a headless
//! browser for JavaScript-rendered SPAs), and hands extracted documents to
//! the embedding application through the [`job::DocumentSink`] trait. Job
//! lifecycle (persistence, cancellation, progress) lives behind
//! [`job::JobManager`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use doccrawl::{config::CrawlConfig, crawl::Crawler};
//! # use doccrawl::job::{JobManager, DocumentSink};
//! # async fn example(jobs: Arc<dyn JobManager>, documents: Arc<dyn DocumentSink>)
//! #     -> doccrawl::error::Result<()> {
//! let crawler = Crawler::new(CrawlConfig::default(), jobs.clone(), documents)?;
//! let job = jobs.create_job("https://docs.example.com/").await?;
//! let stats = crawler.crawl(&job.id, &job.url).await?;
//! println!("{} pages processed", stats.pages_processed);
//! # Ok(())
//! # }
//! ```
//!
//! Compile with `--features js-rendering` to enable the chromiumoxide
//! headless-browser extractor; without it, pages classified as SPAs fail
//! with a recoverable per-URL error.

pub mod config;
pub mod crawl;
pub mod error;
pub mod job;

pub use config::CrawlConfig;
pub use crawl::{CrawlProgress, Crawler, CrawlerState, ExtractedContent, ExtractorKind, PageType};
pub use error::{Error, Result};
pub use job::{CrawlStats, DocumentSink, Job, JobManager, JobStatus};
