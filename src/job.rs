//! Crawl job lifecycle types and external collaborator contracts
//!
//! The engine drives a crawl but does not own persistence: job records and
//! extracted documents live behind the [`JobManager`] and [`DocumentSink`]
//! traits, implemented by the embedding service (database, API, in-memory
//! store for tests).

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

/// Running counters for one crawl
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    /// URLs fetched and turned into documents
    pub pages_processed: u32,
    /// URLs skipped (robots disallow, depth bound, cached reuse)
    pub pages_skipped: u32,
    /// Chunks reported by the document sink
    pub total_chunks: u32,
    /// Per-URL recoverable error messages, in encounter order
    pub errors: Vec<String>,
}

impl CrawlStats {
    /// Human-readable summary of recoverable errors, if any occurred.
    ///
    /// A completed job with errors keeps `status = completed` and carries
    /// this summary in its `error` field; completion and "had errors" are
    /// orthogonal.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let shown = self.errors.iter().take(3).cloned().collect::<Vec<_>>();
        Some(format!(
            "{} error(s) during crawl: {}",
            self.errors.len(),
            shown.join("; ")
        ))
    }
}

/// A persisted crawl job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub status: JobStatus,
    /// Completion fraction in [0, 1]
    pub progress: f32,
    pub stats: CrawlStats,
    pub error: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a fresh pending job for a seed URL
    pub fn new(url: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            status: JobStatus::Pending,
            progress: 0.0,
            stats: CrawlStats::default(),
            error: None,
            start_date: None,
            end_date: None,
        }
    }
}

/// A document ready to be persisted by the sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub crawl_date: DateTime<Utc>,
    /// Depth at which the URL was discovered
    pub level: u32,
    pub job_id: String,
}

/// A document as stored by the sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub crawl_date: DateTime<Utc>,
    pub level: u32,
    pub job_id: String,
    /// Chunks the sink produced downstream (0 if it does no chunking)
    pub chunk_count: u32,
}

/// External job store consumed by the orchestrator.
///
/// Implementations must clamp `progress` to [0, 1]. `should_continue`
/// answers false only for cancelled/failed jobs; pausing is observed through
/// the crawler's own state, not through this method.
#[async_trait]
pub trait JobManager: Send + Sync {
    async fn create_job(&self, url: &str) -> Result<Job>;

    async fn find_job(&self, job_id: &str) -> Result<Option<Job>>;

    async fn update_progress(&self, job_id: &str, progress: f32, stats: &CrawlStats)
        -> Result<()>;

    /// Mark the job completed with final stats. Implementations set
    /// `progress = 1.0` and derive the `error` field from
    /// [`CrawlStats::error_summary`].
    async fn mark_completed(&self, job_id: &str, stats: &CrawlStats) -> Result<()>;

    async fn mark_failed(&self, job_id: &str, error: &str, stats: &CrawlStats) -> Result<()>;

    async fn should_continue(&self, job_id: &str) -> Result<bool>;

    async fn cancel_job(&self, job_id: &str) -> Result<()>;

    async fn pause_job(&self, job_id: &str) -> Result<()>;

    async fn resume_job(&self, job_id: &str) -> Result<()>;
}

/// External document store consumed by the orchestrator
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn create_document(&self, doc: NewDocument) -> Result<StoredDocument>;

    /// Find a document for `url` crawled within the last `max_age_days`,
    /// used to skip re-crawling freshly-seen pages.
    async fn find_recent_document(
        &self,
        url: &str,
        max_age_days: u32,
    ) -> Result<Option<StoredDocument>>;

    /// Attach a copy of an existing document to another job
    async fn copy_document(
        &self,
        existing: &StoredDocument,
        job_id: &str,
        level: u32,
    ) -> Result<StoredDocument>;
}
