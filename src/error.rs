//! Custom error types for doccrawl

use thiserror::Error;

/// Main error type for crawl engine operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crawl error: {0}")]
    Crawl(String),

    #[error("HTTP {status}: {url}")]
    Fetch { status: u16, url: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Robots.txt disallowed: {0}")]
    RobotsDisallowed(String),

    #[error("Page-type detection failed: {0}")]
    Detection(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Job manager error: {0}")]
    Job(String),

    #[error("Document sink error: {0}")]
    Document(String),

    #[error("Invalid crawler state: {0}")]
    InvalidState(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
