//! Ink-Lantern: a rendering crawler
//!
//! This crate drives a bounded pool of headless rendering sessions to fetch pages that
//! need script execution, waits out anti-automation challenges, and crawls a site
//! breadth-first under depth, page-count, pattern and robots.txt constraints.

pub mod challenge;
pub mod config;
pub mod convert;
pub mod crawler;
pub mod fetcher;
pub mod output;
pub mod robots;
pub mod session;
pub mod state;
pub mod url;

use std::time::Duration;
use thiserror::Error;

/// Main error type for crawl-level operations
#[derive(Debug, Error)]
pub enum LanternError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid crawl submission: {0}")]
    Validation(String),

    #[error("Crawl aborted at {url}: {reason}")]
    CrawlAborted { url: String, reason: String },

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Session pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Invalid crawl transition: {from} -> {to}")]
    InvalidTransition {
        from: state::CrawlPhase,
        to: state::CrawlPhase,
    },

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Errors raised by the rendering session pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every session stayed leased for the whole wait; this is backpressure, not a crash
    #[error("No rendering session became free within {waited:?}")]
    Exhausted { waited: Duration },

    #[error("Failed to create a rendering session after {attempts} attempts: {message}")]
    CreationFailed { attempts: u32, message: String },

    #[error("Session pool is unavailable: {0}")]
    Unavailable(String),

    #[error("Session pool is shut down")]
    Closed,
}

/// Errors reported by a rendering engine or one of its sessions
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Failed to launch rendering session: {0}")]
    Launch(String),

    #[error("Rendering protocol error: {0}")]
    Protocol(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("No element matches selector '{0}'")]
    ElementNotFound(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Rendering session is closed")]
    Closed,
}

impl SessionError {
    /// Returns true if the session may be left in an unknown state after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Launch(_) | Self::Protocol(_) | Self::Timeout { .. } | Self::Closed
        )
    }
}

/// Page-level fetch errors
///
/// These never cross a crawl worker boundary; the crawler folds them into the
/// page's result.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Session pool exhausted after waiting {waited:?}")]
    ResourceExhausted { waited: Duration },

    #[error("Navigation failed for {url}: {source}")]
    Navigation { url: String, source: SessionError },

    #[error("Unresolved {vendor} challenge at {url} ({evidence})")]
    BotChallenge {
        url: String,
        vendor: challenge::ChallengeVendor,
        evidence: String,
    },

    #[error("No rendering session available: {0}")]
    SessionUnavailable(PoolError),

    #[error("Fetch of {url} was cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    /// Returns the serializable error category stored on page results
    pub fn kind(&self) -> crawler::ErrorKind {
        use crawler::ErrorKind;
        match self {
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::Navigation { .. } => ErrorKind::Navigation,
            Self::BotChallenge { vendor, .. } => ErrorKind::BotChallenge { vendor: *vendor },
            Self::SessionUnavailable(_) => ErrorKind::SessionUnavailable,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Returns true if the session that produced this error must not be reused
    pub fn is_session_fault(&self) -> bool {
        match self {
            Self::Navigation { source, .. } => source.is_fatal(),
            Self::Cancelled { .. } => true,
            Self::ResourceExhausted { .. }
            | Self::BotChallenge { .. }
            | Self::SessionUnavailable(_) => false,
        }
    }

    /// Returns true if the pool can no longer produce sessions
    pub fn is_pool_fatal(&self) -> bool {
        matches!(self, Self::SessionUnavailable(_))
    }
}

impl From<PoolError> for FetchError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { waited } => Self::ResourceExhausted { waited },
            other => Self::SessionUnavailable(other),
        }
    }
}

/// Result type alias for crawl-level operations
pub type Result<T> = std::result::Result<T, LanternError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlReport, CrawlRequest, CrawlSubmission, Crawler, PageResult};
pub use fetcher::{FetchOptions, PageFetcher};
pub use session::{ChromiumEngine, SessionPool};
pub use state::CrawlPhase;
pub use url::{normalize_url, LinkFilter};
