//! Crawler module
//!
//! This module contains the crawl itself:
//! - Submission validation
//! - The frontier and visited set
//! - Worker coordination over the session pool
//! - Per-page results and the final report

mod coordinator;
mod frontier;
mod request;
mod result;

pub use coordinator::Crawler;
pub use frontier::{EnqueueOutcome, Frontier, FrontierEntry};
pub use request::{CrawlRequest, CrawlSubmission, MAX_DEPTH_RANGE, MAX_PAGES_RANGE};
pub use result::{CrawlReport, CrawlStats, ErrorKind, PageResult, PageStatus, SkipReason};
