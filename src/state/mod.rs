//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlPhase`: Tracks the lifecycle of one crawl (running, draining, complete, aborted)

mod crawl_phase;

pub use crawl_phase::CrawlPhase;
