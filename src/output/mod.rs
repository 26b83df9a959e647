//! Output module for crawl reports
//!
//! This module handles:
//! - Writing the full crawl report as JSON
//! - Generating markdown summaries of crawl results

mod json;
mod markdown;

pub use json::{to_json, write_json_report};
pub use markdown::{format_markdown_summary, generate_markdown_summary};

use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to format output: {0}")]
    Format(#[from] serde_json::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
