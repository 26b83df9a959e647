//! Crawl submission and its validated form

use crate::fetcher::FetchOptions;
use crate::url::{normalize_url, LinkFilter};
use crate::LanternError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use url::Url;
use uuid::Uuid;

pub const MAX_DEPTH_RANGE: RangeInclusive<u32> = 1..=10;
pub const MAX_PAGES_RANGE: RangeInclusive<usize> = 1..=1000;

fn default_max_depth() -> u32 {
    2
}

fn default_max_pages() -> usize {
    100
}

fn default_true() -> bool {
    true
}

/// A crawl as submitted by a caller, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlSubmission {
    pub url: String,

    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    #[serde(default)]
    pub include_patterns: Vec<String>,

    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,

    #[serde(default)]
    pub crawl_id: Option<Uuid>,

    /// Applied to every page of the crawl
    #[serde(default)]
    pub options: FetchOptions,
}

impl CrawlSubmission {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
            respect_robots_txt: true,
            crawl_id: None,
            options: FetchOptions::default(),
        }
    }

    /// Checks ranges, normalizes the root and compiles the patterns
    ///
    /// Nothing is fetched; any failure here is a `LanternError::Validation`.
    pub fn validate(self) -> Result<CrawlRequest, LanternError> {
        let root = normalize_url(&self.url)
            .map_err(|e| LanternError::Validation(format!("url '{}': {}", self.url, e)))?;

        if !MAX_DEPTH_RANGE.contains(&self.max_depth) {
            return Err(LanternError::Validation(format!(
                "max_depth must be within {}..={}, got {}",
                MAX_DEPTH_RANGE.start(),
                MAX_DEPTH_RANGE.end(),
                self.max_depth
            )));
        }

        if !MAX_PAGES_RANGE.contains(&self.max_pages) {
            return Err(LanternError::Validation(format!(
                "max_pages must be within {}..={}, got {}",
                MAX_PAGES_RANGE.start(),
                MAX_PAGES_RANGE.end(),
                self.max_pages
            )));
        }

        let exclude = compile_patterns("exclude", &self.exclude_patterns)?;
        let include = compile_patterns("include", &self.include_patterns)?;

        Ok(CrawlRequest {
            crawl_id: self.crawl_id.unwrap_or_else(Uuid::new_v4),
            root,
            max_depth: self.max_depth,
            max_pages: self.max_pages,
            exclude,
            include,
            respect_robots_txt: self.respect_robots_txt,
            options: self.options,
        })
    }
}

fn compile_patterns(kind: &str, patterns: &[String]) -> Result<Vec<Regex>, LanternError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                LanternError::Validation(format!("invalid {} pattern '{}': {}", kind, p, e))
            })
        })
        .collect()
}

/// A validated crawl; immutable once the crawl starts
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub crawl_id: Uuid,
    /// Normalized root URL
    pub root: Url,
    pub max_depth: u32,
    pub max_pages: usize,
    pub exclude: Vec<Regex>,
    pub include: Vec<Regex>,
    pub respect_robots_txt: bool,
    pub options: FetchOptions,
}

impl CrawlRequest {
    pub fn link_filter(&self) -> LinkFilter {
        LinkFilter::new(self.root.clone(), self.exclude.clone(), self.include.clone())
    }
}
