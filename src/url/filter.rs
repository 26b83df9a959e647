//! Crawl politeness filter
//!
//! Decides which discovered links may enter the frontier. Checks run cheapest first:
//! domain scope, exclude patterns, include patterns, then robots.txt.

use crate::robots::RobotsCache;
use crate::url::domain::same_site;
use crate::url::links::extract_links;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

/// Outcome of the pure (non-robots) policy checks for one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Host differs from the crawl root
    OffSite,
    /// Matched an exclude pattern
    Excluded,
    /// Include patterns are configured and none matched
    NotIncluded,
}

/// Links accepted from one page plus counters for everything that was dropped
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Accepted URLs, deduplicated, in document order
    pub accepted: Vec<Url>,
    pub off_site: usize,
    pub excluded: usize,
    pub not_included: usize,
    pub robots_skipped: usize,
    pub duplicates: usize,
}

impl Extraction {
    /// Number of links dropped by domain or pattern policy
    pub fn filtered(&self) -> usize {
        self.off_site + self.excluded + self.not_included
    }
}

/// Domain and pattern policy for one crawl
#[derive(Debug, Clone)]
pub struct LinkFilter {
    root: Url,
    exclude: Vec<Regex>,
    include: Vec<Regex>,
}

impl LinkFilter {
    pub fn new(root: Url, exclude: Vec<Regex>, include: Vec<Regex>) -> Self {
        Self {
            root,
            exclude,
            include,
        }
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Applies domain and pattern policy to a normalized URL
    ///
    /// Patterns search anywhere in the URL string. An exclude match always wins, even
    /// over a matching include pattern.
    pub fn verdict(&self, url: &Url) -> Verdict {
        if !same_site(&self.root, url) {
            return Verdict::OffSite;
        }

        let candidate = url.as_str();

        if self.exclude.iter().any(|re| re.is_match(candidate)) {
            return Verdict::Excluded;
        }

        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(candidate)) {
            return Verdict::NotIncluded;
        }

        Verdict::Accept
    }

    /// Extracts the set of links on a page that the crawl may follow
    ///
    /// Robots rules are only consulted when a cache is supplied, and only for links
    /// that already passed the pure checks, so off-site hosts never cause a fetch.
    pub async fn extract(
        &self,
        markup: &str,
        page_url: &Url,
        robots: Option<&RobotsCache>,
    ) -> Extraction {
        let mut extraction = Extraction::default();
        let mut seen = HashSet::new();

        for link in extract_links(markup, page_url) {
            if !seen.insert(link.as_str().to_string()) {
                extraction.duplicates += 1;
                continue;
            }

            match self.verdict(&link) {
                Verdict::Accept => {}
                Verdict::OffSite => {
                    extraction.off_site += 1;
                    continue;
                }
                Verdict::Excluded => {
                    extraction.excluded += 1;
                    continue;
                }
                Verdict::NotIncluded => {
                    extraction.not_included += 1;
                    continue;
                }
            }

            if let Some(robots) = robots {
                if !robots.is_allowed(&link).await {
                    tracing::debug!("Skipping {} (disallowed by robots.txt)", link);
                    extraction.robots_skipped += 1;
                    continue;
                }
            }

            extraction.accepted.push(link);
        }

        extraction
    }
}
