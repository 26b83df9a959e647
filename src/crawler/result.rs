//! Crawl output records

use crate::challenge::ChallengeVendor;
use crate::convert::{ConvertError, Converted};
use crate::fetcher::{FetchMetricsSnapshot, FetchedPage};
use crate::session::PoolStatsSnapshot;
use crate::state::CrawlPhase;
use crate::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Serializable failure category stored on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ErrorKind {
    ResourceExhausted,
    Navigation,
    BotChallenge { vendor: ChallengeVendor },
    SessionUnavailable,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    RobotsDisallowed,
}

/// Terminal status of one attempted page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PageStatus {
    Success,
    Skipped { reason: SkipReason },
    Failed { kind: ErrorKind, message: String },
}

/// One attempted page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub url: String,
    /// Rendered markup; absent for failed and skipped pages
    pub raw_content: Option<String>,
    /// Crawl depth the page was discovered at
    pub discovered_at: u32,
    pub parent: Option<String>,
    pub status: PageStatus,
    pub title: Option<String>,
    pub final_url: Option<String>,
    pub status_code: Option<u16>,
    /// Accepted outgoing links
    #[serde(default)]
    pub links: Vec<String>,
    pub elapsed_ms: u64,
    pub challenge: Option<ChallengeVendor>,
    #[serde(default)]
    pub from_cache: bool,
    pub markdown: Option<String>,
    pub structured_data: Option<serde_json::Value>,
    pub conversion_error: Option<String>,
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
}

impl PageResult {
    fn blank(url: &str, depth: u32, parent: Option<String>, status: PageStatus) -> Self {
        Self {
            url: url.to_string(),
            raw_content: None,
            discovered_at: depth,
            parent,
            status,
            title: None,
            final_url: None,
            status_code: None,
            links: Vec::new(),
            elapsed_ms: 0,
            challenge: None,
            from_cache: false,
            markdown: None,
            structured_data: None,
            conversion_error: None,
            screenshot: None,
        }
    }

    pub fn success(page: FetchedPage, depth: u32, parent: Option<String>) -> Self {
        Self {
            raw_content: Some(page.markup),
            title: page.title,
            final_url: Some(page.final_url),
            status_code: page.status_code,
            elapsed_ms: page.elapsed_ms,
            challenge: page.challenge,
            from_cache: page.from_cache,
            screenshot: page.screenshot,
            ..Self::blank(&page.url, depth, parent, PageStatus::Success)
        }
    }

    pub fn failure(
        url: &str,
        depth: u32,
        parent: Option<String>,
        error: &FetchError,
        elapsed_ms: u64,
    ) -> Self {
        let status = PageStatus::Failed {
            kind: error.kind(),
            message: error.to_string(),
        };
        let challenge = match error {
            FetchError::BotChallenge { vendor, .. } => Some(*vendor),
            _ => None,
        };
        Self {
            elapsed_ms,
            challenge,
            ..Self::blank(url, depth, parent, status)
        }
    }

    pub fn skipped(url: &str, depth: u32, parent: Option<String>, reason: SkipReason) -> Self {
        Self::blank(url, depth, parent, PageStatus::Skipped { reason })
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, PageStatus::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, PageStatus::Failed { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.status {
            PageStatus::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Attaches converter output; an error is recorded, the page stays successful
    pub fn apply_conversion(&mut self, converted: Result<Converted, ConvertError>) {
        match converted {
            Ok(converted) => {
                self.markdown = Some(converted.markdown);
                self.structured_data = Some(converted.structured_data);
            }
            Err(e) => {
                tracing::warn!("Conversion of {} failed: {}", self.url, e);
                self.conversion_error = Some(e.to_string());
            }
        }
    }
}

/// Counters for one crawl
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlStats {
    pub pages_succeeded: usize,
    pub pages_failed: usize,
    pub pages_skipped: usize,
    pub robots_skipped: usize,
    /// Links dropped by domain or pattern policy
    pub links_filtered: usize,
    pub links_duplicate: usize,
    pub already_visited: usize,
    pub too_deep: usize,
    pub budget_exhausted: usize,
    /// Local retries after `ResourceExhausted`
    pub exhausted_retries: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl CrawlStats {
    pub fn started() -> Self {
        Self {
            pages_succeeded: 0,
            pages_failed: 0,
            pages_skipped: 0,
            robots_skipped: 0,
            links_filtered: 0,
            links_duplicate: 0,
            already_visited: 0,
            too_deep: 0,
            budget_exhausted: 0,
            exhausted_retries: 0,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
        }
    }

    pub fn record_page(&mut self, page: &PageResult) {
        match page.status {
            PageStatus::Success => self.pages_succeeded += 1,
            PageStatus::Skipped { .. } => self.pages_skipped += 1,
            PageStatus::Failed { .. } => self.pages_failed += 1,
        }
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(now);
    }

    pub fn pages_total(&self) -> usize {
        self.pages_succeeded + self.pages_failed + self.pages_skipped
    }
}

/// Everything a crawl produced
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlReport {
    pub crawl_id: Uuid,
    pub root: String,
    pub phase: CrawlPhase,
    pub abort_reason: Option<String>,
    /// Ordered by depth, then discovery order
    pub pages: Vec<PageResult>,
    pub stats: CrawlStats,
    pub pool: PoolStatsSnapshot,
    pub fetch: FetchMetricsSnapshot,
}

impl CrawlReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &PageResult> {
        self.pages.iter().filter(|p| p.is_success())
    }

    pub fn page(&self, url: &str) -> Option<&PageResult> {
        self.pages.iter().find(|p| p.url == url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionError;

    fn fetched() -> FetchedPage {
        FetchedPage {
            url: "https://example.com/".to_string(),
            final_url: "https://example.com/".to_string(),
            status_code: Some(200),
            title: Some("Home".to_string()),
            markup: "<p>hi</p>".to_string(),
            screenshot: None,
            challenge: None,
            elapsed_ms: 12,
            from_cache: false,
        }
    }

    #[test]
    fn test_success_record_shape() {
        let result = PageResult::success(fetched(), 0, None);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["url"], "https://example.com/");
        assert_eq!(json["rawContent"], "<p>hi</p>");
        assert_eq!(json["discoveredAt"], 0);
        assert_eq!(json["status"]["state"], "success");
        assert!(json.get("screenshot").is_none());
    }

    #[test]
    fn test_failure_carries_kind_and_vendor() {
        let error = FetchError::BotChallenge {
            url: "https://example.com/a".to_string(),
            vendor: ChallengeVendor::Cloudflare,
            evidence: "title".to_string(),
        };
        let result = PageResult::failure(
            "https://example.com/a",
            1,
            Some("https://example.com/".to_string()),
            &error,
            30,
        );

        assert!(result.is_failed());
        assert_eq!(result.challenge, Some(ChallengeVendor::Cloudflare));
        assert_eq!(
            result.error_kind(),
            Some(ErrorKind::BotChallenge {
                vendor: ChallengeVendor::Cloudflare
            })
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"]["state"], "failed");
        assert_eq!(json["status"]["kind"]["type"], "botChallenge");
        assert_eq!(json["status"]["kind"]["vendor"], "cloudflare");
        assert!(json["rawContent"].is_null());
    }

    #[test]
    fn test_navigation_failure_message() {
        let error = FetchError::Navigation {
            url: "https://example.com/".to_string(),
            source: SessionError::ElementNotFound("#x".to_string()),
        };
        let result = PageResult::failure("https://example.com/", 0, None, &error, 1);
        assert_eq!(result.error_kind(), Some(ErrorKind::Navigation));
        match &result.status {
            PageStatus::Failed { message, .. } => assert!(message.contains("example.com")),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_conversion_error_keeps_success() {
        let mut result = PageResult::success(fetched(), 0, None);
        result.apply_conversion(Err(ConvertError::Markdown("boom".to_string())));

        assert!(result.is_success());
        assert!(result.markdown.is_none());
        assert!(result.conversion_error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn test_stats_counting() {
        let mut stats = CrawlStats::started();
        stats.record_page(&PageResult::success(fetched(), 0, None));
        stats.record_page(&PageResult::skipped(
            "https://example.com/private",
            1,
            None,
            SkipReason::RobotsDisallowed,
        ));
        stats.finish();

        assert_eq!(stats.pages_succeeded, 1);
        assert_eq!(stats.pages_skipped, 1);
        assert_eq!(stats.pages_total(), 2);
        assert!(stats.finished_at.is_some());
    }
}
