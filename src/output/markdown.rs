//! Markdown summary generation
//!
//! This module generates a human-readable markdown summary of a crawl report,
//! including statistics, the depth breakdown, failures and challenge activity.

use crate::crawler::{CrawlReport, ErrorKind, PageStatus};
use crate::output::OutputResult;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown summary of a report
///
/// # Arguments
///
/// * `report` - The finished crawl report
/// * `config_hash` - Hash of the configuration the crawl ran with, if known
/// * `output_path` - Path where the markdown file should be written
pub fn generate_markdown_summary(
    report: &CrawlReport,
    config_hash: Option<&str>,
    output_path: &Path,
) -> OutputResult<()> {
    let markdown = format_markdown_summary(report, config_hash);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

fn kind_label(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::ResourceExhausted => "Resource exhausted".to_string(),
        ErrorKind::Navigation => "Navigation".to_string(),
        ErrorKind::BotChallenge { vendor } => format!("Bot challenge ({})", vendor),
        ErrorKind::SessionUnavailable => "Session unavailable".to_string(),
        ErrorKind::Cancelled => "Cancelled".to_string(),
    }
}

/// Formats a crawl report as markdown
pub fn format_markdown_summary(report: &CrawlReport, config_hash: Option<&str>) -> String {
    let stats = &report.stats;
    let mut md = String::new();

    // Title
    md.push_str("# Ink-Lantern Crawl Summary\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Crawl ID**: {}\n", report.crawl_id));
    md.push_str(&format!("- **Root**: {}\n", report.root));
    md.push_str(&format!("- **Started**: {}\n", stats.started_at.to_rfc3339()));
    if let Some(finished) = &stats.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished.to_rfc3339()));
    }
    md.push_str(&format!(
        "- **Duration**: {} ms ({:.2} seconds)\n",
        stats.duration_ms,
        stats.duration_ms as f64 / 1000.0
    ));
    md.push_str(&format!("- **Phase**: {}\n", report.phase));
    if let Some(reason) = &report.abort_reason {
        md.push_str(&format!("- **Abort Reason**: {}\n", reason));
    }
    if let Some(hash) = config_hash {
        md.push_str(&format!("- **Config Hash**: {}\n", hash));
    }
    md.push('\n');

    // Overall statistics
    let total = stats.pages_total();
    let success_rate = if total == 0 {
        0.0
    } else {
        stats.pages_succeeded as f64 / total as f64 * 100.0
    };
    md.push_str("## Overall Statistics\n\n");
    md.push_str("| Metric | Count |\n");
    md.push_str("|--------|-------|\n");
    md.push_str(&format!("| Pages | {} |\n", total));
    md.push_str(&format!("| Succeeded | {} |\n", stats.pages_succeeded));
    md.push_str(&format!("| Failed | {} |\n", stats.pages_failed));
    md.push_str(&format!("| Skipped | {} |\n", stats.pages_skipped));
    md.push_str(&format!("| Robots Skipped | {} |\n", stats.robots_skipped));
    md.push_str(&format!("| Links Filtered | {} |\n", stats.links_filtered));
    md.push_str(&format!("| Beyond Max Depth | {} |\n", stats.too_deep));
    md.push_str(&format!("| Over Page Budget | {} |\n", stats.budget_exhausted));
    md.push_str(&format!("| Pool Retries | {} |\n\n", stats.exhausted_retries));
    md.push_str(&format!("**Success Rate**: {:.2}%\n\n", success_rate));

    // Depth breakdown
    let mut depths: BTreeMap<u32, usize> = BTreeMap::new();
    for page in &report.pages {
        *depths.entry(page.discovered_at).or_default() += 1;
    }
    if !depths.is_empty() {
        md.push_str("## Depth Breakdown\n\n");
        md.push_str("| Depth | Pages |\n");
        md.push_str("|-------|-------|\n");
        for (depth, count) in &depths {
            md.push_str(&format!("| {} | {} |\n", depth, count));
        }
        md.push('\n');
    }

    // Failures
    let failures: Vec<_> = report
        .pages
        .iter()
        .filter_map(|page| match &page.status {
            PageStatus::Failed { kind, message } => Some((page, kind, message)),
            _ => None,
        })
        .collect();
    if !failures.is_empty() {
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for (_, kind, _) in &failures {
            *by_kind.entry(kind_label(kind)).or_default() += 1;
        }

        md.push_str("## Error Summary\n\n");
        md.push_str("| Error Type | Count |\n");
        md.push_str("|------------|-------|\n");
        for (label, count) in &by_kind {
            md.push_str(&format!("| {} | {} |\n", label, count));
        }
        md.push('\n');

        md.push_str("## Top 20 Failed URLs\n\n");
        md.push_str("| URL | Error |\n");
        md.push_str("|-----|-------|\n");
        for (page, kind, _) in failures.iter().take(20) {
            md.push_str(&format!("| {} | {} |\n", page.url, kind_label(kind)));
        }
        if failures.len() > 20 {
            md.push_str(&format!("\n... and {} more\n", failures.len() - 20));
        }
        md.push('\n');
    }

    // Challenges
    let challenges = &report.fetch.challenges;
    if challenges.detected > 0 {
        md.push_str("## Challenges\n\n");
        md.push_str(&format!("- **Detected**: {}\n", challenges.detected));
        md.push_str(&format!("- **Resolved**: {}\n", challenges.resolved));
        md.push_str(&format!("- **Timed Out**: {}\n\n", challenges.failed));
    }

    // Session pool
    md.push_str("## Session Pool\n\n");
    md.push_str(&format!("- **Sessions Created**: {}\n", report.pool.created));
    md.push_str(&format!("- **Sessions Destroyed**: {}\n", report.pool.destroyed));
    md.push_str(&format!("- **Leases**: {}\n", report.pool.leases));
    md.push_str(&format!(
        "- **Unhealthy Releases**: {}\n",
        report.pool.unhealthy_releases
    ));
    md.push_str(&format!("- **Exhausted Waits**: {}\n", report.pool.exhausted));

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeVendor;
    use crate::crawler::{CrawlStats, PageResult, SkipReason};
    use crate::fetcher::{FetchMetricsSnapshot, FetchedPage};
    use crate::session::PoolStatsSnapshot;
    use crate::state::CrawlPhase;
    use crate::FetchError;
    use uuid::Uuid;

    fn create_test_report() -> CrawlReport {
        let root = FetchedPage {
            url: "https://example.com/".to_string(),
            final_url: "https://example.com/".to_string(),
            status_code: Some(200),
            title: Some("Home".to_string()),
            markup: "<main>hi</main>".to_string(),
            screenshot: None,
            challenge: None,
            elapsed_ms: 40,
            from_cache: false,
        };
        let challenge = FetchError::BotChallenge {
            url: "https://example.com/guarded".to_string(),
            vendor: ChallengeVendor::Cloudflare,
            evidence: "title".to_string(),
        };
        let pages = vec![
            PageResult::success(root, 0, None),
            PageResult::failure(
                "https://example.com/guarded",
                1,
                Some("https://example.com/".to_string()),
                &challenge,
                30_000,
            ),
            PageResult::skipped(
                "https://example.com/private",
                1,
                Some("https://example.com/".to_string()),
                SkipReason::RobotsDisallowed,
            ),
        ];

        let mut stats = CrawlStats::started();
        for page in &pages {
            stats.record_page(page);
        }
        stats.finish();

        CrawlReport {
            crawl_id: Uuid::nil(),
            root: "https://example.com/".to_string(),
            phase: CrawlPhase::Complete,
            abort_reason: None,
            pages,
            stats,
            pool: PoolStatsSnapshot::default(),
            fetch: FetchMetricsSnapshot::default(),
        }
    }

    #[test]
    fn test_format_markdown_summary() {
        let report = create_test_report();
        let markdown = format_markdown_summary(&report, Some("abc123"));

        assert!(markdown.contains("# Ink-Lantern Crawl Summary"));
        assert!(markdown.contains("Crawl ID"));
        assert!(markdown.contains("Overall Statistics"));
        assert!(markdown.contains("- **Phase**: COMPLETE"));
        assert!(markdown.contains("- **Config Hash**: abc123"));
        assert!(!markdown.contains("Abort Reason"));
    }

    #[test]
    fn test_markdown_contains_statistics() {
        let markdown = format_markdown_summary(&create_test_report(), None);

        assert!(markdown.contains("| Pages | 3 |"));
        assert!(markdown.contains("| Succeeded | 1 |"));
        assert!(markdown.contains("| Skipped | 1 |"));
        assert!(markdown.contains("**Success Rate**: 33.33%"));
    }

    #[test]
    fn test_markdown_with_depth_breakdown() {
        let markdown = format_markdown_summary(&create_test_report(), None);

        assert!(markdown.contains("Depth Breakdown"));
        assert!(markdown.contains("| 0 | 1 |"));
        assert!(markdown.contains("| 1 | 2 |"));
    }

    #[test]
    fn test_markdown_with_failures() {
        let markdown = format_markdown_summary(&create_test_report(), None);

        assert!(markdown.contains("Error Summary"));
        assert!(markdown.contains("| Bot challenge (Cloudflare) | 1 |"));
        assert!(markdown.contains("| https://example.com/guarded | Bot challenge (Cloudflare) |"));
    }

    #[test]
    fn test_markdown_aborted() {
        let mut report = create_test_report();
        report.phase = CrawlPhase::Aborted;
        report.abort_reason = Some("crawl cancelled".to_string());

        let markdown = format_markdown_summary(&report, None);
        assert!(markdown.contains("- **Abort Reason**: crawl cancelled"));
    }
}
