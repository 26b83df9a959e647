use ink_lantern::config::Config;
use ink_lantern::crawler::{CrawlReport, CrawlSubmission, Crawler};
use ink_lantern::fetcher::PageFetcher;
use ink_lantern::session::scripted::ScriptedEngine;
use ink_lantern::session::SessionPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A configuration with timings short enough for tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pool.capacity = 3;
    config.pool.acquire_timeout_ms = 2_000;
    config.pool.creation_retries = 1;
    config.pool.creation_backoff_ms = 1;
    config.fetch.default_delay_ms = 1;
    config.fetch.navigation_timeout_ms = 1_000;
    config.challenge.timeout_ms = 300;
    config.challenge.poll_interval_ms = 10;
    config.challenge.solve_attempts = 0;
    config.crawler.concurrency = 3;
    config.crawler.idle_poll_ms = 10;
    config.crawler.retry_backoff_ms = 5;
    config.robots.fetch_timeout_ms = 2_000;
    config
}

pub fn crawler(engine: &ScriptedEngine, config: &Config) -> Crawler {
    let pool = SessionPool::from_config(Arc::new(engine.clone()), &config.pool);
    let fetcher = PageFetcher::from_config(pool, config, None);
    Crawler::new(config, Arc::new(fetcher))
}

/// Validates and runs a submission to completion
pub async fn run(
    engine: &ScriptedEngine,
    config: &Config,
    submission: CrawlSubmission,
) -> CrawlReport {
    let request = submission.validate().expect("Submission should validate");
    crawler(engine, config)
        .crawl(request, CancellationToken::new())
        .await
        .expect("Crawl should not abort")
}

/// A submission for a site that has no robots.txt server
pub fn offline(url: &str, max_depth: u32, max_pages: usize) -> CrawlSubmission {
    CrawlSubmission {
        max_depth,
        max_pages,
        respect_robots_txt: false,
        ..CrawlSubmission::new(url)
    }
}
