//! Crawl coordinator
//!
//! Owns one crawl from submission to report:
//! - fetches the root alone, aborting the crawl if it fails
//! - runs a fixed set of workers over a shared frontier and session pool
//! - folds every page-level error into that page's result
//! - aborts with partial results if the pool dies, the deadline passes or the caller cancels

use crate::config::{Config, CrawlerConfig, RobotsConfig};
use crate::convert::{ContentConverter, MarkdownConverter};
use crate::crawler::frontier::{EnqueueOutcome, Frontier, FrontierEntry};
use crate::crawler::request::CrawlRequest;
use crate::crawler::result::{CrawlReport, CrawlStats, PageResult, SkipReason};
use crate::fetcher::{FetchedPage, PageFetcher};
use crate::robots::RobotsCache;
use crate::state::CrawlPhase;
use crate::url::{Extraction, LinkFilter};
use crate::{FetchError, LanternError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Runs crawls against one page fetcher
pub struct Crawler {
    config: CrawlerConfig,
    robots: RobotsConfig,
    fetcher: Arc<PageFetcher>,
    converter: Arc<dyn ContentConverter>,
}

impl Crawler {
    pub fn new(config: &Config, fetcher: Arc<PageFetcher>) -> Self {
        Self {
            config: config.crawler.clone(),
            robots: config.robots.clone(),
            fetcher,
            converter: Arc::new(MarkdownConverter),
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn ContentConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn fetcher(&self) -> &PageFetcher {
        &self.fetcher
    }

    /// Number of workers a crawl runs
    pub fn workers(&self) -> usize {
        self.config
            .concurrency
            .min(self.fetcher.pool().capacity())
            .max(1)
    }

    /// Crawls from the request's root until the frontier drains or the budget is spent
    ///
    /// # Errors
    ///
    /// * `LanternError::CrawlAborted` - the root page could not be fetched
    /// * `LanternError::Reqwest` - the robots.txt client could not be built
    /// * `LanternError::InvalidTransition` - the crawl phase machine was misused
    ///
    /// Every other failure ends up in the report.
    pub async fn crawl(
        &self,
        request: CrawlRequest,
        cancel: CancellationToken,
    ) -> Result<CrawlReport, LanternError> {
        let robots = if request.respect_robots_txt {
            Some(RobotsCache::new(&self.robots)?)
        } else {
            None
        };

        tracing::info!(
            "Starting crawl {} of {} (max depth {}, max pages {}, {} workers)",
            request.crawl_id,
            request.root,
            request.max_depth,
            request.max_pages,
            self.workers()
        );

        let token = cancel.child_token();
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let deadline = self
            .config
            .deadline()
            .map(|limit| spawn_deadline(limit, token.clone(), deadline_hit.clone()));

        let run = Arc::new(CrawlRun {
            filter: request.link_filter(),
            frontier: Frontier::new(
                request.max_depth,
                request.max_pages,
                self.config.idle_poll(),
            ),
            robots,
            fetcher: self.fetcher.clone(),
            converter: self.converter.clone(),
            exhausted_retries: self.config.exhausted_retries,
            retry_backoff: self.config.retry_backoff(),
            cancel: token.clone(),
            ledger: Mutex::new(Ledger {
                pages: Vec::new(),
                stats: CrawlStats::started(),
            }),
            abort_reason: OnceLock::new(),
            processed: AtomicUsize::new(0),
            started: Instant::now(),
            request,
        });

        let result = self.drive(&run).await;

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let mut phase = result?;

        if run.abort_reason.get().is_none() && token.is_cancelled() {
            let reason = if deadline_hit.load(Ordering::SeqCst) {
                "crawl deadline reached"
            } else {
                "crawl cancelled"
            };
            let _ = run.abort_reason.set(reason.to_string());
            // Sessions may still hold half-finished navigations
            self.fetcher.pool().invalidate_all().await;
        }

        phase = match run.abort_reason.get() {
            Some(reason) => {
                tracing::warn!("Crawl {} aborted: {}", run.request.crawl_id, reason);
                phase.transition(CrawlPhase::Aborted)?
            }
            None => phase.transition(CrawlPhase::Complete)?,
        };

        Ok(run.report(phase))
    }

    /// Fetches the root, then runs the workers; returns the phase reached
    async fn drive(&self, run: &Arc<CrawlRun>) -> Result<CrawlPhase, LanternError> {
        let phase = CrawlPhase::Running;
        let root = run.request.root.clone();

        if let Some(robots) = &run.robots {
            if !robots.is_allowed(&root).await {
                tracing::warn!("Root {} is disallowed by robots.txt", root);
                run.record(
                    PageResult::skipped(root.as_str(), 0, None, SkipReason::RobotsDisallowed),
                    0,
                    |stats| stats.robots_skipped += 1,
                );
                return phase.transition(CrawlPhase::Draining);
            }
        }

        run.frontier.enqueue(root.clone(), 0, None);
        let Some(entry) = run.frontier.next(&run.cancel).await else {
            return Err(LanternError::CrawlAborted {
                url: root.to_string(),
                reason: "cancelled before the root was fetched".to_string(),
            });
        };

        match run.fetch(&entry).await {
            Ok(page) => {
                run.accept(&entry, page).await;
                run.frontier.complete();
            }
            Err(e) => {
                run.frontier.complete();
                run.frontier.close();
                tracing::error!("Root {} failed: {}", root, e);
                return Err(LanternError::CrawlAborted {
                    url: root.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        let mut workers = JoinSet::new();
        for id in 0..self.workers() {
            let run = run.clone();
            workers.spawn(async move { run_worker(id, run).await });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Crawl worker failed: {}", e);
            }
        }

        let dropped = run.frontier.close();
        if dropped > 0 {
            tracing::info!("Dropped {} queued URLs", dropped);
        }

        phase.transition(CrawlPhase::Draining)
    }
}

fn spawn_deadline(
    limit: Duration,
    token: CancellationToken,
    hit: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                tracing::warn!("Crawl deadline of {:?} reached, cancelling", limit);
                hit.store(true, Ordering::SeqCst);
                token.cancel();
            }
        }
    })
}

async fn run_worker(id: usize, run: Arc<CrawlRun>) {
    tracing::debug!("Worker {} started", id);
    while let Some(entry) = run.frontier.next(&run.cancel).await {
        match run.fetch(&entry).await {
            Ok(page) => run.accept(&entry, page).await,
            Err(e) => run.reject(&entry, e),
        }
        run.frontier.complete();
    }
    tracing::debug!("Worker {} finished", id);
}

struct Ledger {
    /// `(depth, seq, result)`
    pages: Vec<(u32, u64, PageResult)>,
    stats: CrawlStats,
}

/// State shared by the workers of one crawl
struct CrawlRun {
    request: CrawlRequest,
    filter: LinkFilter,
    frontier: Frontier,
    robots: Option<RobotsCache>,
    fetcher: Arc<PageFetcher>,
    converter: Arc<dyn ContentConverter>,
    exhausted_retries: u32,
    retry_backoff: Duration,
    cancel: CancellationToken,
    ledger: Mutex<Ledger>,
    abort_reason: OnceLock<String>,
    processed: AtomicUsize,
    started: Instant,
}

impl CrawlRun {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fetches one entry, retrying pool backpressure with linear backoff
    async fn fetch(&self, entry: &FrontierEntry) -> Result<FetchedPage, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self
                .fetcher
                .try_fetch(&entry.url, &self.request.options, &self.cancel)
                .await
            {
                Err(FetchError::ResourceExhausted { waited }) if attempt < self.exhausted_retries => {
                    attempt += 1;
                    self.ledger().stats.exhausted_retries += 1;
                    let backoff = self.retry_backoff * attempt;
                    tracing::debug!(
                        "Pool exhausted after {:?} for {}, retry {}/{} in {:?}",
                        waited,
                        entry.url,
                        attempt,
                        self.exhausted_retries,
                        backoff
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return Err(FetchError::Cancelled { url: entry.url.to_string() });
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                other => return other,
            }
        }
    }

    /// Records a fetched page and enqueues its children
    ///
    /// Children go in before the caller marks the entry complete.
    async fn accept(&self, entry: &FrontierEntry, page: FetchedPage) {
        // Children of a page at max depth could never be followed
        let extraction = if entry.depth >= self.request.max_depth {
            Extraction::default()
        } else {
            let base = Url::parse(&page.final_url).unwrap_or_else(|_| entry.url.clone());
            self.filter
                .extract(&page.markup, &base, self.robots.as_ref())
                .await
        };

        let mut outcomes = [0usize; 3];
        for link in &extraction.accepted {
            match self
                .frontier
                .enqueue(link.clone(), entry.depth + 1, Some(&entry.url))
            {
                EnqueueOutcome::Queued | EnqueueOutcome::Closed => {}
                EnqueueOutcome::AlreadyVisited => outcomes[0] += 1,
                EnqueueOutcome::TooDeep => outcomes[1] += 1,
                EnqueueOutcome::BudgetExhausted => outcomes[2] += 1,
            }
        }

        let mut result = PageResult::success(page, entry.depth, entry.parent.clone());
        result.links = extraction.accepted.iter().map(|u| u.to_string()).collect();

        let converted = self.converter.convert(
            result.raw_content.as_deref().unwrap_or_default(),
            &entry.url,
            &self.request.options,
        );
        result.apply_conversion(converted);

        self.record(result, entry.seq, |stats| {
            count_links(stats, &extraction);
            stats.already_visited += outcomes[0];
            stats.too_deep += outcomes[1];
            stats.budget_exhausted += outcomes[2];
        });
    }

    fn reject(&self, entry: &FrontierEntry, error: FetchError) {
        if error.is_pool_fatal() {
            self.abort(format!("session pool failed: {}", error));
        }

        let elapsed_ms = match &error {
            FetchError::ResourceExhausted { waited } => waited.as_millis() as u64,
            _ => 0,
        };
        let result = PageResult::failure(
            entry.url.as_str(),
            entry.depth,
            entry.parent.clone(),
            &error,
            elapsed_ms,
        );
        self.record(result, entry.seq, |_| {});
    }

    /// Stops the crawl, keeping whatever has been recorded
    fn abort(&self, reason: String) {
        if self.abort_reason.set(reason).is_ok() {
            let dropped = self.frontier.close();
            tracing::warn!("Aborting crawl, {} queued URLs dropped", dropped);
            self.cancel.cancel();
        }
    }

    fn record(&self, result: PageResult, seq: u64, update: impl FnOnce(&mut CrawlStats)) {
        {
            let mut ledger = self.ledger();
            ledger.stats.record_page(&result);
            update(&mut ledger.stats);
            ledger.pages.push((result.discovered_at, seq, result));
        }

        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % 10 == 0 {
            let rate = processed as f64 / self.started.elapsed().as_secs_f64().max(f64::EPSILON);
            tracing::info!(
                "Progress: {} pages processed, {} queued, {} visited, {:.2} pages/sec",
                processed,
                self.frontier.queued_len(),
                self.frontier.visited_len(),
                rate
            );
        }
    }

    fn report(&self, phase: CrawlPhase) -> CrawlReport {
        let (pages, stats) = {
            let mut ledger = self.ledger();
            let mut pages = std::mem::take(&mut ledger.pages);
            pages.sort_by_key(|(depth, seq, _)| (*depth, *seq));
            ledger.stats.finish();
            (pages, ledger.stats.clone())
        };

        tracing::info!(
            "Crawl {} {}: {} succeeded, {} failed, {} skipped in {}ms",
            self.request.crawl_id,
            phase,
            stats.pages_succeeded,
            stats.pages_failed,
            stats.pages_skipped,
            stats.duration_ms
        );

        CrawlReport {
            crawl_id: self.request.crawl_id,
            root: self.request.root.to_string(),
            phase,
            abort_reason: self.abort_reason.get().cloned(),
            pages: pages.into_iter().map(|(_, _, page)| page).collect(),
            stats,
            pool: self.fetcher.pool().stats(),
            fetch: self.fetcher.metrics(),
        }
    }
}

fn count_links(stats: &mut CrawlStats, extraction: &Extraction) {
    stats.links_filtered += extraction.filtered();
    stats.links_duplicate += extraction.duplicates;
    stats.robots_skipped += extraction.robots_skipped;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeVendor;
    use crate::crawler::{CrawlSubmission, ErrorKind};
    use crate::session::scripted::{ScriptedChallenge, ScriptedEngine, ScriptedPage};
    use crate::session::{IdentityProfile, RenderEngine, RenderSession, SessionPool};
    use crate::SessionError;

    fn config() -> Config {
        let mut config = Config::default();
        config.pool.capacity = 2;
        config.pool.acquire_timeout_ms = 2_000;
        config.pool.creation_retries = 1;
        config.pool.creation_backoff_ms = 1;
        config.fetch.default_delay_ms = 1;
        config.fetch.navigation_timeout_ms = 1_000;
        config.challenge.timeout_ms = 100;
        config.challenge.poll_interval_ms = 10;
        config.challenge.solve_attempts = 0;
        config.crawler.concurrency = 2;
        config.crawler.idle_poll_ms = 10;
        config.crawler.retry_backoff_ms = 5;
        config
    }

    fn crawler(engine: &ScriptedEngine, config: &Config) -> Crawler {
        let pool = SessionPool::from_config(Arc::new(engine.clone()), &config.pool);
        let fetcher = PageFetcher::from_config(pool, config, None);
        Crawler::new(config, Arc::new(fetcher))
    }

    fn submission(max_depth: u32, max_pages: usize) -> CrawlSubmission {
        CrawlSubmission {
            max_depth,
            max_pages,
            respect_robots_txt: false,
            ..CrawlSubmission::new("https://example.com/")
        }
    }

    fn site(engine: &ScriptedEngine) {
        engine.page(
            "https://example.com/",
            ScriptedPage::with_links("Home", ["/a", "/b", "https://other.org/x"]),
        );
        engine.page("https://example.com/a", ScriptedPage::with_links("A", ["/a/1", "/"]));
        engine.page("https://example.com/b", ScriptedPage::with_links("B", ["/b/1"]));
        engine.page("https://example.com/a/1", ScriptedPage::with_links("A1", ["/a/1/x"]));
        engine.page("https://example.com/b/1", ScriptedPage::with_links("B1", Vec::<&str>::new()));
    }

    #[tokio::test]
    async fn test_crawl_respects_depth_and_orders_results() {
        let engine = ScriptedEngine::new();
        site(&engine);
        let config = config();

        let report = crawler(&engine, &config)
            .crawl(submission(2, 50).validate().unwrap(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.phase, CrawlPhase::Complete);
        let urls: Vec<_> = report.pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls.len(), 5);
        assert_eq!(urls[0], "https://example.com/");
        assert!(report.pages.windows(2).all(|w| w[0].discovered_at <= w[1].discovered_at));
        assert!(report.page("https://example.com/a/1/x").is_none());
        assert_eq!(report.stats.pages_succeeded, 5);
        assert_eq!(report.stats.too_deep, 0);
        assert!(report.stats.links_filtered >= 1);

        let a1 = report.page("https://example.com/a/1").unwrap();
        assert_eq!(a1.discovered_at, 2);
        assert_eq!(a1.parent.as_deref(), Some("https://example.com/a"));
        assert!(a1.markdown.as_deref().unwrap_or_default().contains("A1"));
        assert!(a1.links.is_empty());

        // Nothing fetched twice
        let mut navigations = engine.navigations();
        let total = navigations.len();
        navigations.sort();
        navigations.dedup();
        assert_eq!(navigations.len(), total);
    }

    #[tokio::test]
    async fn test_pages_at_max_depth_contribute_no_links() {
        let engine = ScriptedEngine::new();
        site(&engine);
        let config = config();

        let report = crawler(&engine, &config)
            .crawl(submission(1, 50).validate().unwrap(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.pages.len(), 3);
        // Only the root's links are counted: /a and /b queued, other.org filtered
        assert_eq!(report.stats.links_filtered, 1);
        assert_eq!(report.stats.too_deep, 0);
        assert_eq!(report.stats.already_visited, 0);
        assert!(report.page("https://example.com/a").unwrap().links.is_empty());
        assert!(!engine.navigations().iter().any(|u| u.ends_with("/1")));
    }

    #[tokio::test]
    async fn test_root_failure_aborts() {
        let engine = ScriptedEngine::new();
        engine.page(
            "https://example.com/",
            ScriptedPage::html("").failing(SessionError::Protocol("crashed".to_string())),
        );
        let config = config();

        let err = crawler(&engine, &config)
            .crawl(submission(2, 10).validate().unwrap(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LanternError::CrawlAborted { .. }));
    }

    #[tokio::test]
    async fn test_child_failures_are_recorded() {
        let engine = ScriptedEngine::new();
        engine.page(
            "https://example.com/",
            ScriptedPage::with_links("Home", ["/guarded", "/broken", "/ok"]),
        );
        engine.page(
            "https://example.com/guarded",
            ScriptedPage::with_links("Guarded", Vec::<&str>::new())
                .behind(ScriptedChallenge::cloudflare(None)),
        );
        engine.page(
            "https://example.com/broken",
            ScriptedPage::html("").failing(SessionError::Script("boom".to_string())),
        );
        engine.page("https://example.com/ok", ScriptedPage::with_links("Ok", Vec::<&str>::new()));
        let config = config();

        let report = crawler(&engine, &config)
            .crawl(submission(1, 10).validate().unwrap(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.phase, CrawlPhase::Complete);
        assert_eq!(report.pages.len(), 4);
        assert_eq!(
            report.page("https://example.com/guarded").unwrap().error_kind(),
            Some(ErrorKind::BotChallenge {
                vendor: ChallengeVendor::Cloudflare
            })
        );
        assert_eq!(
            report.page("https://example.com/broken").unwrap().error_kind(),
            Some(ErrorKind::Navigation)
        );
        assert!(report.page("https://example.com/ok").unwrap().is_success());
        assert_eq!(report.stats.pages_failed, 2);
    }

    /// Launches one session, then fails every later launch
    struct SingleLaunchEngine {
        inner: ScriptedEngine,
        launched: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RenderEngine for SingleLaunchEngine {
        async fn launch(
            &self,
            identity: &IdentityProfile,
        ) -> Result<Box<dyn RenderSession>, SessionError> {
            if self.launched.fetch_add(1, Ordering::SeqCst) == 0 {
                self.inner.launch(identity).await
            } else {
                Err(SessionError::Launch("browser binary gone".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_pool_death_aborts_with_partial_results() {
        let engine = ScriptedEngine::new();
        engine.page("https://example.com/", ScriptedPage::with_links("Home", ["/a", "/b"]));
        engine.page(
            "https://example.com/a",
            ScriptedPage::html("").failing(SessionError::Protocol("crashed".to_string())),
        );
        engine.page("https://example.com/b", ScriptedPage::with_links("B", Vec::<&str>::new()));
        let mut config = config();
        config.pool.capacity = 1;
        config.crawler.concurrency = 1;

        let pool = SessionPool::from_config(
            Arc::new(SingleLaunchEngine {
                inner: engine.clone(),
                launched: AtomicUsize::new(0),
            }),
            &config.pool,
        );
        let crawler = Crawler::new(&config, Arc::new(PageFetcher::from_config(pool, &config, None)));

        let report = crawler
            .crawl(submission(1, 10).validate().unwrap(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.phase, CrawlPhase::Aborted);
        assert!(report
            .abort_reason
            .as_deref()
            .unwrap()
            .contains("session pool failed"));
        assert!(report.page("https://example.com/").unwrap().is_success());
        assert_eq!(
            report.page("https://example.com/a").unwrap().error_kind(),
            Some(ErrorKind::Navigation)
        );
        assert_eq!(
            report.page("https://example.com/b").unwrap().error_kind(),
            Some(ErrorKind::SessionUnavailable)
        );
        assert!(crawler.fetcher().pool().is_dead());
    }

    #[tokio::test]
    async fn test_cancel_aborts() {
        let engine = ScriptedEngine::new();
        engine.page("https://example.com/", ScriptedPage::with_links("Home", ["/slow"]));
        engine.page(
            "https://example.com/slow",
            ScriptedPage::with_links("Slow", Vec::<&str>::new()).delay(Duration::from_millis(800)),
        );
        let config = config();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let report = crawler(&engine, &config)
            .crawl(submission(1, 10).validate().unwrap(), cancel)
            .await
            .unwrap();

        assert_eq!(report.phase, CrawlPhase::Aborted);
        assert_eq!(report.abort_reason.as_deref(), Some("crawl cancelled"));
        assert_eq!(
            report.page("https://example.com/slow").unwrap().error_kind(),
            Some(ErrorKind::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_deadline_cancels_slow_root() {
        let engine = ScriptedEngine::new();
        engine.page(
            "https://example.com/",
            ScriptedPage::with_links("Home", ["/a"]).delay(Duration::from_millis(300)),
        );
        let mut config = config();
        config.crawler.deadline_secs = Some(0);

        let report = crawler(&engine, &config)
            .crawl(submission(1, 10).validate().unwrap(), CancellationToken::new())
            .await;

        assert!(matches!(report, Err(LanternError::CrawlAborted { .. })));
    }
}
