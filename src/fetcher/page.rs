//! Page fetcher
//!
//! One fetch runs: lease → headers/emulation → navigate → wait policy → challenge
//! recovery → actions → capture → release. Actions run only once the page is past any
//! challenge interstitial. The lease goes back to the pool on every exit path, marked
//! unhealthy whenever the failure could have left the session in an unknown state.

use crate::challenge::{ChallengeRecovery, ChallengeSettings, ChallengeVendor, RecoveryState};
use crate::config::{Config, FetchConfig};
use crate::crawler::PageResult;
use crate::fetcher::cache::{cache_key, ResultCache};
use crate::fetcher::metrics::{FetchMetrics, FetchMetricsSnapshot};
use crate::fetcher::options::{Action, ActionStep, FetchOptions, ScrollDirection, WaitPolicy};
use crate::session::{RenderSession, SessionPool};
use crate::{FetchError, SessionError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// How often a selector wait re-checks the document
const SELECTOR_POLL: Duration = Duration::from_millis(100);

/// Scroll distance when an action names none
const DEFAULT_SCROLL: u32 = 800;

/// A rendered page as captured from the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub status_code: Option<u16>,
    pub title: Option<String>,
    pub markup: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Vec<u8>>,
    /// Vendor of a challenge that was waited out
    pub challenge: Option<ChallengeVendor>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub from_cache: bool,
}

/// Renders single pages through the session pool
pub struct PageFetcher {
    pool: SessionPool,
    config: FetchConfig,
    recovery: ChallengeRecovery,
    cache: Option<Arc<dyn ResultCache>>,
    metrics: FetchMetrics,
}

impl std::fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFetcher")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl PageFetcher {
    pub fn new(
        pool: SessionPool,
        config: FetchConfig,
        challenge: ChallengeSettings,
        cache: Option<Arc<dyn ResultCache>>,
    ) -> Self {
        Self {
            pool,
            config,
            recovery: ChallengeRecovery::new(challenge),
            cache,
            metrics: FetchMetrics::default(),
        }
    }

    pub fn from_config(
        pool: SessionPool,
        config: &Config,
        cache: Option<Arc<dyn ResultCache>>,
    ) -> Self {
        Self::new(
            pool,
            config.fetch.clone(),
            ChallengeSettings::from(&config.challenge),
            cache,
        )
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn metrics(&self) -> FetchMetricsSnapshot {
        self.metrics.snapshot(self.recovery.stats())
    }

    /// Fetches one page and folds any error into the result
    pub async fn fetch(
        &self,
        url: &Url,
        options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> PageResult {
        let started = Instant::now();
        match self.try_fetch(url, options, cancel).await {
            Ok(page) => PageResult::success(page, 0, None),
            Err(e) => PageResult::failure(
                url.as_str(),
                0,
                None,
                &e,
                started.elapsed().as_millis() as u64,
            ),
        }
    }

    /// Fetches one page
    ///
    /// # Errors
    ///
    /// * `FetchError::ResourceExhausted` - no session became free in time
    /// * `FetchError::SessionUnavailable` - the pool is dead or shut down
    /// * `FetchError::Navigation` - navigation, waiting, an action or capture failed
    /// * `FetchError::BotChallenge` - a challenge was still showing at its timeout
    /// * `FetchError::Cancelled` - `cancel` fired
    pub async fn try_fetch(
        &self,
        url: &Url,
        options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> Result<FetchedPage, FetchError> {
        let started = Instant::now();
        self.metrics.record_start();

        let result = self.fetch_inner(url, options, cancel, started).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(page) => {
                self.metrics.record_success(elapsed_ms, page.from_cache);
                tracing::info!(
                    "Fetched {} in {}ms (status {:?}{})",
                    url,
                    elapsed_ms,
                    page.status_code,
                    if page.from_cache { ", cached" } else { "" }
                );
            }
            Err(e) => {
                self.metrics.record_failure(e, elapsed_ms);
                tracing::warn!("Fetch of {} failed after {}ms: {}", url, elapsed_ms, e);
            }
        }

        result
    }

    async fn fetch_inner(
        &self,
        url: &Url,
        options: &FetchOptions,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<FetchedPage, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled {
                url: url.to_string(),
            });
        }

        let key = self.cache.as_ref().map(|_| cache_key(url, options));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(raw) = cache.get(key).await {
                match serde_json::from_str::<FetchedPage>(&raw) {
                    Ok(mut page) => {
                        page.from_cache = true;
                        return Ok(page);
                    }
                    Err(e) => tracing::debug!("Ignoring unreadable cache entry {}: {}", key, e),
                }
            }
        }

        let acquire_timeout = self.pool.settings().acquire_timeout;
        let mut lease = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(FetchError::Cancelled { url: url.to_string() });
            }
            lease = self.pool.acquire(acquire_timeout) => lease?,
        };

        let rendered = {
            let render = async {
                let session = lease.session().map_err(|e| navigation_error(url, e))?;
                self.render(session, url, options, cancel, started).await
            };
            tokio::select! {
                _ = cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_string() }),
                result = render => result,
            }
        };

        let healthy = match &rendered {
            Ok(_) => true,
            Err(e) => {
                if !e.is_session_fault() {
                    lease.record_failure();
                }
                !e.is_session_fault()
            }
        };
        self.pool.release(lease, healthy).await;

        let page = rendered?;

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            match serde_json::to_string(&page) {
                Ok(json) => cache.set(&key, json, self.config.cache_ttl()).await,
                Err(e) => tracing::debug!("Not caching {}: {}", url, e),
            }
        }

        Ok(page)
    }

    async fn render(
        &self,
        session: &dyn RenderSession,
        url: &Url,
        options: &FetchOptions,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<FetchedPage, FetchError> {
        let nav = |e| navigation_error(url, e);
        let timeout = options.navigation_timeout(&self.config);

        if !options.headers.is_empty() {
            session.set_extra_headers(&options.headers).await.map_err(nav)?;
        }
        if options.mobile {
            session.emulate_mobile(true).await.map_err(nav)?;
        }

        let navigation = session.navigate(url, timeout).await.map_err(nav)?;
        tracing::debug!(
            "Navigated to {} (status {:?}, final {})",
            url,
            navigation.status,
            navigation.final_url
        );

        let policy = options.wait_policy(&self.config);
        let wait_budget = timeout.saturating_sub(started.elapsed());
        self.apply_wait(session, &policy, wait_budget, url, cancel)
            .await?;

        let outcome = self
            .recovery
            .run(session, navigation.status, url, cancel)
            .await?;

        // The navigation response was the interstitial's
        let (final_url, status_code) = match outcome.state {
            RecoveryState::Resolved => (session.current_url().await.map_err(nav)?, None),
            _ => (navigation.final_url, navigation.status),
        };

        self.run_actions(session, &options.actions, url, cancel)
            .await?;

        let markup = session.content().await.map_err(nav)?;
        let title = match session.title().await.map_err(nav)? {
            Some(title) if !title.trim().is_empty() => Some(title),
            _ => crate::url::extract_title(&markup),
        };
        let screenshot = if options.include_screenshot {
            Some(session.screenshot().await.map_err(nav)?)
        } else {
            None
        };

        Ok(FetchedPage {
            url: url.to_string(),
            final_url: final_url.to_string(),
            status_code,
            title,
            markup,
            screenshot,
            challenge: match outcome.state {
                RecoveryState::Resolved => outcome.vendor,
                _ => None,
            },
            elapsed_ms: started.elapsed().as_millis() as u64,
            from_cache: false,
        })
    }

    async fn apply_wait(
        &self,
        session: &dyn RenderSession,
        policy: &WaitPolicy,
        budget: Duration,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        match policy {
            WaitPolicy::Delay(delay) => sleep_or_cancel(*delay, url, cancel).await,
            WaitPolicy::Selector(selector) => {
                wait_for_selector(session, selector, budget, url, cancel).await
            }
            WaitPolicy::NetworkIdle(idle) => {
                let quiet = self.wait_for_idle(session, *idle, budget, url, cancel).await?;
                if !quiet {
                    tracing::debug!("Network never went idle at {} within {:?}", url, budget);
                }
                Ok(())
            }
        }
    }

    /// Waits until the resource-entry count holds still for `idle`
    ///
    /// Returns false if the budget ran out first; that is not an error.
    async fn wait_for_idle(
        &self,
        session: &dyn RenderSession,
        idle: Duration,
        budget: Duration,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<bool, FetchError> {
        let deadline = Instant::now() + budget;
        let step = (idle / 3).max(Duration::from_millis(10));
        let mut last = session
            .resource_count()
            .await
            .map_err(|e| navigation_error(url, e))?;
        let mut stable_since = Instant::now();

        while Instant::now() < deadline {
            sleep_or_cancel(step, url, cancel).await?;

            let count = session
                .resource_count()
                .await
                .map_err(|e| navigation_error(url, e))?;
            if count != last {
                last = count;
                stable_since = Instant::now();
            } else if stable_since.elapsed() >= idle {
                tracing::trace!("Network idle at {} with {} resources", url, count);
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn run_actions(
        &self,
        session: &dyn RenderSession,
        actions: &[ActionStep],
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        for (index, step) in actions.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled {
                    url: url.to_string(),
                });
            }

            let mut limit = step
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.config.action_timeout());
            if let Action::Wait {
                milliseconds: Some(ms),
                selector: None,
            } = &step.action
            {
                limit = limit.max(Duration::from_millis(*ms));
            }

            tracing::debug!("Action {} ({}) on {}", index + 1, step.action.name(), url);

            match tokio::time::timeout(limit, run_action(session, &step.action, limit, url, cancel))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(navigation_error(
                        url,
                        SessionError::Timeout {
                            operation: "action",
                            after: limit,
                        },
                    ))
                }
            }
        }
        Ok(())
    }
}

async fn run_action(
    session: &dyn RenderSession,
    action: &Action,
    limit: Duration,
    url: &Url,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    match action {
        Action::Wait {
            selector: Some(selector),
            ..
        } => wait_for_selector(session, selector, limit, url, cancel).await,
        Action::Wait { milliseconds, .. } => {
            sleep_or_cancel(Duration::from_millis(milliseconds.unwrap_or(0)), url, cancel).await
        }
        Action::Click { selector } => session
            .click(selector)
            .await
            .map_err(|e| navigation_error(url, e)),
        Action::Scroll { direction, amount } => {
            let distance = i64::from(amount.unwrap_or(DEFAULT_SCROLL));
            let dy = match direction {
                ScrollDirection::Down => distance,
                ScrollDirection::Up => -distance,
            };
            session
                .scroll_by(dy)
                .await
                .map_err(|e| navigation_error(url, e))
        }
    }
}

async fn wait_for_selector(
    session: &dyn RenderSession,
    selector: &str,
    budget: Duration,
    url: &Url,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    let deadline = Instant::now() + budget;
    loop {
        if session
            .has_element(selector)
            .await
            .map_err(|e| navigation_error(url, e))?
        {
            return Ok(());
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(navigation_error(
                url,
                SessionError::ElementNotFound(selector.to_string()),
            ));
        }
        sleep_or_cancel(SELECTOR_POLL.min(remaining), url, cancel).await?;
    }
}

async fn sleep_or_cancel(
    duration: Duration,
    url: &Url,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_string() }),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

fn navigation_error(url: &Url, source: SessionError) -> FetchError {
    FetchError::Navigation {
        url: url.to_string(),
        source,
    }
}
