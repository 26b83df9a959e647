//! Challenge recovery state machine
//!
//! ```text
//! NORMAL ──classify──▶ CHALLENGE_DETECTED ──▶ WAITING ──┬──▶ RESOLVED
//!    │                                          ▲    │   │
//!    │ (no match)                               └poll┘   └──▶ TIMEOUT_FAILED
//!    ▼
//! (page is fine)
//! ```
//!
//! The wait is bounded by its own timeout, independent of the navigation timeout.

use crate::challenge::detector::{classify, has_primary_content, solve_selectors, PageSignals};
use crate::challenge::{ChallengeMatch, ChallengeVendor};
use crate::config::ChallengeConfig;
use crate::session::RenderSession;
use crate::FetchError;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Per-attempt recovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryState {
    Normal,
    ChallengeDetected,
    Waiting,
    Resolved,
    TimeoutFailed,
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "NORMAL",
            Self::ChallengeDetected => "CHALLENGE_DETECTED",
            Self::Waiting => "WAITING",
            Self::Resolved => "RESOLVED",
            Self::TimeoutFailed => "TIMEOUT_FAILED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct ChallengeSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub solve_attempts: u32,
}

impl From<&ChallengeConfig> for ChallengeSettings {
    fn from(config: &ChallengeConfig) -> Self {
        Self {
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            solve_attempts: config.solve_attempts,
        }
    }
}

/// How a page got past the challenge check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// `Normal` when no challenge was seen, `Resolved` otherwise
    pub state: RecoveryState,
    pub vendor: Option<ChallengeVendor>,
    pub polls: u32,
    pub waited: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    detected: AtomicU64,
    resolved: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChallengeStats {
    pub detected: u64,
    pub resolved: u64,
    pub failed: u64,
}

/// Detects challenges on a leased session and waits them out
#[derive(Debug)]
pub struct ChallengeRecovery {
    settings: ChallengeSettings,
    counters: Counters,
}

impl ChallengeRecovery {
    pub fn new(settings: ChallengeSettings) -> Self {
        Self {
            settings,
            counters: Counters::default(),
        }
    }

    pub fn settings(&self) -> &ChallengeSettings {
        &self.settings
    }

    pub fn stats(&self) -> ChallengeStats {
        ChallengeStats {
            detected: self.counters.detected.load(Ordering::Relaxed),
            resolved: self.counters.resolved.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Runs the state machine against the page currently loaded in `session`
    ///
    /// # Errors
    ///
    /// * `FetchError::BotChallenge` - the challenge was still showing at the timeout
    /// * `FetchError::Cancelled` - `cancel` fired while waiting
    /// * `FetchError::Navigation` - the session failed while being polled
    pub async fn run(
        &self,
        session: &dyn RenderSession,
        status: Option<u16>,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<RecoveryOutcome, FetchError> {
        let navigation_error = |source| FetchError::Navigation {
            url: url.to_string(),
            source,
        };

        let signals = PageSignals::capture(session, status)
            .await
            .map_err(navigation_error)?;

        let Some(mut current) = classify(&signals) else {
            return Ok(RecoveryOutcome {
                state: RecoveryState::Normal,
                vendor: None,
                polls: 0,
                waited: Duration::ZERO,
            });
        };

        let mut state = RecoveryState::ChallengeDetected;
        self.counters.detected.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "{} challenge detected at {} ({})",
            current.vendor,
            url,
            current.evidence_summary()
        );

        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let mut clicks = 0u32;
        let mut polls = 0u32;

        loop {
            state = transition(state, RecoveryState::Waiting, url);

            if clicks < self.settings.solve_attempts
                && self.try_solve(session, current.vendor).await
            {
                clicks += 1;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.fail(state, url, &current));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
                _ = tokio::time::sleep(self.settings.poll_interval.min(remaining)) => {}
            }
            polls += 1;

            let markup = session.content().await.map_err(navigation_error)?;
            let title = session.title().await.map_err(navigation_error)?;
            let signals = PageSignals {
                status: None,
                title,
                markup,
                cookies: session.cookie_names().await.unwrap_or_default(),
            };

            match classify(&signals) {
                Some(still) => {
                    tracing::debug!(
                        "Challenge still present at {} after {} polls (score {})",
                        url,
                        polls,
                        still.score
                    );
                    current = still;
                }
                None if has_primary_content(&signals.markup) => {
                    let state = transition(state, RecoveryState::Resolved, url);
                    self.counters.resolved.fetch_add(1, Ordering::Relaxed);
                    let waited = started.elapsed();
                    tracing::info!(
                        "{} challenge at {} resolved after {:?}",
                        current.vendor,
                        url,
                        waited
                    );
                    return Ok(RecoveryOutcome {
                        state,
                        vendor: Some(current.vendor),
                        polls,
                        waited,
                    });
                }
                None => {
                    tracing::debug!("Challenge markers gone at {} but no content yet", url);
                }
            }

            if Instant::now() >= deadline {
                return Err(self.fail(state, url, &current));
            }
        }
    }

    /// Clicks the first visible solve widget; click errors are ignored
    async fn try_solve(&self, session: &dyn RenderSession, vendor: ChallengeVendor) -> bool {
        for selector in solve_selectors(vendor) {
            if matches!(session.has_element(selector).await, Ok(true)) {
                if let Err(e) = session.click(selector).await {
                    tracing::debug!("Challenge click on '{}' failed: {}", selector, e);
                }
                return true;
            }
        }
        false
    }

    fn fail(&self, state: RecoveryState, url: &Url, last: &ChallengeMatch) -> FetchError {
        transition(state, RecoveryState::TimeoutFailed, url);
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "{} challenge at {} not resolved within {:?}",
            last.vendor,
            url,
            self.settings.timeout
        );
        FetchError::BotChallenge {
            url: url.to_string(),
            vendor: last.vendor,
            evidence: last.evidence_summary(),
        }
    }
}

fn transition(from: RecoveryState, to: RecoveryState, url: &Url) -> RecoveryState {
    if from != to {
        tracing::trace!("challenge recovery {} -> {} at {}", from, to, url);
    }
    to
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::scripted::{ScriptedChallenge, ScriptedEngine, ScriptedPage};
    use crate::session::{IdentityProfile, RenderEngine};

    fn recovery(timeout_ms: u64, attempts: u32) -> ChallengeRecovery {
        ChallengeRecovery::new(ChallengeSettings {
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(10),
            solve_attempts: attempts,
        })
    }

    async fn loaded(page: ScriptedPage) -> (ScriptedEngine, Box<dyn RenderSession>, Option<u16>, Url) {
        let engine = ScriptedEngine::new();
        let url = Url::parse("https://example.com/").unwrap();
        engine.page(url.as_str(), page);
        let session = engine.launch(&IdentityProfile::randomized()).await.unwrap();
        let nav = session.navigate(&url, Duration::from_secs(1)).await.unwrap();
        (engine, session, nav.status, url)
    }

    fn home() -> ScriptedPage {
        ScriptedPage::with_links("Home", ["/a", "/b"])
    }

    #[tokio::test]
    async fn test_clean_page_is_normal() {
        let (_e, session, status, url) = loaded(home()).await;
        let outcome = recovery(200, 3)
            .run(session.as_ref(), status, &url, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.state, RecoveryState::Normal);
        assert_eq!(outcome.polls, 0);
    }

    #[tokio::test]
    async fn test_challenge_that_clears_is_resolved() {
        let page = home().behind(ScriptedChallenge::cloudflare(Some(Duration::from_millis(40))));
        let (_e, session, status, url) = loaded(page).await;
        let r = recovery(2_000, 0);

        let outcome = r
            .run(session.as_ref(), status, &url, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.state, RecoveryState::Resolved);
        assert_eq!(outcome.vendor, Some(ChallengeVendor::Cloudflare));
        assert!(outcome.polls >= 1);
        assert_eq!(r.stats().resolved, 1);
    }

    #[tokio::test]
    async fn test_click_solves_challenge() {
        let page = home().behind(
            ScriptedChallenge::cloudflare(None).solved_by_click("input[type='checkbox']"),
        );
        let (engine, session, status, url) = loaded(page).await;

        let outcome = recovery(2_000, 3)
            .run(session.as_ref(), status, &url, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.state, RecoveryState::Resolved);
        assert_eq!(engine.clicks(), 1);
    }

    #[tokio::test]
    async fn test_persistent_challenge_times_out() {
        let page = home().behind(ScriptedChallenge::cloudflare(None));
        let (_e, session, status, url) = loaded(page).await;
        let r = recovery(60, 3);

        let err = r
            .run(session.as_ref(), status, &url, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            FetchError::BotChallenge { vendor, .. } => {
                assert_eq!(vendor, ChallengeVendor::Cloudflare)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(r.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let page = home().behind(ScriptedChallenge::cloudflare(None));
        let (_e, session, status, url) = loaded(page).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = recovery(5_000, 0)
            .run(session.as_ref(), status, &url, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled { .. }));
    }
}
