/// Crawl phase definitions
///
/// A crawl runs, drains its in-flight work once the frontier closes, and then completes.
/// It can abort from either active phase.
use crate::LanternError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current phase of one crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlPhase {
    /// Workers are popping and fetching
    Running,

    /// No new work is accepted; in-flight fetches are finishing
    Draining,

    // ===== Terminal States =====
    /// Frontier exhausted or budget reached
    Complete,

    /// Pool died, or the crawl was cancelled
    Aborted,
}

impl CrawlPhase {
    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Draining)
                | (Self::Running, Self::Aborted)
                | (Self::Draining, Self::Complete)
                | (Self::Draining, Self::Aborted)
        )
    }

    /// Moves to `next`, rejecting anything outside the phase graph
    pub fn transition(self, next: CrawlPhase) -> Result<CrawlPhase, LanternError> {
        if self.can_transition_to(next) {
            tracing::debug!("crawl phase {} -> {}", self, next);
            Ok(next)
        } else {
            Err(LanternError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Draining => "DRAINING",
            Self::Complete => "COMPLETE",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
