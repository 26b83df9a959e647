use crate::challenge::ChallengeStats;
use crate::FetchError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fetch outcome counters
#[derive(Debug, Default)]
pub struct FetchMetrics {
    fetches: AtomicU64,
    successes: AtomicU64,
    cache_hits: AtomicU64,
    resource_exhausted: AtomicU64,
    navigation: AtomicU64,
    bot_challenge: AtomicU64,
    session_unavailable: AtomicU64,
    cancelled: AtomicU64,
    elapsed_ms: AtomicU64,
}

/// Point-in-time copy of [`FetchMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchMetricsSnapshot {
    pub fetches: u64,
    pub successes: u64,
    pub cache_hits: u64,
    pub resource_exhausted: u64,
    pub navigation_errors: u64,
    pub bot_challenges: u64,
    pub session_unavailable: u64,
    pub cancelled: u64,
    /// Sum of fetch durations (milliseconds)
    pub elapsed_ms: u64,
    pub challenges: ChallengeStats,
}

impl FetchMetrics {
    pub fn record_start(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, elapsed_ms: u64, from_cache: bool) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        if from_cache {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.elapsed_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self, error: &FetchError, elapsed_ms: u64) {
        let counter = match error {
            FetchError::ResourceExhausted { .. } => &self.resource_exhausted,
            FetchError::Navigation { .. } => &self.navigation,
            FetchError::BotChallenge { .. } => &self.bot_challenge,
            FetchError::SessionUnavailable(_) => &self.session_unavailable,
            FetchError::Cancelled { .. } => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.elapsed_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self, challenges: ChallengeStats) -> FetchMetricsSnapshot {
        FetchMetricsSnapshot {
            fetches: self.fetches.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            resource_exhausted: self.resource_exhausted.load(Ordering::Relaxed),
            navigation_errors: self.navigation.load(Ordering::Relaxed),
            bot_challenges: self.bot_challenge.load(Ordering::Relaxed),
            session_unavailable: self.session_unavailable.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            elapsed_ms: self.elapsed_ms.load(Ordering::Relaxed),
            challenges,
        }
    }
}
