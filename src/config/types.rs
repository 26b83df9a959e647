use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Ink-Lantern
///
/// Every section has defaults, so an empty file (or no file at all) yields a usable
/// configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub robots: RobotsConfig,
}

/// Rendering session pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of live rendering sessions
    pub capacity: usize,

    /// How long `acquire` waits for a free session (milliseconds)
    #[serde(rename = "acquire-timeout-ms")]
    pub acquire_timeout_ms: u64,

    /// Sessions are retired after this many leases
    #[serde(rename = "max-session-uses")]
    pub max_session_uses: u32,

    /// Sessions are retired after this many recorded failures
    #[serde(rename = "max-session-failures")]
    pub max_session_failures: u32,

    /// Free sessions idle for longer than this are replaced (seconds)
    #[serde(rename = "max-idle-secs")]
    pub max_idle_secs: u64,

    /// Consecutive creation attempts before the pool gives up
    #[serde(rename = "creation-retries")]
    pub creation_retries: u32,

    /// Linear backoff step between creation attempts (milliseconds)
    #[serde(rename = "creation-backoff-ms")]
    pub creation_backoff_ms: u64,

    /// Run the browser without a window
    pub headless: bool,

    /// Explicit browser binary; searched for when absent
    #[serde(rename = "chrome-executable")]
    pub chrome_executable: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            acquire_timeout_ms: 30_000,
            max_session_uses: 50,
            max_session_failures: 3,
            max_idle_secs: 300,
            creation_retries: 3,
            creation_backoff_ms: 500,
            headless: true,
            chrome_executable: None,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn creation_backoff(&self) -> Duration {
        Duration::from_millis(self.creation_backoff_ms)
    }
}

/// Page fetch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound for navigation plus wait conditions (milliseconds)
    #[serde(rename = "navigation-timeout-ms")]
    pub navigation_timeout_ms: u64,

    /// Fixed settle delay used when a request names no wait policy (milliseconds)
    #[serde(rename = "default-delay-ms")]
    pub default_delay_ms: u64,

    /// Timeout applied to each scripted action without its own (milliseconds)
    #[serde(rename = "action-timeout-ms")]
    pub action_timeout_ms: u64,

    /// Quiet window that counts as network idle (milliseconds)
    #[serde(rename = "network-idle-ms")]
    pub network_idle_ms: u64,

    /// Lifetime of cached fetch results (seconds)
    #[serde(rename = "cache-ttl-secs")]
    pub cache_ttl_secs: u64,

    /// Entries held by the in-memory result cache
    #[serde(rename = "cache-capacity")]
    pub cache_capacity: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 30_000,
            default_delay_ms: 500,
            action_timeout_ms: 5_000,
            network_idle_ms: 500,
            cache_ttl_secs: 86_400,
            cache_capacity: 256,
        }
    }
}

impl FetchConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Challenge recovery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Overall budget for waiting out a challenge (milliseconds)
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Interval between re-classifications (milliseconds)
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Best-effort checkbox clicks per challenge
    #[serde(rename = "solve-attempts")]
    pub solve_attempts: u32,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            poll_interval_ms: 2_000,
            solve_attempts: 3,
        }
    }
}

impl ChallengeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Crawl orchestration configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Requested worker count; capped by the pool capacity
    pub concurrency: usize,

    /// Local retries when the pool is saturated
    #[serde(rename = "exhausted-retries")]
    pub exhausted_retries: u32,

    /// Linear backoff step between saturated retries (milliseconds)
    #[serde(rename = "retry-backoff-ms")]
    pub retry_backoff_ms: u64,

    /// How long an idle worker waits before re-checking the frontier (milliseconds)
    #[serde(rename = "idle-poll-ms")]
    pub idle_poll_ms: u64,

    /// Overall crawl deadline (seconds)
    #[serde(rename = "deadline-secs")]
    pub deadline_secs: Option<u64>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            exhausted_retries: 3,
            retry_backoff_ms: 250,
            idle_poll_ms: 100,
            deadline_secs: None,
        }
    }
}

impl CrawlerConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Robots.txt policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RobotsConfig {
    /// Timeout for fetching one robots.txt file (milliseconds)
    #[serde(rename = "fetch-timeout-ms")]
    pub fetch_timeout_ms: u64,

    /// Deny every path of a domain whose robots.txt cannot be fetched
    pub strict: bool,

    /// User agent sent with robots.txt requests
    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 10_000,
            strict: false,
            user_agent: format!("ink-lantern/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RobotsConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}
