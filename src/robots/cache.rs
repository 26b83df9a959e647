//! Per-origin robots.txt cache
//!
//! Each origin's file is fetched at most once per cache. Concurrent callers for the
//! same origin share a single in-flight fetch.

use crate::config::RobotsConfig;
use crate::robots::ParsedRobots;
use crate::url::origin_key;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

type Slot = Arc<OnceCell<Arc<ParsedRobots>>>;

/// Memoized robots.txt policies, scoped to one crawl
#[derive(Debug)]
pub struct RobotsCache {
    client: Client,
    timeout: Duration,
    strict: bool,
    entries: Mutex<HashMap<String, Slot>>,
    fetches: AtomicUsize,
}

impl RobotsCache {
    /// Builds a cache with its own HTTP client
    pub fn new(config: &RobotsConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.fetch_timeout())
            .connect_timeout(config.fetch_timeout())
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self::with_client(client, config))
    }

    /// Builds a cache around an existing client
    pub fn with_client(client: Client, config: &RobotsConfig) -> Self {
        Self {
            client,
            timeout: config.fetch_timeout(),
            strict: config.strict,
            entries: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Checks whether the generic-agent rules of the URL's origin allow it
    pub async fn is_allowed(&self, url: &Url) -> bool {
        self.policy_for(url).await.is_allowed(url.as_str())
    }

    /// Returns the policy for the URL's origin, fetching it on first use
    pub async fn policy_for(&self, url: &Url) -> Arc<ParsedRobots> {
        let Some(origin) = origin_key(url) else {
            return Arc::new(ParsedRobots::allow_all());
        };

        let slot = {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            entries.entry(origin.clone()).or_default().clone()
        };

        slot.get_or_init(|| async {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            Arc::new(self.fetch(url, &origin).await)
        })
        .await
        .clone()
    }

    /// Number of robots.txt fetches performed so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    async fn fetch(&self, url: &Url, origin: &str) -> ParsedRobots {
        let robots_url = match url.join("/robots.txt") {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!("Cannot build robots.txt URL for {}: {}", origin, e);
                return self.fallback();
            }
        };

        tracing::debug!("Fetching {}", robots_url);

        let response = match self
            .client
            .get(robots_url.clone())
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", robots_url, e);
                return self.fallback();
            }
        };

        let status = response.status();

        if status.is_client_error() {
            tracing::debug!(
                "No robots.txt at {} (HTTP {}), allowing all",
                origin,
                status.as_u16()
            );
            return ParsedRobots::allow_all();
        }

        if !status.is_success() {
            tracing::warn!(
                "robots.txt at {} returned HTTP {}",
                origin,
                status.as_u16()
            );
            return self.fallback();
        }

        match response.text().await {
            Ok(body) => ParsedRobots::from_content(&body),
            Err(e) => {
                tracing::warn!("Failed to read robots.txt body from {}: {}", origin, e);
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> ParsedRobots {
        if self.strict {
            ParsedRobots::deny_all()
        } else {
            ParsedRobots::allow_all()
        }
    }
}
