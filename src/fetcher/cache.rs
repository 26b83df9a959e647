//! Fetch result cache
//!
//! The long-term cache is an external collaborator reached through [`ResultCache`].
//! [`MemoryCache`] is a small in-process LRU used when nothing else is wired in.

use crate::fetcher::FetchOptions;
use async_trait::async_trait;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

/// Key/value store for serialized fetch results
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Duration);
}

/// The options that change what a fetch returns, in key order
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyOptions<'a> {
    actions: &'a [crate::fetcher::ActionStep],
    headers: &'a BTreeMap<String, String>,
    include_raw_html: bool,
    include_screenshot: bool,
    mobile: bool,
    only_main_content: bool,
    timeout: Option<u64>,
    wait_for: Option<u64>,
    wait_for_network_idle: bool,
    wait_for_selector: Option<&'a str>,
}

/// Builds the cache key for a normalized URL and its options
///
/// `scrape:` followed by the hex SHA-256 of `url|options-json`.
pub fn cache_key(url: &Url, options: &FetchOptions) -> String {
    let relevant = KeyOptions {
        actions: &options.actions,
        headers: &options.headers,
        include_raw_html: options.include_raw_html,
        include_screenshot: options.include_screenshot,
        mobile: options.mobile,
        only_main_content: options.only_main_content,
        timeout: options.timeout,
        wait_for: options.wait_for,
        wait_for_network_idle: options.wait_for_network_idle,
        wait_for_selector: options.wait_for_selector.as_deref(),
    };
    let options_json = serde_json::to_string(&relevant).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(options_json.as_bytes());
    format!("scrape:{}", hex::encode(hasher.finalize()))
}

/// In-memory LRU cache with per-entry expiry
#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<LruCache<String, (Instant, String)>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().ok()?;
        let found = entries
            .get(key)
            .map(|(expires, value)| (*expires > Instant::now(), value.clone()));

        match found {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(key.to_string(), (Instant::now() + ttl, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_key_is_stable_per_url_and_options() {
        let base = FetchOptions::default();
        let a = cache_key(&url("https://example.com/a"), &base);

        assert!(a.starts_with("scrape:"));
        assert_eq!(a.len(), "scrape:".len() + 64);
        assert_eq!(a, cache_key(&url("https://example.com/a"), &base.clone()));
        assert_ne!(a, cache_key(&url("https://example.com/b"), &base));

        // Output formats are applied after the render
        let formats = FetchOptions {
            formats: vec!["html".to_string()],
            ..base.clone()
        };
        assert_eq!(a, cache_key(&url("https://example.com/a"), &formats));
    }

    #[test]
    fn test_render_affecting_options_change_the_key() {
        let page = url("https://example.com/a");
        let base = FetchOptions::default();
        let plain = cache_key(&page, &base);

        let variants = [
            FetchOptions {
                headers: [("Accept-Language".to_string(), "de-DE".to_string())]
                    .into_iter()
                    .collect(),
                ..base.clone()
            },
            FetchOptions {
                wait_for: Some(10_000),
                ..base.clone()
            },
            FetchOptions {
                wait_for_network_idle: true,
                ..base.clone()
            },
            FetchOptions {
                wait_for_selector: Some("#app".to_string()),
                ..base.clone()
            },
            FetchOptions {
                timeout: Some(5_000),
                ..base.clone()
            },
            FetchOptions {
                mobile: true,
                ..base.clone()
            },
        ];

        let mut keys: Vec<String> = variants.iter().map(|o| cache_key(&page, o)).collect();
        assert!(keys.iter().all(|k| *k != plain));
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), variants.len());
    }

    #[tokio::test]
    async fn test_memory_cache_expiry() {
        let cache = MemoryCache::new(4);
        cache.set("k", "v".to_string(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));

        cache.set("gone", "v".to_string(), Duration::ZERO).await;
        assert_eq!(cache.get("gone").await, None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_cache_evicts_lru() {
        let cache = MemoryCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.set("a", "1".to_string(), ttl).await;
        cache.set("b", "2".to_string(), ttl).await;
        cache.get("a").await;
        cache.set("c", "3".to_string(), ttl).await;

        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.get("a").await, Some("1".to_string()));
    }
}
