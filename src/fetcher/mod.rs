//! Single-page fetching through the session pool

mod cache;
mod metrics;
mod options;
mod page;

pub use cache::{cache_key, MemoryCache, ResultCache};
pub use metrics::{FetchMetrics, FetchMetricsSnapshot};
pub use options::{Action, ActionStep, FetchOptions, ScrollDirection, WaitPolicy};
pub use page::{FetchedPage, PageFetcher};
