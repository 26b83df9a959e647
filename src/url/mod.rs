//! URL handling module
//!
//! This module provides functionality for:
//! - Normalizing URLs into deduplication keys
//! - Same-site and origin checks
//! - Extracting links from rendered markup
//! - Applying the crawl's domain, pattern and robots policy to discovered links

mod domain;
mod filter;
mod links;
mod normalize;

pub use domain::{extract_domain, origin_key, same_site, site_host};
pub use filter::{Extraction, LinkFilter, Verdict};
pub use links::{extract_links, extract_title};
pub(crate) use links::title_of;
pub use normalize::{normalize, normalize_url, resolve_href};
