//! Link extraction from rendered markup
//!
//! Pulls candidate links out of a page:
//! - `<a href="...">` anchors (anchors with a `download` attribute are skipped)
//! - `<link rel="canonical" href="...">`
//!
//! A `<base href>` element, when present, replaces the page URL as the resolution base.
//! `rel="nofollow"` links are still followed.

use crate::url::normalize::resolve_href;
use scraper::{Html, Selector};
use url::Url;

/// Extracts the page title from markup
pub fn extract_title(markup: &str) -> Option<String> {
    let document = Html::parse_document(markup);
    title_of(&document)
}

pub(crate) fn title_of(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extracts every crawlable link from the markup, resolved and normalized
///
/// Links come back in document order and may contain duplicates; deduplication is
/// the filter's job.
pub fn extract_links(markup: &str, page_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(markup);
    let base = document_base(&document, page_url);
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_href(href, &base))
            {
                links.push(url);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_href(href, &base))
            {
                links.push(url);
            }
        }
    }

    links
}

/// Picks the URL relative links resolve against
fn document_base(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|element| element.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .filter(|base| base.scheme() == "http" || base.scheme() == "https")
        .unwrap_or_else(|| page_url.clone())
}
