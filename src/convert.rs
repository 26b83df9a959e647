//! Content conversion
//!
//! Turns rendered markup into markdown plus a small metadata object. The crawler calls the
//! converter once per successful page; a conversion error is attached to that page and
//! never fails it.

use crate::fetcher::FetchOptions;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use std::collections::HashSet;
use url::Url;

/// Elements that never contribute content
const ALWAYS_DROPPED: &[&str] = &["script", "style", "noscript", "template"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Main-content containers, in priority order
const MAIN_CONTENT: &[&str] = &["main", "article", "[role='main']"];

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Invalid selector '{0}'")]
    Selector(String),

    #[error("Markdown conversion failed: {0}")]
    Markdown(String),
}

/// Converter output for one page
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub markdown: String,
    pub structured_data: Value,
}

/// Turns raw markup into markdown and structured data
pub trait ContentConverter: Send + Sync {
    fn convert(
        &self,
        markup: &str,
        url: &Url,
        options: &FetchOptions,
    ) -> Result<Converted, ConvertError>;
}

/// Default converter built on `scraper` and `htmd`
#[derive(Debug, Clone, Default)]
pub struct MarkdownConverter;

impl ContentConverter for MarkdownConverter {
    fn convert(
        &self,
        markup: &str,
        url: &Url,
        options: &FetchOptions,
    ) -> Result<Converted, ConvertError> {
        let document = Html::parse_document(markup);
        let structured_data = extract_metadata(&document, url);

        let html = select_content(&document, options)?;
        let markdown = htmd::convert(&html).map_err(|e| ConvertError::Markdown(e.to_string()))?;

        Ok(Converted {
            markdown: markdown.trim().to_string(),
            structured_data,
        })
    }
}

fn parse_selectors(raw: &[String]) -> Result<Vec<Selector>, ConvertError> {
    raw.iter()
        .map(|s| Selector::parse(s).map_err(|_| ConvertError::Selector(s.clone())))
        .collect()
}

/// Serializes the part of the document that should become markdown
fn select_content(document: &Html, options: &FetchOptions) -> Result<String, ConvertError> {
    let include = parse_selectors(&options.include_tags)?;
    let mut exclude = parse_selectors(&options.exclude_tags)?;
    for tag in ALWAYS_DROPPED {
        exclude.push(
            Selector::parse(tag).map_err(|_| ConvertError::Selector(tag.to_string()))?,
        );
    }

    let main = options
        .only_main_content
        .then(|| main_content(document))
        .flatten();
    let root = main.unwrap_or_else(|| body_or_root(document));

    let mut removed = HashSet::new();
    for selector in &exclude {
        for element in root.select(selector) {
            removed.insert(element.id());
        }
    }
    let skip: &dyn Fn(ElementRef<'_>) -> bool = &|element| removed.contains(&element.id());

    let mut html = String::new();
    if include.is_empty() {
        serialize_children(root, skip, &mut html);
    } else {
        let mut kept = HashSet::new();
        for selector in &include {
            for element in root.select(selector) {
                // Nested matches are already covered by their ancestor
                if element.ancestors().any(|a| kept.contains(&a.id())) || skip(element) {
                    continue;
                }
                kept.insert(element.id());
                serialize_element(element, skip, &mut html);
            }
        }
    }
    Ok(html)
}

fn main_content(document: &Html) -> Option<ElementRef<'_>> {
    MAIN_CONTENT.iter().find_map(|raw| {
        let selector = Selector::parse(raw).ok()?;
        document.select(&selector).next()
    })
}

fn body_or_root(document: &Html) -> ElementRef<'_> {
    Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element())
}

fn serialize_element(
    element: ElementRef<'_>,
    skip: &dyn Fn(ElementRef<'_>) -> bool,
    out: &mut String,
) {
    if skip(element) {
        return;
    }

    let name = element.value().name();
    out.push('<');
    out.push_str(name);
    for (attr, value) in element.value().attrs() {
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        escape_into(value, out);
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    serialize_children(element, skip, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn serialize_children(
    element: ElementRef<'_>,
    skip: &dyn Fn(ElementRef<'_>) -> bool,
    out: &mut String,
) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => escape_into(text, out),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    serialize_element(child, skip, out);
                }
            }
            _ => {}
        }
    }
}

fn escape_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

/// Page metadata from `<meta>` tags, the title and `html[lang]`
fn extract_metadata(document: &Html, url: &Url) -> Value {
    let mut data = Map::new();

    let title = meta_content(document, "meta[property='og:title']")
        .or_else(|| crate::url::title_of(document));
    let description = meta_content(document, "meta[name='description']")
        .or_else(|| meta_content(document, "meta[property='og:description']"));
    let language = Selector::parse("html[lang]").ok().and_then(|s| {
        document
            .select(&s)
            .next()
            .and_then(|html| html.value().attr("lang"))
            .map(str::to_string)
    });

    let fields = [
        ("title", title),
        ("description", description),
        ("language", language),
        ("author", meta_content(document, "meta[name='author']")),
        (
            "publishedTime",
            meta_content(document, "meta[property='article:published_time']"),
        ),
        ("ogImage", meta_content(document, "meta[property='og:image']")),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            data.insert(key.to_string(), Value::String(value));
        }
    }

    if let Some(keywords) = meta_content(document, "meta[name='keywords']") {
        let list: Vec<Value> = keywords
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| Value::String(k.to_string()))
            .collect();
        data.insert("keywords".to_string(), Value::Array(list));
    }

    data.insert("sourceURL".to_string(), Value::String(url.to_string()));
    Value::Object(data)
}
