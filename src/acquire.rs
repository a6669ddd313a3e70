//! Content acquisition: turn a capture's URL or text into the plain text
//! handed to the completion service.
//!
//! Extraction is a best-effort heuristic. Page chrome (scripts, navigation,
//! footers, ads, sidebars) is skipped, then the text of the most specific
//! content container is taken: `article`, `main`, `[role="main"]`, and
//! finally `body`, first non-empty wins.
//!
//! A failed fetch never aborts a capture. The output then carries the URL
//! and an explicit failure marker so the completion service can still work
//! from the address alone.

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

use crate::config::FetchConfig;

/// Tags whose text never counts as page content.
const EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "aside", "iframe", "noscript", "svg",
];

/// Classes marking ads and navigation chrome.
const EXCLUDED_CLASSES: &[&str] = &[
    "ad",
    "ads",
    "advertisement",
    "sidebar",
    "menu",
    "navigation",
];

/// Content containers, most specific first.
const CONTAINERS: &[&str] = &["article", "main", "[role=\"main\"]", "body"];

/// Marker placed in the output when a page could not be fetched or parsed.
pub const EXTRACTION_FAILED: &str = "extraction failed";

/// Fetches raw markup for a URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String>;
}

/// Fetches pages over HTTP with a browser-like identity and a hard timeout.
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8")
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Produce the text for the extraction stage.
///
/// With a URL the page is fetched and reduced to at most
/// `config.max_chars` characters; otherwise `text` is used verbatim.
pub async fn acquire_content(
    fetcher: &dyn PageFetcher,
    config: &FetchConfig,
    url: Option<&str>,
    text: Option<&str>,
) -> String {
    let Some(url) = url else {
        return text.unwrap_or_default().to_string();
    };

    match fetcher.fetch_html(url).await {
        Ok(html) => {
            let body = extract_main_text(&html);
            tracing::info!(url, chars = body.chars().count(), "page text extracted");
            format!(
                "[URL]: {}\n[Content]:\n{}",
                url,
                truncate_chars(&body, config.max_chars)
            )
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "page fetch failed, continuing with URL only");
            failure_placeholder(url)
        }
    }
}

pub fn failure_placeholder(url: &str) -> String {
    format!(
        "[URL]: {}\n({}: the page could not be fetched; infer the content from the URL)",
        url, EXTRACTION_FAILED
    )
}

/// Whitespace-collapsed text of the first non-empty content container.
pub fn extract_main_text(html: &str) -> String {
    let document = Html::parse_document(html);

    for css in CONTAINERS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        let raw: String = document.select(&selector).map(content_text).collect();
        let collapsed = collapse_whitespace(&raw);
        if !collapsed.is_empty() {
            return collapsed;
        }
    }
    String::new()
}

/// Concatenated text under `element`, skipping anything inside page chrome.
fn content_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let in_chrome = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| is_chrome(&el));
        if !in_chrome {
            out.push_str(text);
        }
    }
    out
}

fn is_chrome(el: &ElementRef<'_>) -> bool {
    let value = el.value();
    EXCLUDED_TAGS.contains(&value.name())
        || value.classes().any(|c| EXCLUDED_CLASSES.contains(&c))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max` characters of `s` (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
