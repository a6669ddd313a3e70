//! Notion workspace API client.
//!
//! [`WorkspaceApi`] is the seam between the capture pipeline and the
//! partner: OAuth code exchange, database discovery search, and page
//! creation. [`NotionClient`] is the HTTP implementation.
//!
//! None of these calls retry. Callers decide what a failure means: the
//! resolver treats discovery failures as "nothing found yet", the pipeline
//! treats a page-write failure as the end of the job.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

use crate::config::NotionConfig;
use crate::document::PageDraft;

/// A database visible to a token, as returned by discovery search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSummary {
    pub id: String,
    pub title: String,
}

/// Title used when a database has no plain-text title.
pub const UNTITLED_DATABASE: &str = "Untitled";

#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    /// Exchange an OAuth authorization code for an access token.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String>;

    /// List databases the token can see, most relevant first.
    async fn search_databases(&self, token: &str, page_size: u32) -> Result<Vec<DatabaseSummary>>;

    /// Create a page and return its id.
    async fn create_page(&self, token: &str, page: &PageDraft) -> Result<String>;
}

/// HTTP client for `api.notion.com` (or a configured stand-in).
pub struct NotionClient {
    http: reqwest::Client,
    config: NotionConfig,
}

impl NotionClient {
    pub fn new(config: &NotionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base, path)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    id: String,
    #[serde(default)]
    title: Vec<RichText>,
}

#[derive(Deserialize)]
struct RichText {
    #[serde(default)]
    plain_text: Option<String>,
}

#[derive(Deserialize)]
struct CreatedPage {
    id: String,
}

fn summarize(result: SearchResult) -> DatabaseSummary {
    let title = result
        .title
        .into_iter()
        .next()
        .and_then(|t| t.plain_text)
        .unwrap_or_else(|| UNTITLED_DATABASE.to_string());
    DatabaseSummary {
        id: result.id,
        title,
    }
}

/// Turn a non-2xx response into an error carrying the body text.
async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_text = response.text().await.unwrap_or_default();
    bail!("Notion {} error {}: {}", what, status, body_text);
}

#[async_trait]
impl WorkspaceApi for NotionClient {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String> {
        let client_id = self
            .config
            .client_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("NOTION_CLIENT_ID not configured"))?;
        let client_secret = self
            .config
            .client_secret
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("NOTION_CLIENT_SECRET not configured"))?;

        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "code": code,
            "redirect_uri": redirect_uri,
        });

        let response = self
            .http
            .post(self.endpoint("oauth/token"))
            .basic_auth(client_id, Some(client_secret))
            .json(&body)
            .send()
            .await
            .context("Notion token exchange request failed")?;

        let token: TokenResponse = check_status(response, "token exchange")
            .await?
            .json()
            .await
            .context("Invalid Notion token response")?;
        Ok(token.access_token)
    }

    async fn search_databases(&self, token: &str, page_size: u32) -> Result<Vec<DatabaseSummary>> {
        let body = serde_json::json!({
            "filter": { "value": "database", "property": "object" },
            "page_size": page_size,
        });

        let response = self
            .http
            .post(self.endpoint("search"))
            .bearer_auth(token)
            .header("Notion-Version", &self.config.version)
            .json(&body)
            .send()
            .await
            .context("Notion search request failed")?;

        let parsed: SearchResponse = check_status(response, "search")
            .await?
            .json()
            .await
            .context("Invalid Notion search response")?;

        Ok(parsed.results.into_iter().map(summarize).collect())
    }

    async fn create_page(&self, token: &str, page: &PageDraft) -> Result<String> {
        let response = self
            .http
            .post(self.endpoint("pages"))
            .bearer_auth(token)
            .header("Notion-Version", &self.config.version)
            .json(page)
            .send()
            .await
            .context("Notion page request failed")?;

        let created: CreatedPage = check_status(response, "page write")
            .await?
            .json()
            .await
            .context("Invalid Notion page response")?;
        Ok(created.id)
    }
}

/// Build the partner authorization URL. The license key rides along as the
/// opaque OAuth `state`.
pub fn authorize_url(
    config: &NotionConfig,
    client_id: &str,
    redirect_uri: &str,
    license_key: &str,
) -> Result<String> {
    let mut url = Url::parse(&format!("{}/v1/oauth/authorize", config.api_base))?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("response_type", "code")
        .append_pair("owner", "user")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", license_key);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_encodes_redirect_and_state() {
        let url = authorize_url(
            &NotionConfig::default(),
            "cid",
            "https://cap.example.com/callback",
            "CAP-1234-ABCD-0000",
        )
        .unwrap();
        assert!(url.starts_with("https://api.notion.com/v1/oauth/authorize?"));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("owner=user"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fcap.example.com%2Fcallback"));
        assert!(url.contains("state=CAP-1234-ABCD-0000"));
    }

    #[test]
    fn search_title_falls_back_to_untitled() {
        let parsed: SearchResponse = serde_json::from_str(
            r#"{"results":[{"id":"db1","title":[]},{"id":"db2","title":[{"plain_text":"Reading"}]}]}"#,
        )
        .unwrap();
        let titles: Vec<String> = parsed
            .results
            .into_iter()
            .map(|r| summarize(r).title)
            .collect();
        assert_eq!(titles, vec!["Untitled", "Reading"]);
    }
}
