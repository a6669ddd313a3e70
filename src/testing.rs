//! In-process doubles for the external services.
//!
//! Used by the unit tests and by `tests/`, which drive the HTTP surface
//! without reaching Notion, the completion endpoint, or the open web.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::acquire::PageFetcher;
use crate::document::PageDraft;
use crate::llm::CompletionClient;
use crate::notion::{DatabaseSummary, WorkspaceApi};

#[derive(Default)]
struct WorkspaceState {
    exchange_token: Option<String>,
    exchange_calls: Vec<String>,
    scripted_search: VecDeque<Result<Vec<DatabaseSummary>>>,
    default_search: Vec<DatabaseSummary>,
    search_calls: usize,
    fail_writes: bool,
    write_attempts: usize,
    pages: Vec<(String, PageDraft)>,
}

/// Scriptable [`WorkspaceApi`].
///
/// Searches pop scripted results first and fall back to the default list
/// (empty unless set). Code exchange returns `"token-for-{code}"` unless a
/// token is set; the code `"bad"` always fails.
#[derive(Default)]
pub struct MockWorkspace {
    state: Mutex<WorkspaceState>,
}

impl MockWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_exchange_token(&self, token: &str) {
        self.lock().exchange_token = Some(token.to_string());
    }

    pub fn push_search(&self, result: Result<Vec<DatabaseSummary>>) {
        self.lock().scripted_search.push_back(result);
    }

    pub fn set_default_search(&self, databases: Vec<DatabaseSummary>) {
        self.lock().default_search = databases;
    }

    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }

    pub fn exchange_calls(&self) -> Vec<String> {
        self.lock().exchange_calls.clone()
    }

    pub fn search_calls(&self) -> usize {
        self.lock().search_calls
    }

    pub fn write_attempts(&self) -> usize {
        self.lock().write_attempts
    }

    /// Successfully written pages as `(token, draft)`.
    pub fn pages(&self) -> Vec<(String, PageDraft)> {
        self.lock().pages.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WorkspaceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WorkspaceApi for MockWorkspace {
    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<String> {
        let mut state = self.lock();
        state.exchange_calls.push(code.to_string());
        if code == "bad" {
            bail!("Token exchange failed (400 Bad Request): invalid_grant");
        }
        Ok(state
            .exchange_token
            .clone()
            .unwrap_or_else(|| format!("token-for-{}", code)))
    }

    async fn search_databases(&self, _token: &str, page_size: u32) -> Result<Vec<DatabaseSummary>> {
        let mut state = self.lock();
        state.search_calls += 1;
        let result = match state.scripted_search.pop_front() {
            Some(result) => result?,
            None => state.default_search.clone(),
        };
        Ok(result.into_iter().take(page_size as usize).collect())
    }

    async fn create_page(&self, token: &str, page: &PageDraft) -> Result<String> {
        let mut state = self.lock();
        state.write_attempts += 1;
        if state.fail_writes {
            bail!("Page creation failed (400 Bad Request): validation_error");
        }
        state.pages.push((token.to_string(), page.clone()));
        Ok(format!("page-{}", state.pages.len()))
    }
}

/// [`CompletionClient`] with a canned reply. Records `(system, user)` pairs.
pub struct MockCompletion {
    reply: Option<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockCompletion {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails like an unreachable endpoint.
    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CompletionClient for MockCompletion {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((system.to_string(), user.to_string()));
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => bail!("Completion API error 503 Service Unavailable"),
        }
    }
}

/// [`PageFetcher`] serving one fixed document for every URL.
pub struct StaticFetcher {
    html: Option<String>,
    calls: Mutex<usize>,
}

impl StaticFetcher {
    pub fn ok(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            html: None,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String> {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        match &self.html {
            Some(html) => Ok(html.clone()),
            None => bail!("GET {} timed out", url),
        }
    }
}
