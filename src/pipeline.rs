//! Capture pipeline orchestration.
//!
//! Runs resolve → acquire → extract → build → write for one accepted
//! capture. [`spawn_capture`] detaches the run onto the tokio runtime after
//! the HTTP response has gone out. The task is its own error boundary:
//! every outcome ends as a log event under a `capture` span carrying a job
//! id, nothing is retried, and nothing is reported back to the caller.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::acquire::{acquire_content, PageFetcher};
use crate::config::Config;
use crate::document::build_page;
use crate::error::CaptureError;
use crate::extractor::extract_knowledge;
use crate::llm::CompletionClient;
use crate::models::{CaptureRequest, LicenseRecord};
use crate::notion::WorkspaceApi;
use crate::resolver::{DatabaseResolver, TargetSource};
use crate::store::LicenseStore;

/// Everything a capture job needs, built once at startup.
pub struct CaptureContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn LicenseStore>,
    pub workspace: Arc<dyn WorkspaceApi>,
    pub completion: Arc<dyn CompletionClient>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub resolver: DatabaseResolver,
}

impl CaptureContext {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn LicenseStore>,
        workspace: Arc<dyn WorkspaceApi>,
        completion: Arc<dyn CompletionClient>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        let resolver =
            DatabaseResolver::new(store.clone(), workspace.clone(), config.discovery.clone());
        Self {
            config,
            store,
            workspace,
            completion,
            fetcher,
            resolver,
        }
    }
}

/// A page that made it into the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub page_id: String,
    pub database_id: String,
    pub title: String,
}

/// Run one capture to completion.
pub async fn run_capture(
    ctx: &CaptureContext,
    record: &LicenseRecord,
    request: &CaptureRequest,
) -> Result<CaptureOutcome, CaptureError> {
    let token = record
        .external_token
        .as_deref()
        .ok_or_else(|| CaptureError::NotConnected(record.key.clone()))?;

    let target = ctx
        .resolver
        .resolve_target(request.database_id.as_deref(), record)
        .await
        .map_err(CaptureError::Store)?
        .ok_or_else(|| CaptureError::NoDatabase(record.key.clone()))?;
    if target.source != TargetSource::Explicit {
        tracing::info!(database_id = %target.database_id, source = ?target.source, "target database");
    }

    let content = acquire_content(
        ctx.fetcher.as_ref(),
        &ctx.config.fetch,
        request.url.as_deref(),
        request.text.as_deref(),
    )
    .await;

    let knowledge = extract_knowledge(ctx.completion.as_ref(), &content)
        .await
        .map_err(CaptureError::Extraction)?;

    let page = build_page(&knowledge, request.url.as_deref(), &target.database_id);
    let page_id = ctx
        .workspace
        .create_page(token, &page)
        .await
        .map_err(CaptureError::Write)?;

    Ok(CaptureOutcome {
        page_id,
        database_id: target.database_id,
        title: page.title().unwrap_or_default().to_string(),
    })
}

/// Detach a capture onto the runtime. The handle is only useful to tests;
/// the server drops it.
pub fn spawn_capture(
    ctx: Arc<CaptureContext>,
    record: LicenseRecord,
    request: CaptureRequest,
) -> JoinHandle<()> {
    let job_id = Uuid::new_v4();
    let span = tracing::info_span!("capture", job = %job_id, license = %record.key);

    tokio::spawn(
        async move {
            tracing::info!(url = ?request.url, has_text = request.text.is_some(), "capture started");
            match run_capture(&ctx, &record, &request).await {
                Ok(outcome) => tracing::info!(
                    page_id = %outcome.page_id,
                    database_id = %outcome.database_id,
                    title = %outcome.title,
                    "capture written"
                ),
                Err(e) => tracing::error!(stage = e.stage(), error = %e, "capture failed"),
            }
        }
        .instrument(span),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::EXTRACTION_FAILED;
    use crate::notion::DatabaseSummary;
    use crate::store::memory::InMemoryLicenseStore;
    use crate::testing::{MockCompletion, MockWorkspace, StaticFetcher};

    struct Harness {
        store: Arc<InMemoryLicenseStore>,
        workspace: Arc<MockWorkspace>,
        completion: Arc<MockCompletion>,
        fetcher: Arc<StaticFetcher>,
        ctx: CaptureContext,
    }

    fn harness(reply: &str, fetcher: StaticFetcher) -> Harness {
        harness_with(MockCompletion::replying(reply), fetcher)
    }

    fn harness_with(completion: MockCompletion, fetcher: StaticFetcher) -> Harness {
        let store = Arc::new(InMemoryLicenseStore::new());
        let workspace = Arc::new(MockWorkspace::new());
        let completion = Arc::new(completion);
        let fetcher = Arc::new(fetcher);
        let ctx = CaptureContext::new(
            Arc::new(Config::default()),
            store.clone(),
            workspace.clone(),
            completion.clone(),
            fetcher.clone(),
        );
        Harness {
            store,
            workspace,
            completion,
            fetcher,
            ctx,
        }
    }

    fn connected(key: &str) -> LicenseRecord {
        let mut r = LicenseRecord::new(key);
        r.external_token = Some("tok".into());
        r
    }

    #[tokio::test]
    async fn writes_one_page_to_discovered_database() {
        let h = harness(
            r#"{"Title":"Example","Summary":"s","Category":"文章"}"#,
            StaticFetcher::ok("<article>Hello world</article>"),
        );
        h.workspace.set_default_search(vec![DatabaseSummary {
            id: "db-found".into(),
            title: "Inbox".into(),
        }]);
        let record = connected("K1");
        h.store.insert(record.clone());
        let request = CaptureRequest {
            url: Some("https://example.com/a".into()),
            ..Default::default()
        };

        let outcome = run_capture(&h.ctx, &record, &request).await.unwrap();

        assert_eq!(outcome.database_id, "db-found");
        assert_eq!(outcome.title, "Example");
        let pages = h.workspace.pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].0, "tok");
        assert_eq!(pages[0].1.parent.database_id, "db-found");
        assert_eq!(h.fetcher.calls(), 1);
        assert!(h.completion.calls()[0].1.contains("Hello world"));
        // discovery result is cached for next time
        let stored = h.store.find_by_key("K1").await.unwrap().unwrap();
        assert_eq!(stored.database_id.as_deref(), Some("db-found"));
    }

    #[tokio::test]
    async fn malformed_reply_writes_nothing() {
        let h = harness("not json at all", StaticFetcher::failing());
        let mut record = connected("K");
        record.database_id = Some("db".into());
        let request = CaptureRequest {
            text: Some("a note".into()),
            ..Default::default()
        };

        let err = run_capture(&h.ctx, &record, &request).await.unwrap_err();

        assert!(matches!(err, CaptureError::Extraction(_)));
        assert!(h.workspace.pages().is_empty());
        assert_eq!(h.completion.calls().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_completion_writes_nothing() {
        let h = harness_with(MockCompletion::failing(), StaticFetcher::ok("<p>body</p>"));
        let mut record = connected("K");
        record.database_id = Some("db".into());
        let request = CaptureRequest {
            url: Some("https://example.com".into()),
            ..Default::default()
        };

        let err = run_capture(&h.ctx, &record, &request).await.unwrap_err();

        assert!(matches!(err, CaptureError::Extraction(_)));
        assert_eq!(err.stage(), "extraction");
        assert_eq!(h.completion.calls().len(), 1);
        assert_eq!(h.workspace.write_attempts(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_still_produces_a_page() {
        let h = harness(r#"{"Title":"Guess"}"#, StaticFetcher::failing());
        let mut record = connected("K");
        record.database_id = Some("db".into());
        let request = CaptureRequest {
            url: Some("https://example.com/down".into()),
            ..Default::default()
        };

        run_capture(&h.ctx, &record, &request).await.unwrap();

        assert!(h.completion.calls()[0].1.contains(EXTRACTION_FAILED));
        assert_eq!(h.workspace.pages().len(), 1);
    }

    #[tokio::test]
    async fn no_database_ends_job_before_fetching() {
        let h = harness("{}", StaticFetcher::ok("<p>x</p>"));
        let record = connected("K");
        let request = CaptureRequest {
            url: Some("https://example.com".into()),
            ..Default::default()
        };

        let err = run_capture(&h.ctx, &record, &request).await.unwrap_err();

        assert!(matches!(err, CaptureError::NoDatabase(_)));
        assert_eq!(err.stage(), "discovery");
        assert_eq!(h.fetcher.calls(), 0);
        assert!(h.completion.calls().is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_reported_once() {
        let h = harness("{}", StaticFetcher::failing());
        h.workspace.fail_writes();
        let mut record = connected("K");
        record.database_id = Some("db".into());
        let request = CaptureRequest {
            text: Some("t".into()),
            ..Default::default()
        };

        let err = run_capture(&h.ctx, &record, &request).await.unwrap_err();
        assert!(matches!(err, CaptureError::Write(_)));
        assert_eq!(h.workspace.write_attempts(), 1);
    }

    #[tokio::test]
    async fn explicit_database_is_not_cached() {
        let h = harness("{}", StaticFetcher::failing());
        let record = connected("K");
        h.store.insert(record.clone());
        let request = CaptureRequest {
            text: Some("t".into()),
            database_id: Some("db-explicit".into()),
            ..Default::default()
        };

        let outcome = run_capture(&h.ctx, &record, &request).await.unwrap();
        assert_eq!(outcome.database_id, "db-explicit");
        assert_eq!(h.workspace.search_calls(), 0);
        let stored = h.store.find_by_key("K").await.unwrap().unwrap();
        assert!(stored.database_id.is_none());
    }
}
