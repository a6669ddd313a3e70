//! HTTP surface.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/setup` | Static entry page |
//! | `GET`  | `/auth?key=` | Validate a license and redirect to the Notion consent screen |
//! | `GET`  | `/callback` | OAuth return leg: bind token, run discovery, render a view |
//! | `GET`  | `/check-database?key=` | One discovery poll for the browser |
//! | `POST` | `/set-database` | Manual target-database override |
//! | `POST` | `/capture` | Accept a capture and run the pipeline in the background |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! JSON endpoints answer errors with:
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "unknown license key" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403),
//! `rate_limited` (429), `internal` (500). `/auth` and `/callback` are
//! browser-facing and answer errors with HTML pages instead.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser extensions and
//! shortcut apps can post captures.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeFile;

use crate::acquire::HttpFetcher;
use crate::config::Config;
use crate::db;
use crate::llm::ChatCompletionsClient;
use crate::migrate::migrate_pool;
use crate::models::{CaptureRequest, LicenseRecord};
use crate::notion::{authorize_url, NotionClient, UNTITLED_DATABASE};
use crate::pipeline::{spawn_capture, CaptureContext};
use crate::ratelimit::{client_ip, RateLimits, Route};
use crate::resolver::DiscoveryState;
use crate::store::sqlite::SqliteLicenseStore;
use crate::store::{is_expired_for_access, LicenseStore};
use crate::views;

/// Title reported by `/check-database` when the id came from the cache.
pub const CACHED_DATABASE_TITLE: &str = "已绑定";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    ctx: Arc<CaptureContext>,
    limits: Arc<RateLimits>,
}

impl AppState {
    pub fn new(ctx: CaptureContext) -> Self {
        let limits = RateLimits::new(&ctx.config.rate_limit);
        Self {
            ctx: Arc::new(ctx),
            limits: Arc::new(limits),
        }
    }

    fn config(&self) -> &Config {
        &self.ctx.config
    }

    fn store(&self) -> &dyn LicenseStore {
        self.ctx.store.as_ref()
    }

    async fn find(&self, key: Option<&str>) -> Result<Option<LicenseRecord>, AppError> {
        match key {
            Some(key) => self.store().find_by_key(key).await.map_err(internal),
            None => Ok(None),
        }
    }

    /// Count the request against `route` unless the license is an admin.
    fn admit(
        &self,
        route: Route,
        record: Option<&LicenseRecord>,
        headers: &HeaderMap,
        peer: SocketAddr,
    ) -> Result<(), AppError> {
        if record.is_some_and(|r| r.is_admin) {
            return Ok(());
        }
        let ip = client_ip(headers, peer, self.config().server.trust_proxy);
        if self.limits.check(route, ip) {
            Ok(())
        } else {
            tracing::warn!(%ip, ?route, "rate limit exceeded");
            Err(rate_limited())
        }
    }
}

/// Assemble the router. Call `into_make_service_with_connect_info::<SocketAddr>()`
/// on the result; the rate limiter needs the peer address.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route_service("/setup", ServeFile::new(&state.config().server.setup_page))
        .route("/auth", get(handle_auth))
        .route("/callback", get(handle_callback))
        .route("/check-database", get(handle_check_database))
        .route("/set-database", post(handle_set_database))
        .route("/capture", post(handle_capture))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server with the production clients.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let config = Arc::new(config.clone());
    if config.server.base_url.is_empty() {
        tracing::warn!("server.base_url is empty; OAuth redirects will not resolve");
    }

    let pool = db::connect(&config).await?;
    migrate_pool(&pool).await?;

    let ctx = CaptureContext::new(
        config.clone(),
        Arc::new(SqliteLicenseStore::new(pool)),
        Arc::new(NotionClient::new(&config.notion)?),
        Arc::new(ChatCompletionsClient::new(&config.llm)?),
        Arc::new(HttpFetcher::new(&config.fetch)?),
    );
    let state = AppState::new(ctx);

    let limits = state.limits.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            limits.retain_recent();
        }
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, base_url = %config.server.base_url, "server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum JSON response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    app_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn forbidden(message: impl Into<String>) -> AppError {
    app_error(StatusCode::FORBIDDEN, "forbidden", message)
}

fn rate_limited() -> AppError {
    app_error(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        "too many requests, try again in a minute",
    )
}

/// Store failures are logged here and reported without detail.
fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    app_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "internal error",
    )
}

fn html_error(status: StatusCode, message: &str) -> Response {
    (status, Html(views::error_page(message))).into_response()
}

/// License key from `Authorization: Bearer <key>`. Blank counts as absent.
fn bearer_key(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let key = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!key.is_empty()).then(|| key.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /auth ============

#[derive(Deserialize)]
struct AuthParams {
    key: Option<String>,
}

/// Handler for `GET /auth`.
///
/// Rate-limited per IP before the key is judged, so guessing keys is
/// throttled too. Admin keys skip the limiter.
async fn handle_auth(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<AuthParams>,
) -> Response {
    let key = non_blank(params.key);
    let record = match state.find(key.as_deref()).await {
        Ok(record) => record,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = state.admit(Route::Auth, record.as_ref(), &headers, peer) {
        return e.into_response();
    }

    let Some(record) = record else {
        let shown = key.unwrap_or_default();
        tracing::info!(license = %shown, "auth rejected: unknown key");
        return html_error(
            StatusCode::UNAUTHORIZED,
            &format!("无效的 License Key ({})", shown),
        );
    };
    if is_expired_for_access(&record) {
        tracing::info!(license = %record.key, "auth rejected: expired");
        return html_error(StatusCode::FORBIDDEN, "License Key 已过期");
    }

    let config = state.config();
    let Some(client_id) = config.notion.client_id.as_deref() else {
        tracing::error!("NOTION_CLIENT_ID is not configured");
        return html_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "服务器未配置 NOTION_CLIENT_ID",
        );
    };
    match authorize_url(
        &config.notion,
        client_id,
        &config.server.redirect_uri(),
        &record.key,
    ) {
        Ok(url) => {
            tracing::info!(license = %record.key, "redirecting to authorization");
            Redirect::to(&url).into_response()
        }
        Err(e) => internal(e).into_response(),
    }
}

// ============ GET /callback ============

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Handler for `GET /callback`.
///
/// Exchanges the code and binds the token. A license with a bound database
/// goes straight to the success view; otherwise the synchronous retry phase
/// of discovery picks between the success and polling views.
async fn handle_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = non_blank(params.error) {
        tracing::info!(%error, "authorization declined by partner");
        return html_error(StatusCode::BAD_REQUEST, &format!("授权失败: {}", error));
    }
    let (Some(code), Some(key)) = (non_blank(params.code), non_blank(params.state)) else {
        return html_error(StatusCode::BAD_REQUEST, "授权失败: 缺少 code 或 state 参数");
    };

    let record = match state.find(Some(key.as_str())).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::warn!(license = %key, "callback for unknown license key");
            return html_error(
                StatusCode::UNAUTHORIZED,
                &format!("无效的 License Key ({})", key),
            );
        }
        Err(e) => return e.into_response(),
    };

    let ctx = &state.ctx;
    let token = match ctx
        .workspace
        .exchange_code(&code, &state.config().server.redirect_uri())
        .await
    {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(license = %key, error = %format!("{:#}", e), "token exchange failed");
            return html_error(
                StatusCode::BAD_GATEWAY,
                &format!("授权过程中发生错误: {:#}", e),
            );
        }
    };

    if let Err(e) = ctx.store.bind_token(&key, &token).await {
        return internal(e).into_response();
    }
    tracing::info!(license = %key, "workspace token bound");

    // A bound database survives re-authorization; only /set-database replaces it.
    if record.database_id.is_some() {
        tracing::info!(license = %key, "database already bound; skipping discovery");
        return Html(views::success_page(&key, CACHED_DATABASE_TITLE)).into_response();
    }

    match ctx.resolver.discover_after_authorization(&key, &token).await {
        Ok(DiscoveryState::Resolved(db)) => {
            let title = db.title.as_deref().unwrap_or(UNTITLED_DATABASE);
            Html(views::success_page(&key, title)).into_response()
        }
        Ok(_) => {
            tracing::info!(license = %key, "no database visible yet; handing over to browser polling");
            Html(views::polling_page(&key)).into_response()
        }
        Err(e) => internal(e).into_response(),
    }
}

// ============ GET /check-database ============

#[derive(Deserialize)]
struct CheckParams {
    key: Option<String>,
}

#[derive(Serialize, Debug, Default)]
struct CheckDatabaseResponse {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Handler for `GET /check-database`. One `Pending` step of discovery.
async fn handle_check_database(
    State(state): State<AppState>,
    Query(params): Query<CheckParams>,
) -> Result<Response, AppError> {
    let Some(key) = non_blank(params.key) else {
        return Err(bad_request("missing key"));
    };
    let Some(record) = state.find(Some(key.as_str())).await? else {
        let body = CheckDatabaseResponse {
            error: Some("unknown license key".to_string()),
            ..Default::default()
        };
        return Ok((StatusCode::UNAUTHORIZED, Json(body)).into_response());
    };
    if record.external_token.is_none() {
        let body = CheckDatabaseResponse {
            error: Some("no token".to_string()),
            ..Default::default()
        };
        return Ok(Json(body).into_response());
    }

    let body = match state.ctx.resolver.poll(&record).await.map_err(internal)? {
        DiscoveryState::Resolved(db) => CheckDatabaseResponse {
            found: true,
            title: Some(
                db.title
                    .unwrap_or_else(|| CACHED_DATABASE_TITLE.to_string()),
            ),
            database_id: Some(db.id),
            error: None,
        },
        _ => CheckDatabaseResponse::default(),
    };
    Ok(Json(body).into_response())
}

// ============ POST /set-database ============

#[derive(Deserialize)]
struct SetDatabaseBody {
    #[serde(default)]
    database_id: Option<String>,
}

#[derive(Serialize)]
struct SetDatabaseResponse {
    database_id: String,
    changed: bool,
}

/// Handler for `POST /set-database`. Expiry is not checked here.
async fn handle_set_database(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SetDatabaseBody>, JsonRejection>,
) -> Result<Json<SetDatabaseResponse>, AppError> {
    let key = bearer_key(&headers);
    let database_id = body.ok().and_then(|Json(b)| non_blank(b.database_id));
    let (Some(key), Some(database_id)) = (key, database_id) else {
        return Err(bad_request(
            "requires Authorization: Bearer <key> and database_id in the body",
        ));
    };
    if state.find(Some(key.as_str())).await?.is_none() {
        return Err(unauthorized("unknown license key"));
    }

    let changed = state
        .ctx
        .resolver
        .override_database(&key, &database_id)
        .await
        .map_err(internal)?;
    Ok(Json(SetDatabaseResponse {
        database_id,
        changed,
    }))
}

// ============ POST /capture ============

#[derive(Serialize)]
struct CaptureAccepted {
    status: &'static str,
    message: &'static str,
}

/// Handler for `POST /capture`.
///
/// Everything that can be judged synchronously is judged here; the pipeline
/// itself runs detached and never affects this response.
async fn handle_capture(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<CaptureRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let key = bearer_key(&headers);
    let record = state.find(key.as_deref()).await?;
    state.admit(Route::Capture, record.as_ref(), &headers, peer)?;

    let Some(record) = record else {
        return Err(unauthorized("missing or unknown license key"));
    };
    if is_expired_for_access(&record) {
        return Err(forbidden("license key has expired"));
    }
    if record.external_token.is_none() {
        return Err(forbidden(
            "Notion is not connected yet; visit /setup to authorize",
        ));
    }

    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let request = request.normalized();
    if request.url.is_none() && request.text.is_none() {
        return Err(bad_request("either url or text is required"));
    }

    spawn_capture(state.ctx.clone(), record, request);

    Ok((
        StatusCode::ACCEPTED,
        Json(CaptureAccepted {
            status: "accepted",
            message: "capture received, processing in the background",
        }),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_key_strips_scheme_and_blanks() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_key(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  CAP-1 "));
        assert_eq!(bearer_key(&headers).as_deref(), Some("CAP-1"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_key(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("CAP-2"));
        assert_eq!(bearer_key(&headers).as_deref(), Some("CAP-2"));
    }

    #[test]
    fn error_body_shape() {
        let err = rate_limited();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        let body = serde_json::to_value(ErrorBody {
            error: ErrorDetail {
                code: err.code.to_string(),
                message: err.message,
            },
        })
        .unwrap();
        assert_eq!(body["error"]["code"], "rate_limited");
    }

    #[test]
    fn check_response_omits_empty_fields() {
        let json = serde_json::to_value(CheckDatabaseResponse::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "found": false }));
    }
}
