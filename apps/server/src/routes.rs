//! HTTP surface: session submission (streamed), listing, lookup and delete.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Extensions, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use pagebrief_core::{SessionPipeline, SubmitError};
use pagebrief_shared::{PageBriefError, SessionId};
use pagebrief_storage::SessionStore;

const SESSION_ID_HEADER: &str = "x-session-id";

/// Shared handler state.
pub(crate) struct AppState {
    pub pipeline: SessionPipeline,
    /// Use the first `X-Forwarded-For` entry as the client origin.
    pub trust_forwarded_for: bool,
}

/// Build the application router. Session routes are served both at the
/// root and under `/api`.
pub(crate) fn router(state: Arc<AppState>) -> Router {
    let sessions = Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(sessions.clone())
        .nest("/api", sessions)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)]),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // method + path only; no query string, no client address
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn session_not_found() -> Response {
    error_json(StatusCode::NOT_FOUND, "Session not found")
}

/// Map a pipeline rejection onto its status code and JSON body.
fn submit_error_response(err: SubmitError) -> Response {
    let status = match &err {
        SubmitError::InvalidUrl(_) | SubmitError::PrivateHost => StatusCode::BAD_REQUEST,
        SubmitError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        SubmitError::Duplicate => StatusCode::CONFLICT,
        SubmitError::Extraction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SubmitError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    match &err {
        SubmitError::Extraction { session_id, .. } => (
            status,
            Json(serde_json::json!({ "id": session_id, "error": err.to_string() })),
        )
            .into_response(),
        _ => error_json(status, err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// POST /sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitRequest {
    #[serde(default)]
    url: Option<serde_json::Value>,
}

/// Client origin for rate limiting: first forwarded-for entry, then the peer
/// address, then `"unknown"`.
fn client_origin(headers: &HeaderMap, extensions: &Extensions, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(first) = forwarded {
            return first.to_string();
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    extensions: Extensions,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            debug!(error = %rejection, "rejected request body");
            return error_json(StatusCode::BAD_REQUEST, "Invalid request body");
        }
    };
    let Some(serde_json::Value::String(url)) = request.url else {
        return error_json(StatusCode::BAD_REQUEST, "A valid URL is required");
    };

    let origin = client_origin(&headers, &extensions, state.trust_forwarded_for);
    let submission = match state.pipeline.submit(&url, &origin).await {
        Ok(submission) => submission,
        Err(e) => return submit_error_response(e),
    };

    let session_id = submission.session_id.to_string();
    // Dropping the handle detaches finalization from this request.
    drop(submission.finalization);

    let mut chunks = submission.chunks;
    let body = async_stream::stream! {
        while let Some(chunk) = chunks.recv().await {
            yield Ok::<_, Infallible>(chunk);
        }
    };

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        headers.insert(SESSION_ID_HEADER, value);
    }
    response
}

// ---------------------------------------------------------------------------
// GET /sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct ListParams {
    q: Option<String>,
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let filter = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    match state.pipeline.store().list(filter).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => {
            error!(error = %e, "failed to list sessions");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve sessions")
        }
    }
}

// ---------------------------------------------------------------------------
// GET / DELETE /sessions/{id}
// ---------------------------------------------------------------------------

async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<SessionId>() else {
        return session_not_found();
    };
    match state.pipeline.store().get(id).await {
        Ok(session) => Json(session).into_response(),
        Err(PageBriefError::NotFound { .. }) => session_not_found(),
        Err(e) => {
            error!(session_id = %id, error = %e, "failed to get session");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve session")
        }
    }
}

async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<SessionId>() else {
        return session_not_found();
    };
    match state.pipeline.store().delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(PageBriefError::NotFound { .. }) => session_not_found(),
        Err(e) => {
            error!(session_id = %id, error = %e, "failed to delete session");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete session")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::Request;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use pagebrief_core::{RateLimiter, SsrfGuard};
    use pagebrief_extractor::Extractor;
    use pagebrief_generator::{ScriptedModel, SummaryGenerator};
    use pagebrief_shared::{
        ExtractorConfig, GuardConfig, RateLimitConfig, Result, Session, SessionPatch,
        SessionStatus,
    };
    use pagebrief_storage::{SessionStore, Storage};

    use super::*;

    struct TestApp {
        router: Router,
        store: Arc<dyn SessionStore>,
    }

    async fn test_storage() -> Storage {
        let path = std::env::temp_dir().join(format!("pb_http_test_{}.db", uuid::Uuid::now_v7()));
        Storage::open(&path).await.unwrap()
    }

    async fn test_app(allow_private: bool, max_requests: u32) -> TestApp {
        test_app_with_store(Arc::new(test_storage().await), allow_private, max_requests)
    }

    fn test_app_with_store(
        store: Arc<dyn SessionStore>,
        allow_private: bool,
        max_requests: u32,
    ) -> TestApp {
        let model = ScriptedModel::new(["## Overview\n", "A short ", "summary."]);
        let pipeline = SessionPipeline::new(
            store.clone(),
            Arc::new(Extractor::new(ExtractorConfig::default()).unwrap()),
            SummaryGenerator::new(Arc::new(model), Duration::from_secs(5)),
            SsrfGuard::new(&GuardConfig {
                allow_private_hosts: allow_private,
            }),
            Arc::new(RateLimiter::new(&RateLimitConfig {
                max_requests,
                window_secs: 60,
            })),
        );
        let state = Arc::new(AppState {
            pipeline,
            trust_forwarded_for: true,
        });
        TestApp {
            router: router(state),
            store,
        }
    }

    /// Storage whose move to `streaming` always fails.
    struct StreamingWriteFails(Storage);

    #[async_trait::async_trait]
    impl SessionStore for StreamingWriteFails {
        async fn create(&self, url: &str) -> Result<Session> {
            self.0.create(url).await
        }

        async fn update(&self, id: SessionId, patch: SessionPatch) -> Result<()> {
            if patch.status == Some(SessionStatus::Streaming) {
                return Err(PageBriefError::storage("database is locked"));
            }
            self.0.update(id, patch).await
        }

        async fn get(&self, id: SessionId) -> Result<Session> {
            self.0.get(id).await
        }

        async fn list(&self, filter: Option<&str>) -> Result<Vec<Session>> {
            self.0.list(filter).await
        }

        async fn delete(&self, id: SessionId) -> Result<()> {
            self.0.delete(id).await
        }

        async fn latest_for_url(&self, url: &str) -> Result<Option<Session>> {
            self.0.latest_for_url(url).await
        }
    }

    async fn page_server() -> MockServer {
        let server = MockServer::start().await;
        let html = format!(
            "<html><head><title>Example Domain</title></head><body><p>{}</p></body></html>",
            "Example text for an illustrative page. ".repeat(8)
        );
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
            .mount(&server)
            .await;
        server
    }

    fn post_json(uri: &str, body: &str, forwarded_for: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn submit(url: &str) -> Request<Body> {
        post_json(
            "/sessions",
            &serde_json::json!({ "url": url }).to_string(),
            "203.0.113.7",
        )
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn delete_req(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &TestApp, req: Request<Body>) -> Response {
        app.router.clone().oneshot(req).await.unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        serde_json::from_str(&body_text(resp).await).unwrap()
    }

    /// Poll until the session leaves `streaming`.
    async fn wait_terminal(app: &TestApp, id: &str) -> Session {
        for _ in 0..100 {
            let resp = send(app, get_req(&format!("/sessions/{id}"))).await;
            let session: Session = serde_json::from_value(body_json(resp).await).unwrap();
            if session.status.is_terminal() {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = test_app(true, 10).await;
        let resp = send(&app, get_req("/health")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "ok");
    }

    #[tokio::test]
    async fn submit_streams_summary_and_persists_it() {
        let server = page_server().await;
        let app = test_app(true, 10).await;

        let resp = send(&app, submit(&server.uri())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
        let id = resp.headers()[SESSION_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();

        assert_eq!(body_text(resp).await, "## Overview\nA short summary.");

        let session = wait_terminal(&app, &id).await;
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.title.as_deref(), Some("Example Domain"));
        assert_eq!(session.summary.as_deref(), Some("## Overview\nA short summary."));
        assert!(session.created_at <= session.updated_at);
    }

    #[tokio::test]
    async fn api_prefix_serves_the_same_routes() {
        let server = page_server().await;
        let app = test_app(true, 10).await;

        let resp = send(
            &app,
            post_json(
                "/api/sessions",
                &serde_json::json!({ "url": server.uri() }).to_string(),
                "203.0.113.7",
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let id = resp.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();
        body_text(resp).await;

        let resp = send(&app, get_req(&format!("/api/sessions/{id}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn private_host_is_400_without_record() {
        let app = test_app(false, 10).await;

        let resp = send(&app, submit("http://127.0.0.1/admin")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(resp).await["error"],
            "URLs pointing to private or internal networks are not allowed"
        );

        let resp = send(&app, get_req("/sessions")).await;
        assert_eq!(body_json(resp).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn bad_bodies_are_400() {
        let app = test_app(true, 10).await;

        for body in ["{}", r#"{"url": 42}"#, r#"{"url": ""}"#] {
            let resp = send(&app, post_json("/sessions", body, "203.0.113.7")).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(body_json(resp).await["error"], "A valid URL is required");
        }

        let resp = send(&app, post_json("/sessions", "{not json", "203.0.113.7")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&app, submit("notaurl")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "Invalid URL format");

        assert!(app.store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_completed_url_is_409() {
        let server = page_server().await;
        let app = test_app(true, 10).await;

        let resp = send(&app, submit(&server.uri())).await;
        let id = resp.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();
        body_text(resp).await;
        wait_terminal(&app, &id).await;

        let resp = send(&app, submit(&server.uri())).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(resp).await["error"],
            "This URL has already been summarized. You can find it in your session list."
        );
        assert_eq!(app.store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn extraction_failure_is_422_with_id() {
        let server = page_server().await;
        let app = test_app(true, 10).await;

        let resp = send(&app, submit(&format!("{}/missing", server.uri()))).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(resp).await;
        assert_eq!(body["error"], "Failed to fetch page: HTTP 404: Not Found");

        let id = body["id"].as_str().unwrap();
        let session = wait_terminal(&app, id).await;
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error.as_deref(), Some("HTTP 404: Not Found"));
    }

    #[tokio::test]
    async fn unexpected_failure_is_500_and_marks_session() {
        let server = page_server().await;
        let app = test_app_with_store(
            Arc::new(StreamingWriteFails(test_storage().await)),
            true,
            10,
        );

        let resp = send(&app, submit(&server.uri())).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(resp).await,
            serde_json::json!({ "error": "Failed to create summary" })
        );

        let sessions = app.store.list(None).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Error);
        let message = sessions[0].error.as_deref().unwrap_or_default();
        assert!(message.starts_with("Unexpected error:"), "{message}");
    }

    #[tokio::test]
    async fn rate_limit_is_per_forwarded_origin() {
        let server = page_server().await;
        let app = test_app(true, 1).await;
        let missing = serde_json::json!({ "url": format!("{}/missing", server.uri()) }).to_string();

        let first = send(&app, post_json("/sessions", &missing, "198.51.100.1")).await;
        assert_eq!(first.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let second = send(&app, post_json("/sessions", &missing, "198.51.100.1, 10.0.0.1")).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body_json(second).await["error"],
            "Too many requests. Please try again later."
        );

        let other = send(&app, post_json("/sessions", &missing, "198.51.100.2")).await;
        assert_eq!(other.status(), StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(app.store.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_filters_case_insensitively() {
        let app = test_app(true, 10).await;
        app.store.create("https://rust-lang.org/").await.unwrap();
        app.store.create("https://example.com/").await.unwrap();

        let resp = send(&app, get_req("/sessions?q=RUST")).await;
        let body = body_json(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["url"], "https://rust-lang.org/");
        assert_eq!(body[0]["status"], "pending");
        assert!(body[0].get("createdAt").is_some());

        let resp = send(&app, get_req("/sessions?q=")).await;
        let all = body_json(resp).await;
        assert_eq!(all.as_array().unwrap().len(), 2);
        assert_eq!(all[0]["url"], "https://example.com/");
    }

    #[tokio::test]
    async fn get_is_idempotent_and_unknown_ids_are_404() {
        let app = test_app(true, 10).await;
        let session = app.store.create("https://example.com/").await.unwrap();
        let uri = format!("/sessions/{}", session.id);

        let first = body_text(send(&app, get_req(&uri)).await).await;
        let second = body_text(send(&app, get_req(&uri)).await).await;
        assert_eq!(first, second);

        let resp = send(&app, get_req(&format!("/sessions/{}", SessionId::new()))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"], "Session not found");

        let resp = send(&app, get_req("/sessions/not-an-id")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_removes_permanently() {
        let app = test_app(true, 10).await;
        let session = app.store.create("https://example.com/").await.unwrap();
        let uri = format!("/sessions/{}", session.id);

        let resp = send(&app, delete_req(&uri)).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        assert_eq!(send(&app, get_req(&uri)).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(send(&app, delete_req(&uri)).await.status(), StatusCode::NOT_FOUND);

        let resp = send(&app, get_req("/sessions")).await;
        assert_eq!(body_json(resp).await, serde_json::json!([]));
    }

    #[test]
    fn origin_falls_back_to_peer_then_unknown() {
        let mut headers = HeaderMap::new();
        let mut extensions = Extensions::new();
        assert_eq!(client_origin(&headers, &extensions, true), "unknown");

        extensions.insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 10], 5555))));
        assert_eq!(client_origin(&headers, &extensions, true), "192.0.2.10");

        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"));
        assert_eq!(client_origin(&headers, &extensions, true), "203.0.113.9");
        assert_eq!(client_origin(&headers, &extensions, false), "192.0.2.10");
    }
}
