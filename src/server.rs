//! HTTP and SSE surface over one agent session.
//!
//! REST endpoints for status, transcript, and input submission plus a
//! server-sent-events stream fed by the event bus. Bearer-token auth guards
//! everything except `/health`, `/internal/*`, and raw keystroke posts from
//! the on-box attach client.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::{self, Next},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing, Json, Router,
};
use serde_json::{json, Value};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};

use crate::bus::BusEvent;
use crate::session::{AgentSession, SHUTDOWN_GRACE};

/// Upper bound on a submitted message body.
const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("{0}")]
    Conflict(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
struct AppState {
    session: Arc<AgentSession>,
    auth_token: Option<String>,
}

pub fn router(session: Arc<AgentSession>, auth_token: Option<String>) -> Router {
    let state = AppState {
        session,
        auth_token: auth_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty()),
    };

    Router::new()
        .route("/health", routing::get(get_health))
        .route("/status", routing::get(get_status))
        .route("/messages", routing::get(get_messages))
        .route("/message", routing::post(post_message))
        .route("/events", routing::get(get_events))
        .route("/internal/screen", routing::get(get_internal_screen))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
}

/// Bind the listener, run the snapshot loop, and serve until interrupted.
/// On SIGINT the session is torn down first so SSE connections drain and the
/// graceful shutdown can complete.
pub async fn serve(session: Arc<AgentSession>, port: u16, auth_token: Option<String>) -> Result<()> {
    let app = router(Arc::clone(&session), auth_token);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    tracing::info!(target = "agent_console::server", port, "http surface listening");

    let snapshot_loop = tokio::spawn(Arc::clone(&session).run_snapshot_loop());

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let teardown = Arc::clone(&session);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(target = "agent_console::server", "shutdown signal received");
        teardown.shutdown(SHUTDOWN_GRACE).await;
        let _ = done_tx.send(());
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = done_rx.await;
        })
        .await
        .context("http server failed")?;

    let _ = snapshot_loop.await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Bearer-token check with the exemptions the attach client and health
/// probes rely on: `/health`, `/internal/*`, and `POST /message` bodies with
/// `"type":"raw"`. The raw check buffers the body and restores it for the
/// handler.
async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.auth_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let path = request.uri().path().to_string();
    if path == "/health" || path.starts_with("/internal/") {
        return Ok(next.run(request).await);
    }

    if path == "/message" && request.method() == Method::POST {
        let (parts, body) = request.into_parts();
        let bytes = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|_| ApiError::BadRequest("request body too large".into()))?;
        let is_raw = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .and_then(|value| {
                value
                    .get("type")
                    .and_then(Value::as_str)
                    .map(|kind| kind == "raw")
            })
            .unwrap_or(false);
        let request = Request::from_parts(parts, Body::from(bytes));
        if is_raw || bearer_matches(&request, expected) {
            return Ok(next.run(request).await);
        }
        return Err(ApiError::Unauthorized);
    }

    if bearer_matches(&request, expected) {
        Ok(next.run(request).await)
    } else {
        Err(ApiError::Unauthorized)
    }
}

fn bearer_matches(request: &Request<Body>, expected: &str) -> bool {
    request
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .is_some_and(|token| token == expected)
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

async fn get_health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn get_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": state.session.status() }))
}

async fn get_messages(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "messages": state.session.messages() }))
}

async fn get_internal_screen(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.session.screen_snapshot();
    Json(json!({
        "screen": snapshot.text,
        "cursor": [snapshot.cursor_row, snapshot.cursor_col],
    }))
}

async fn post_message(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let content = body
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("missing field: content".into()))?;
    if content.len() > MAX_BODY_BYTES {
        return Err(ApiError::BadRequest("content too large".into()));
    }
    let kind = body
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("user");

    match kind {
        "raw" => {
            state.session.write_raw(content).map_err(|error| {
                tracing::warn!(target = "agent_console::server", %error, "raw write failed");
                ApiError::Conflict("agent has terminated".into())
            })?;
        }
        "user" => {
            if content.is_empty() {
                return Err(ApiError::BadRequest("content must not be empty".into()));
            }
            state
                .session
                .submit_user(content)
                .map_err(|error| ApiError::Conflict(error.to_string()))?;
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown message type '{other}'"
            )));
        }
    }

    Ok(Json(json!({ "ok": true })))
}

/// Per-subscriber SSE stream. The bus guarantees the bootstrap (full
/// transcript, then current status) precedes any live event; dropping the
/// stream unsubscribes.
async fn get_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, rx) = state.session.subscribe();
    let guard = SubscriptionGuard {
        session: Arc::clone(&state.session),
        id,
    };

    let stream = ReceiverStream::new(rx).map(move |event| {
        let _keepalive = &guard;
        let data = match &event {
            BusEvent::MessageUpdate(message) => {
                serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string())
            }
            BusEvent::StatusChange(status) => json!({ "status": status }).to_string(),
        };
        Ok(Event::default().event(event.name()).data(data))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

struct SubscriptionGuard {
    session: Arc<AgentSession>,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.session.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::router;
    use crate::format::AgentType;
    use crate::session::{AgentSession, SessionConfig};
    use crate::tracker::TrackerParams;

    fn test_session() -> Arc<AgentSession> {
        let mut config = SessionConfig::new(AgentType::Custom, "bash");
        config.args = vec!["-c".into(), "printf '> '; read line; sleep 30".into()];
        config.rows = 24;
        config.cols = 80;
        config.tracker = TrackerParams {
            sampling_period: Duration::from_millis(10),
            stability_window: Duration::from_millis(60),
            startup_quiet: Duration::from_millis(100),
        };
        AgentSession::start(config).expect("mock agent should spawn")
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        serde_json::from_slice(&body).expect("response body should be json")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(Body::empty())
            .expect("request should build")
    }

    fn get_with_bearer(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request should build")
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build")
    }

    #[tokio::test]
    async fn health_is_public_when_auth_enabled() {
        let app = router(test_session(), Some("secret".into()));
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn internal_screen_is_public_when_auth_enabled() {
        let app = router(test_session(), Some("secret".into()));
        let response = app.oneshot(get("/internal/screen")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert!(body.get("screen").is_some());
        assert!(body.get("cursor").is_some());
    }

    #[tokio::test]
    async fn status_requires_bearer_token() {
        let app = router(test_session(), Some("secret".into()));
        let response = app.clone().oneshot(get("/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(get_with_bearer("/status", "secret"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_bearer_token_is_rejected() {
        let app = router(test_session(), Some("secret".into()));
        let response = app
            .oneshot(get_with_bearer("/messages", "wrong"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn no_token_configured_disables_auth() {
        let app = router(test_session(), None);
        let response = app.oneshot(get("/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert!(body.get("status").is_some());
    }

    #[tokio::test]
    async fn raw_message_is_exempt_from_auth() {
        let session = test_session();
        let app = router(Arc::clone(&session), Some("secret".into()));
        let response = app
            .oneshot(post_json(
                "/message",
                json!({ "content": "\u{001b}[A", "type": "raw" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn user_message_requires_auth() {
        let app = router(test_session(), Some("secret".into()));
        let response = app
            .oneshot(post_json(
                "/message",
                json!({ "content": "hello", "type": "user" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_content_is_bad_request() {
        let app = router(test_session(), None);
        let response = app
            .oneshot(post_json("/message", json!({ "type": "user" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_user_content_is_bad_request() {
        let app = router(test_session(), None);
        let response = app
            .oneshot(post_json(
                "/message",
                json!({ "content": "", "type": "user" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_message_type_is_bad_request() {
        let app = router(test_session(), None);
        let response = app
            .oneshot(post_json(
                "/message",
                json!({ "content": "x", "type": "shout" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn messages_returns_transcript_envelope() {
        let app = router(test_session(), None);
        let response = app.oneshot(get("/messages")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert!(body["messages"].is_array());
    }
}
