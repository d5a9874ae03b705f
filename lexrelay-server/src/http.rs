//! Lexrelay HTTP API
//!
//! Axum-based HTTP server that fronts the chat backend for the browser.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions are directly testable without axum dispatch
//! machinery.
//!
//! Endpoints:
//! - GET  /health                              — upstream reachability check
//! - GET  /version                             — server version info
//! - POST /api/chat-messages                   — streaming chat relay
//! - POST /api/dify/chat-stream                — same relay, legacy path
//! - POST /api/chat-messages/:task_id/stop     — stop an in-flight answer

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use lexrelay_core::{ChatBackend, ChatRequest, DifyClient, RelayConfig, RelayError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use crate::relay;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub backend: Arc<dyn ChatBackend>,
    pub config: RelayConfig,
}

impl HttpState {
    /// Load config from `path` (plus environment overrides) and build state.
    pub fn load(path: &str) -> Result<Self, RelayError> {
        Self::from_config(RelayConfig::load(path)?)
    }

    /// Build state with a Dify client for the configured upstream.
    pub fn from_config(config: RelayConfig) -> Result<Self, RelayError> {
        let backend = DifyClient::new(&config.upstream)?;
        Ok(Self {
            backend: Arc::new(backend),
            config,
        })
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/chat-messages", post(chat_handler))
        .route("/api/dify/chat-stream", post(chat_handler))
        .route("/api/chat-messages/:task_id/stop", post(stop_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let upstream = state.backend.endpoint().to_string();

    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(upstream = %upstream, "Lexrelay listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

/// Chat turn posted by the browser. `query` and `message` are accepted
/// interchangeably; `query` wins when both are present.
#[derive(Debug, Deserialize, Default)]
pub struct ChatMessageRequest {
    pub query: Option<String>,
    pub message: Option<String>,
    pub conversation_id: Option<String>,
    pub user: Option<String>,
    #[serde(default)]
    pub inputs: serde_json::Value,
}

#[derive(Debug, Deserialize, Default)]
pub struct StopRequest {
    pub user: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }

    fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "lexrelay/1",
    })
}

/// Inner health check. Probes the upstream and returns (status_code, json_body).
pub async fn health_inner(backend: &dyn ChatBackend) -> (StatusCode, serde_json::Value) {
    match backend.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "upstream": backend.endpoint(),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
                "upstream": backend.endpoint(),
            }),
        ),
    }
}

/// Inner chat validation. Turns the browser payload into an upstream request.
pub fn chat_request_inner(
    req: ChatMessageRequest,
    default_user: &str,
) -> std::result::Result<ChatRequest, (StatusCode, serde_json::Value)> {
    let query = [req.query, req.message]
        .into_iter()
        .flatten()
        .find(|q| !q.trim().is_empty());

    let Some(query) = query else {
        return Err((
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("query field is required").to_value(),
        ));
    };

    let user = req
        .user
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| default_user.to_string());

    Ok(ChatRequest::streaming(query, user)
        .with_conversation(req.conversation_id)
        .with_inputs(req.inputs))
}

/// Inner stop. Forwards the stop request and reports the upstream verdict.
pub async fn stop_inner(
    backend: &dyn ChatBackend,
    task_id: &str,
    req: StopRequest,
    default_user: &str,
) -> (StatusCode, serde_json::Value) {
    let user = req.user.unwrap_or_else(|| default_user.to_string());

    match backend.stop_generation(task_id, &user).await {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::warn!(task_id = task_id, error = %e, "Stop request failed");
            (StatusCode::BAD_GATEWAY, ErrorResponse::new(e.to_string()).to_value())
        }
    }
}

/// Wrap a relay receiver as a `text/event-stream` response.
pub fn sse_response(rx: mpsc::UnboundedReceiver<Bytes>) -> Response {
    let frames = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<Bytes, Infallible>(frame), rx))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(frames))
        .unwrap_or_else(|e| {
            tracing::error!("Failed to build SSE response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.backend.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ChatMessageRequest>,
) -> Response {
    match chat_request_inner(req, &state.config.upstream.default_user) {
        Ok(request) => sse_response(relay::spawn_relay(state.backend.clone(), request)),
        Err((status, body)) => (status, Json(body)).into_response(),
    }
}

pub async fn stop_handler(
    State(state): State<Arc<HttpState>>,
    Path(task_id): Path<String>,
    body: Option<Json<StopRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = stop_inner(
        state.backend.as_ref(),
        &task_id,
        req,
        &state.config.upstream.default_user,
    )
    .await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lexrelay_core::{ByteStream, UpstreamError};

    struct StubBackend {
        healthy: bool,
    }

    #[async_trait]
    impl ChatBackend for StubBackend {
        async fn stream_chat(&self, _request: &ChatRequest) -> Result<ByteStream, UpstreamError> {
            Err(UpstreamError::MissingApiKey)
        }

        async fn stop_generation(
            &self,
            task_id: &str,
            user: &str,
        ) -> Result<serde_json::Value, UpstreamError> {
            if task_id == "unknown" {
                return Err(UpstreamError::Api {
                    code: 404,
                    message: "Task not found".to_string(),
                });
            }
            Ok(serde_json::json!({ "result": "success", "user": user }))
        }

        async fn health_check(&self) -> Result<(), UpstreamError> {
            if self.healthy {
                Ok(())
            } else {
                Err(UpstreamError::Api {
                    code: 401,
                    message: "Access token is invalid".to_string(),
                })
            }
        }

        fn endpoint(&self) -> &str {
            "http://stub/v1"
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "lexrelay/1");
    }

    #[test]
    fn test_chat_request_prefers_query() {
        let req = ChatMessageRequest {
            query: Some("Is a verbal contract binding?".to_string()),
            message: Some("ignored".to_string()),
            ..Default::default()
        };
        let request = chat_request_inner(req, "desk").unwrap();
        assert_eq!(request.query, "Is a verbal contract binding?");
        assert_eq!(request.user, "desk");
        assert_eq!(request.response_mode, "streaming");
        assert!(request.auto_generate_name);
    }

    #[test]
    fn test_chat_request_falls_back_to_message() {
        let req = ChatMessageRequest {
            query: Some("   ".to_string()),
            message: Some("How is severance computed?".to_string()),
            conversation_id: Some("conv-9".to_string()),
            user: Some("u-1".to_string()),
            inputs: serde_json::json!({ "region": "sh" }),
        };
        let request = chat_request_inner(req, "desk").unwrap();
        assert_eq!(request.query, "How is severance computed?");
        assert_eq!(request.conversation_id.as_deref(), Some("conv-9"));
        assert_eq!(request.user, "u-1");
        assert_eq!(request.inputs["region"], "sh");
    }

    #[test]
    fn test_chat_request_missing_query_is_bad_request() {
        let (status, body) = chat_request_inner(ChatMessageRequest::default(), "desk").unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "query field is required");
    }

    #[test]
    fn test_chat_request_empty_conversation_starts_new() {
        let req = ChatMessageRequest {
            query: Some("q".to_string()),
            conversation_id: Some(String::new()),
            ..Default::default()
        };
        let request = chat_request_inner(req, "desk").unwrap();
        assert!(request.conversation_id.is_none());
        assert_eq!(request.inputs, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_health_inner_healthy() {
        let (status, body) = health_inner(&StubBackend { healthy: true }).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["upstream"], "http://stub/v1");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_health_inner_unhealthy() {
        let (status, body) = health_inner(&StubBackend { healthy: false }).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert!(body["error"].as_str().unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_stop_inner_uses_default_user() {
        let backend = StubBackend { healthy: true };
        let (status, body) = stop_inner(&backend, "task-1", StopRequest::default(), "desk").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "success");
        assert_eq!(body["user"], "desk");
    }

    #[tokio::test]
    async fn test_stop_inner_upstream_failure_is_bad_gateway() {
        let backend = StubBackend { healthy: true };
        let req = StopRequest {
            user: Some("u-1".to_string()),
        };
        let (status, body) = stop_inner(&backend, "unknown", req, "desk").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_sse_response_headers_and_body() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Bytes::from_static(b"data: [DONE]\n\n")).unwrap();
        drop(tx);

        let resp = sse_response(rx);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(resp.headers()[header::CONNECTION], "keep-alive");

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"data: [DONE]\n\n");
    }
}
