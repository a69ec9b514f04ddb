//! Chatbridge HTTP surface
//!
//! Axum server receiving platform webhooks. Each endpoint has a thin axum
//! handler that delegates to an inner function, so the logic is testable
//! without going through the router.
//!
//! Endpoints:
//! - POST {webhook_path}                   signed platform webhook (default `/linebot`)
//! - GET  /health                          session store health
//! - GET  /version                         server version info
//! - GET  /sessions/:user_id               current session (admin)
//! - POST /sessions/:user_id/expire        expire a session (admin)
//! - GET  /sessions/:user_id/history       stored sessions, oldest first (admin)

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chatbridge_core::config::HttpConfig;
use chatbridge_core::{BridgeError, SessionStore};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::line::{parse_webhook, InboundEvent, MessagingError, SIGNATURE_HEADER};
use crate::subsystems::pipeline::Bridge;

const DEFAULT_HISTORY_COUNT: u32 = 10;
const MAX_HISTORY_COUNT: u32 = 100;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub bridge: Arc<Bridge>,
    pub http: HttpConfig,
}

/// Build the Axum router. Session endpoints are mounted only when `admin_enabled`.
pub fn build_router(state: Arc<HttpState>) -> Router {
    let mut router = Router::new()
        .route(&state.http.webhook_path, post(webhook_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler));

    if state.http.admin_enabled {
        router = router
            .route("/sessions/:user_id", get(session_handler))
            .route("/sessions/:user_id/expire", post(expire_handler))
            .route("/sessions/:user_id/history", get(history_handler));
    }

    router.with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    bridge: Arc<Bridge>,
    http: HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", http.host, http.port);
    let webhook_path = http.webhook_path.clone();
    let state = Arc::new(HttpState { bridge, http });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Chatbridge listening on http://{}{}", addr, webhook_path);

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

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub count: Option<u32>,
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
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner webhook acceptance: verify the signature and decode the events.
/// Processing happens afterwards, detached from the request.
pub fn accept_webhook(
    channel_secret: &str,
    signature: Option<&str>,
    body: &[u8],
) -> std::result::Result<Vec<InboundEvent>, (StatusCode, &'static str)> {
    let Some(signature) = signature else {
        tracing::warn!("Webhook without signature header");
        return Err((StatusCode::UNAUTHORIZED, "missing signature"));
    };

    match parse_webhook(channel_secret, body, signature) {
        Ok(events) => Ok(events),
        Err(MessagingError::InvalidSignature) => {
            tracing::warn!("Webhook signature mismatch");
            Err((StatusCode::UNAUTHORIZED, "invalid signature"))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Undecodable webhook body");
            Err((StatusCode::BAD_REQUEST, "invalid payload"))
        }
    }
}

/// Inner health check: queries the session store and returns (status_code, json_body).
pub async fn health_inner(sessions: &SessionStore) -> (StatusCode, serde_json::Value) {
    match sessions.health().await {
        Ok(version) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "sqlite": version,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "chatbridge",
    })
}

pub async fn session_inner(sessions: &SessionStore, user_id: &str) -> (StatusCode, serde_json::Value) {
    match sessions.get(user_id).await {
        Ok(session) => (StatusCode::OK, serde_json::json!(session)),
        Err(e) => error_body(e),
    }
}

pub async fn expire_inner(sessions: &SessionStore, user_id: &str) -> (StatusCode, serde_json::Value) {
    match sessions.expire(user_id).await {
        Ok(()) => (
            StatusCode::OK,
            serde_json::json!({ "status": "expired", "user_id": user_id }),
        ),
        Err(e) => error_body(e),
    }
}

pub async fn history_inner(
    sessions: &SessionStore,
    user_id: &str,
    query: HistoryQuery,
) -> (StatusCode, serde_json::Value) {
    let count = query
        .count
        .unwrap_or(DEFAULT_HISTORY_COUNT)
        .clamp(1, MAX_HISTORY_COUNT);
    match sessions.list_recent(user_id, count).await {
        Ok(history) => (
            StatusCode::OK,
            serde_json::json!({ "user_id": user_id, "count": history.len(), "sessions": history }),
        ),
        Err(e) => error_body(e),
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn webhook_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match accept_webhook(state.bridge.channel_secret(), signature, &body) {
        Ok(events) => {
            let bridge = Arc::clone(&state.bridge);
            tokio::spawn(async move {
                bridge.process_events(events).await;
            });
            (StatusCode::OK, "ok")
        }
        Err(rejection) => rejection,
    }
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.bridge.sessions()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn session_handler(
    State(state): State<Arc<HttpState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = session_inner(state.bridge.sessions(), &user_id).await;
    (status, Json(body))
}

pub async fn expire_handler(
    State(state): State<Arc<HttpState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = expire_inner(state.bridge.sessions(), &user_id).await;
    (status, Json(body))
}

pub async fn history_handler(
    State(state): State<Arc<HttpState>>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let (status, body) = history_inner(state.bridge.sessions(), &user_id, query).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

fn error_body(e: BridgeError) -> (StatusCode, serde_json::Value) {
    let status = match e {
        BridgeError::Argument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, serde_json::json!(ErrorResponse::new(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::sign;
    use chatbridge_core::sessions::ManualClock;
    use chatbridge_core::{ConversationSession, MemorySessionRepository};
    use chrono::{TimeZone, Utc};

    fn store() -> SessionStore {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
        SessionStore::new(Arc::new(MemorySessionRepository::new()), 0.0).with_clock(clock)
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string());
        assert_eq!(v["service"], "chatbridge");
    }

    #[test]
    fn test_accept_webhook_rejections() {
        let body = br#"{"events":[]}"#;
        let sig = sign("secret", body).unwrap();

        assert_eq!(accept_webhook("secret", Some(&sig), body).unwrap().len(), 0);
        assert_eq!(
            accept_webhook("secret", None, body).unwrap_err().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            accept_webhook("secret", Some("AAAA"), body).unwrap_err().0,
            StatusCode::UNAUTHORIZED
        );

        let garbage = b"{{{";
        let sig = sign("secret", garbage).unwrap();
        assert_eq!(
            accept_webhook("secret", Some(&sig), garbage).unwrap_err().0,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_session_inner_unknown_user_is_default() {
        let (status, body) = session_inner(&store(), "U404").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], "U404");
        assert!(body["conversation_id"].is_null());
        assert_eq!(body["agent_key"], "default");
    }

    #[tokio::test]
    async fn test_expire_then_session_is_fresh() {
        let sessions = store();
        let mut session = ConversationSession::new("U1");
        session.conversation_id = Some("c1".to_string());
        sessions.set(&mut session).await.unwrap();

        let (status, body) = expire_inner(&sessions, "U1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "expired");

        let (_, body) = session_inner(&sessions, "U1").await;
        assert!(body["conversation_id"].is_null());
    }

    #[tokio::test]
    async fn test_history_inner_clamps_count() {
        let sessions = store();
        sessions.set(&mut ConversationSession::new("U1")).await.unwrap();

        let (status, body) = history_inner(&sessions, "U1", HistoryQuery { count: Some(0) }).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn test_empty_user_id_is_bad_request() {
        let (status, body) = expire_inner(&store(), "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }
}
