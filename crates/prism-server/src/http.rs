//! Client-facing HTTP API.
//!
//! All responses share the `{ success, data?, error?, timestamp }` envelope
//! with an epoch-millisecond timestamp. Engine results translate to status
//! codes: unknown entities are 404, missing auth is 401, everything the
//! engine answers is 200.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use prism_core::SessionId;

use crate::server::AppState;

/// Uniform response envelope.
#[derive(Clone, Debug, Serialize)]
pub struct ApiEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl ApiEnvelope {
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[must_use]
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Body of `POST /queue/join`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinRequest {
    pub client_id: Option<String>,
    pub priority: i32,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<ApiEnvelope> {
    let stats = state.engine.stats();
    let status = state.health.overall();
    Json(ApiEnvelope::ok(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "stats": stats,
    })))
}

/// GET /signallingserver — hand out the first eligible node.
pub async fn signalling_server(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiEnvelope>) {
    match state.engine.acquire_node() {
        Some(node) => {
            let protocol = if node.secure { "wss" } else { "ws" };
            (
                StatusCode::OK,
                Json(ApiEnvelope::ok(json!({
                    "signallingServer": node.endpoint(),
                    "protocol": protocol,
                    "serverId": node.id,
                }))),
            )
        }
        None => (
            StatusCode::OK,
            Json(ApiEnvelope::err("no stream nodes available")),
        ),
    }
}

/// POST /queue/join
pub async fn queue_join(
    State(state): State<AppState>,
    Json(body): Json<JoinRequest>,
) -> Json<ApiEnvelope> {
    let session = state.engine.enqueue(body.client_id.as_deref(), body.priority);
    // A node may already be free; position 0 means assigned immediately.
    let _ = state.engine.drain_queue();
    let queue_position = state
        .engine
        .queue_position(&session.id)
        .map_or(0, |p| p.position);
    Json(ApiEnvelope::ok(json!({
        "sessionId": session.id,
        "queuePosition": queue_position,
    })))
}

/// GET /queue/position/{session_id}
pub async fn queue_position(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<ApiEnvelope>) {
    let session_id = SessionId::from(session_id);
    match state.engine.queue_position(&session_id) {
        Some(position) => (
            StatusCode::OK,
            Json(ApiEnvelope::ok(
                serde_json::to_value(position).unwrap_or_default(),
            )),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiEnvelope::err("session not in queue")),
        ),
    }
}

/// GET /stats — bearer-token gated detailed snapshot.
pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiEnvelope>) {
    if !is_authorized(&headers, state.config.jwt_secret.as_deref()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiEnvelope::err("unauthorized")),
        );
    }
    let stats = state.engine.stats();
    let nodes = state.engine.node_snapshots();
    let health = state.health.report();
    (
        StatusCode::OK,
        Json(ApiEnvelope::ok(json!({
            "stats": stats,
            "nodes": nodes,
            "health": health,
            "wsConnections": state.broadcast.connection_count(),
            "uptimeSecs": state.start_time.elapsed().as_secs(),
        }))),
    )
}

/// GET /metrics — Prometheus text format.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

fn is_authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        // No secret configured: the gate stays closed.
        return false;
    };
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_shape() {
        let env = ApiEnvelope::ok(json!({"x": 1}));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["data"]["x"], 1);
        assert!(v.get("error").is_none());
        assert!(v["timestamp"].is_i64());
    }

    #[test]
    fn err_envelope_shape() {
        let env = ApiEnvelope::err("boom");
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "boom");
        assert!(v.get("data").is_none());
    }

    #[test]
    fn join_request_defaults() {
        let body: JoinRequest = serde_json::from_str("{}").unwrap();
        assert!(body.client_id.is_none());
        assert_eq!(body.priority, 0);
    }

    #[test]
    fn join_request_camel_case() {
        let body: JoinRequest =
            serde_json::from_str(r#"{"clientId":"alice","priority":5}"#).unwrap();
        assert_eq!(body.client_id.as_deref(), Some("alice"));
        assert_eq!(body.priority, 5);
    }

    #[test]
    fn auth_requires_configured_secret() {
        let headers = HeaderMap::new();
        assert!(!is_authorized(&headers, None));
    }

    #[test]
    fn auth_accepts_matching_bearer_token() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer sekrit".parse().unwrap(),
        );
        assert!(is_authorized(&headers, Some("sekrit")));
        assert!(!is_authorized(&headers, Some("other")));
    }

    #[test]
    fn auth_rejects_malformed_header() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(axum::http::header::AUTHORIZATION, "sekrit".parse().unwrap());
        assert!(!is_authorized(&headers, Some("sekrit")));
    }
}
