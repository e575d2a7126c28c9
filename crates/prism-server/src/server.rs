//! `MatchmakerServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, instrument};

use prism_engine::{HealthSupervisor, Matchmaker};

use crate::config::Config;
use crate::http;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::BroadcastManager;
use crate::websocket::handler::frame;
use crate::websocket::session::run_ws_session;

/// WebSocket connections beyond this are refused with 503.
const MAX_WS_CONNECTIONS: usize = 512;

/// Generates UUIDv7 request IDs.
#[derive(Clone)]
struct UuidV7RequestId;

impl MakeRequestId for UuidV7RequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        axum::http::HeaderValue::from_str(&id)
            .ok()
            .map(RequestId::new)
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Matchmaker>,
    pub health: Arc<HealthSupervisor>,
    pub broadcast: Arc<BroadcastManager>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub config: Arc<Config>,
    pub metrics_handle: Arc<PrometheusHandle>,
    pub start_time: Instant,
}

/// The client-facing matchmaker server.
pub struct MatchmakerServer {
    config: Arc<Config>,
    engine: Arc<Matchmaker>,
    health: Arc<HealthSupervisor>,
    broadcast: Arc<BroadcastManager>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics_handle: Arc<PrometheusHandle>,
    start_time: Instant,
}

impl MatchmakerServer {
    pub fn new(
        config: Config,
        engine: Arc<Matchmaker>,
        health: Arc<HealthSupervisor>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            health,
            broadcast: Arc::new(BroadcastManager::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics_handle: Arc::new(metrics_handle),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes and middleware.
    pub fn router(&self) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
            health: self.health.clone(),
            broadcast: self.broadcast.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            metrics_handle: self.metrics_handle.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(http::health))
            .route("/signallingserver", get(http::signalling_server))
            .route("/queue/join", post(http::queue_join))
            .route("/queue/position/{session_id}", get(http::queue_position))
            .route("/stats", get(http::stats))
            .route("/metrics", get(http::metrics))
            .route("/ws", get(ws_upgrade_handler))
            .with_state(state)
            // Outermost layers execute first on request, last on response.
            .layer(CatchPanicLayer::new())
            .layer(CompressionLayer::new())
            .layer(RequestBodyLimitLayer::new(64 * 1024))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(30),
            ))
            .layer(SetRequestIdLayer::x_request_id(UuidV7RequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
    }

    /// Bind and start serving. Returns the bound address and a join handle
    /// for the server task.
    #[instrument(skip_all, fields(host = %host, port = self.config.http_port))]
    pub async fn listen(
        &self,
        host: &str,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{host}:{}", self.config.http_port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "http server started");

        let router = self.router();
        let shutdown_token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("http server shutdown initiated");
                })
                .await;
            info!("http server shutdown complete");
        });

        Ok((bound_addr, handle))
    }

    /// Push a final `serverShutdown` frame to every WebSocket client.
    pub async fn announce_shutdown(&self) {
        let notice = frame("serverShutdown", json!({ "message": "server shutting down" }));
        self.broadcast.broadcast_all(&notice).await;
    }

    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<Matchmaker> {
        &self.engine
    }
}

/// GET /ws — WebSocket upgrade handler.
async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    if state.shutdown.is_shutting_down() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let current = state.broadcast.connection_count();
    if current >= MAX_WS_CONNECTIONS {
        tracing::warn!(
            current,
            max = MAX_WS_CONNECTIONS,
            "connection limit reached, rejecting WebSocket upgrade"
        );
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let client_id = uuid::Uuid::now_v7().to_string();
    let engine = state.engine;
    let broadcast = state.broadcast;
    let shutdown_token = state.shutdown.token();

    Ok(ws.on_upgrade(move |socket| {
        run_ws_session(socket, client_id, engine, broadcast, shutdown_token)
    }))
}
