//! WebSocket connection lifecycle — handles a single client from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use prism_engine::Matchmaker;
use serde_json::json;

use super::broadcast::BroadcastManager;
use super::connection::ClientConnection;
use super::handler::{frame, handle_frame};
use super::heartbeat::{run_heartbeat, HeartbeatResult};

/// How often the liveness probe checks the idle clock.
const HEARTBEAT_PROBE: Duration = Duration::from_secs(30);
/// Silence budget before a client is considered gone.
const HEARTBEAT_GRACE: Duration = Duration::from_secs(90);

/// Run a WebSocket session for a connected client.
///
/// 1. Sends a `connected` frame with the connection ID
/// 2. Dispatches incoming frames to the engine
/// 3. Forwards outbound pushes via the send channel
/// 4. Times out silent clients; cleans up on disconnect
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    client_id: String,
    engine: Arc<Matchmaker>,
    broadcast: Arc<BroadcastManager>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(256);
    let connection = Arc::new(ClientConnection::new(client_id.clone(), send_tx));

    counter!("ws_connections_total").increment(1);
    info!("client connected");
    broadcast.add(connection.clone()).await;

    let greeting = frame("connected", json!({ "clientId": client_id }));
    if let Ok(json) = serde_json::to_string(&greeting) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    // Outbound forwarder (send_rx → WebSocket).
    let outbound = tokio::spawn(async move {
        while let Some(msg) = send_rx.recv().await {
            if ws_tx.send(Message::Text((*msg).clone().into())).await.is_err() {
                break;
            }
        }
    });

    // Connection-scoped cancellation: fires on server shutdown or heartbeat
    // timeout.
    let conn_cancel = shutdown.child_token();
    let heartbeat = {
        let connection = connection.clone();
        let conn_cancel = conn_cancel.clone();
        tokio::spawn(async move {
            let result = run_heartbeat(
                connection,
                HEARTBEAT_PROBE,
                HEARTBEAT_GRACE,
                conn_cancel.clone(),
            )
            .await;
            if result == HeartbeatResult::TimedOut {
                conn_cancel.cancel();
            }
        })
    };

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else {
                    debug!("client stream ended");
                    break;
                };
                let text = match msg {
                    Message::Text(ref t) => Some(t.to_string()),
                    Message::Binary(ref data) => match std::str::from_utf8(data) {
                        Ok(s) => Some(s.to_owned()),
                        Err(_) => {
                            info!(len = data.len(), "received non-UTF8 binary frame");
                            None
                        }
                    },
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        connection.touch();
                        None
                    }
                };

                let Some(text) = text else { continue };
                connection.touch();

                let response = handle_frame(&text, &connection, &engine);
                if !connection.send_json(&response) {
                    info!("failed to enqueue response (channel full or closed)");
                }
            }
            () = conn_cancel.cancelled() => {
                info!("connection cancelled (shutdown or heartbeat timeout)");
                break;
            }
        }
    }

    counter!("ws_disconnections_total").increment(1);
    info!("client disconnected");
    conn_cancel.cancel();
    outbound.abort();
    heartbeat.abort();
    broadcast.remove(&client_id).await;
}
