//! Event bridge — forwards engine [`MatchEvent`]s to WebSocket clients.
//!
//! The engine's bus delivers events synchronously with each mutation; the
//! subscriber installed by [`bus_channel`] only copies them into a tokio
//! broadcast channel, and this bridge does the actual fan-out on its own
//! task (bus subscribers must never block or re-enter the engine).

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prism_core::{EventBus, MatchEvent, RemovalReason};
use prism_engine::Matchmaker;

use super::broadcast::BroadcastManager;
use super::handler::frame;

/// Subscribe a forwarding subscriber on the bus and return the channel end
/// the bridge consumes.
pub fn bus_channel(bus: &EventBus, capacity: usize) -> broadcast::Sender<MatchEvent> {
    let (tx, _) = broadcast::channel(capacity);
    let forward = tx.clone();
    bus.subscribe(move |event| {
        // Send fails only when no receiver is alive, which is fine.
        let _ = forward.send(event.clone());
    });
    tx
}

/// Bridges engine events to connected WebSocket clients.
pub struct EventBridge {
    rx: broadcast::Receiver<MatchEvent>,
    broadcast: Arc<BroadcastManager>,
    engine: Arc<Matchmaker>,
    cancel: CancellationToken,
}

impl EventBridge {
    pub fn new(
        rx: broadcast::Receiver<MatchEvent>,
        broadcast: Arc<BroadcastManager>,
        engine: Arc<Matchmaker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            broadcast,
            engine,
            cancel,
        }
    }

    /// Run the bridge loop. Exits on shutdown or when the sender is dropped.
    #[tracing::instrument(skip_all, name = "event_bridge")]
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("event bridge: shutdown signal received");
                    break;
                }
                result = self.rx.recv() => {
                    match result {
                        Ok(event) => self.bridge_event(&event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged = n, "event bridge lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("event bridge: sender closed, exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn bridge_event(&self, event: &MatchEvent) {
        debug!(kind = event.kind(), "bridging event");
        match event {
            MatchEvent::SessionAssigned { session, node } => {
                let protocol = if node.secure { "wss" } else { "ws" };
                let assigned = frame(
                    "serverAssigned",
                    json!({
                        "sessionId": session.id,
                        "signallingServer": node.endpoint(),
                        "protocol": protocol,
                        "serverId": node.id,
                    }),
                );
                self.broadcast.send_to_session(&session.id, &assigned).await;
                self.push_queue_update().await;
            }
            MatchEvent::SessionRemoved {
                session_id,
                reason: RemovalReason::Expired,
            } => {
                let expired = frame("sessionExpired", json!({ "sessionId": session_id }));
                self.broadcast.send_to_session(session_id, &expired).await;
                self.push_queue_update().await;
            }
            MatchEvent::SessionQueued { .. }
            | MatchEvent::SessionRemoved {
                reason: RemovalReason::Explicit,
                ..
            } => {
                self.push_queue_update().await;
            }
            // Node and health events have no client-facing frames.
            _ => {}
        }
    }

    /// Broadcast a fresh queue snapshot to every connection.
    async fn push_queue_update(&self) {
        let stats = self.engine.stats();
        let update = frame(
            "queueUpdate",
            json!({
                "queueLength": stats.queue_length,
                "eligibleNodes": stats.eligible_nodes,
            }),
        );
        self.broadcast.broadcast_all(&update).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ClientConnection;
    use prism_core::{ConnId, ManualClock, NodeAnnounce, SessionId};
    use prism_engine::MatchmakerConfig;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        engine: Arc<Matchmaker>,
        broadcast: Arc<BroadcastManager>,
        cancel: CancellationToken,
    }

    async fn boot() -> Harness {
        let bus = EventBus::new();
        let tx = bus_channel(&bus, 64);
        let engine = Arc::new(Matchmaker::new(
            MatchmakerConfig::default(),
            Arc::new(ManualClock::new(0)),
            bus,
        ));
        let broadcast = Arc::new(BroadcastManager::new());
        let cancel = CancellationToken::new();
        let bridge = EventBridge::new(
            tx.subscribe(),
            broadcast.clone(),
            engine.clone(),
            cancel.clone(),
        );
        let _ = tokio::spawn(bridge.run());
        Harness {
            engine,
            broadcast,
            cancel,
        }
    }

    async fn attach(
        harness: &Harness,
        conn_id: &str,
        session: Option<&SessionId>,
    ) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(64);
        let conn = ClientConnection::new(conn_id.into(), tx);
        if let Some(sid) = session {
            conn.bind_session(sid.clone());
        }
        harness.broadcast.add(Arc::new(conn)).await;
        rx
    }

    async fn recv_frames(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<serde_json::Value> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut frames = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            frames.push(serde_json::from_str(&msg).unwrap());
        }
        frames
    }

    fn ready_node(address: &str) -> NodeAnnounce {
        NodeAnnounce {
            address: address.into(),
            port: 8080,
            ready: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn assignment_pushes_server_assigned_to_session() {
        let harness = boot().await;
        let session = harness.engine.enqueue(Some("c1"), 0);
        let mut rx = attach(&harness, "conn1", Some(&session.id)).await;

        let _ = harness
            .engine
            .register_node(ConnId::new(1), &ready_node("10.0.0.9"));
        assert!(harness.engine.drain_queue());

        let frames = recv_frames(&mut rx).await;
        let assigned = frames
            .iter()
            .find(|f| f["type"] == "serverAssigned")
            .expect("serverAssigned frame");
        assert_eq!(assigned["data"]["signallingServer"], "10.0.0.9:8080");
        assert_eq!(assigned["data"]["protocol"], "ws");
        assert_eq!(assigned["data"]["sessionId"], session.id.as_str());
        assert!(assigned["data"]["serverId"].is_string());
    }

    #[tokio::test]
    async fn secure_node_reports_wss() {
        let harness = boot().await;
        let session = harness.engine.enqueue(None, 0);
        let mut rx = attach(&harness, "conn1", Some(&session.id)).await;

        let mut announce = ready_node("edge");
        announce.https = true;
        let _ = harness.engine.register_node(ConnId::new(1), &announce);
        let _ = harness.engine.drain_queue();

        let frames = recv_frames(&mut rx).await;
        let assigned = frames
            .iter()
            .find(|f| f["type"] == "serverAssigned")
            .unwrap();
        assert_eq!(assigned["data"]["protocol"], "wss");
    }

    #[tokio::test]
    async fn assignment_not_pushed_to_other_sessions() {
        let harness = boot().await;
        let session = harness.engine.enqueue(None, 0);
        let mut other_rx = attach(&harness, "other", Some(&SessionId::from("unrelated"))).await;
        let _ = attach(&harness, "mine", Some(&session.id)).await;

        let _ = harness.engine.register_node(ConnId::new(1), &ready_node("h"));
        let _ = harness.engine.drain_queue();

        let frames = recv_frames(&mut other_rx).await;
        assert!(frames.iter().all(|f| f["type"] != "serverAssigned"));
        // But the global queueUpdate does reach it.
        assert!(frames.iter().any(|f| f["type"] == "queueUpdate"));
    }

    #[tokio::test]
    async fn expiry_pushes_session_expired() {
        let bus = EventBus::new();
        let tx = bus_channel(&bus, 64);
        let clock = Arc::new(ManualClock::new(0));
        let engine = Arc::new(Matchmaker::new(
            MatchmakerConfig {
                session_timeout_ms: 1_000,
                ..Default::default()
            },
            clock.clone(),
            bus,
        ));
        let broadcast = Arc::new(BroadcastManager::new());
        let cancel = CancellationToken::new();
        let _ = tokio::spawn(
            EventBridge::new(tx.subscribe(), broadcast.clone(), engine.clone(), cancel).run(),
        );

        let session = engine.enqueue(None, 0);
        let (conn_tx, mut rx) = mpsc::channel(64);
        let conn = ClientConnection::new("c1".into(), conn_tx);
        conn.bind_session(session.id.clone());
        broadcast.add(Arc::new(conn)).await;

        clock.advance(2_000);
        assert_eq!(engine.sweep_sessions(), 1);

        let frames = recv_frames(&mut rx).await;
        assert!(frames.iter().any(|f| f["type"] == "sessionExpired"));
    }

    #[tokio::test]
    async fn queue_changes_broadcast_queue_update() {
        let harness = boot().await;
        let mut rx = attach(&harness, "watcher", None).await;

        let session = harness.engine.enqueue(None, 0);
        let frames = recv_frames(&mut rx).await;
        let update = frames.iter().find(|f| f["type"] == "queueUpdate").unwrap();
        assert_eq!(update["data"]["queueLength"], 1);

        harness.engine.remove_session(&session.id);
        let frames = recv_frames(&mut rx).await;
        let update = frames.iter().find(|f| f["type"] == "queueUpdate").unwrap();
        assert_eq!(update["data"]["queueLength"], 0);
    }

    #[tokio::test]
    async fn node_events_emit_no_client_frames() {
        let harness = boot().await;
        let mut rx = attach(&harness, "watcher", None).await;

        let _ = harness.engine.register_node(ConnId::new(1), &ready_node("h"));
        let frames = recv_frames(&mut rx).await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn bridge_exits_on_cancel() {
        let harness = boot().await;
        harness.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Emitting after cancel must not panic anywhere.
        let _ = harness.engine.enqueue(None, 0);
    }
}
