//! WebSocket frame dispatch — parses incoming text as a [`ClientFrame`] and
//! drives the engine, returning the reply frame.

use serde::Deserialize;
use serde_json::{json, Value};

use prism_core::SessionId;
use prism_engine::Matchmaker;

use super::connection::ClientConnection;

/// Frames accepted from a client.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    JoinQueue {
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        priority: i32,
    },
    GetQueueStatus {
        session_id: SessionId,
    },
    UpdateActivity {
        session_id: SessionId,
    },
    Ping,
}

/// Build an outbound frame: `{ type, timestamp, data }`.
#[must_use]
pub fn frame(kind: &str, data: Value) -> Value {
    json!({
        "type": kind,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "data": data,
    })
}

/// Build an `error` frame.
#[must_use]
pub fn error_frame(message: &str) -> Value {
    frame("error", json!({ "message": message }))
}

/// Handle one incoming text frame and produce the reply.
///
/// A successful `joinQueue` binds the connection to the created session so
/// session-scoped pushes reach this client.
pub fn handle_frame(text: &str, connection: &ClientConnection, engine: &Matchmaker) -> Value {
    let parsed: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => return error_frame(&format!("invalid frame: {e}")),
    };

    match parsed {
        ClientFrame::JoinQueue {
            client_id,
            priority,
        } => {
            let session = engine.enqueue(client_id.as_deref(), priority);
            connection.bind_session(session.id.clone());
            // A node may already be free.
            let _ = engine.drain_queue();
            let queue_position = engine
                .queue_position(&session.id)
                .map_or(0, |p| p.position);
            frame(
                "queueJoined",
                json!({
                    "sessionId": session.id,
                    "queuePosition": queue_position,
                }),
            )
        }
        ClientFrame::GetQueueStatus { session_id } => match engine.queue_position(&session_id) {
            Some(position) => frame(
                "queueStatus",
                serde_json::to_value(position).unwrap_or_default(),
            ),
            None => error_frame("session not in queue"),
        },
        ClientFrame::UpdateActivity { session_id } => {
            if engine.update_activity(&session_id) {
                frame("activityUpdated", json!({ "sessionId": session_id }))
            } else {
                error_frame("unknown session")
            }
        }
        ClientFrame::Ping => frame("pong", json!({})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{ConnId, EventBus, ManualClock, NodeAnnounce};
    use prism_engine::MatchmakerConfig;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn make_engine() -> Arc<Matchmaker> {
        Arc::new(Matchmaker::new(
            MatchmakerConfig::default(),
            Arc::new(ManualClock::new(0)),
            EventBus::new(),
        ))
    }

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        (ClientConnection::new("c1".into(), tx), rx)
    }

    fn ready_node() -> NodeAnnounce {
        NodeAnnounce {
            address: "10.0.0.1".into(),
            port: 8080,
            ready: true,
            ..Default::default()
        }
    }

    #[test]
    fn join_queue_returns_position_and_binds_session() {
        let engine = make_engine();
        let (conn, _rx) = make_connection();

        let reply = handle_frame(
            r#"{"type":"joinQueue","clientId":"alice","priority":0}"#,
            &conn,
            &engine,
        );
        assert_eq!(reply["type"], "queueJoined");
        assert_eq!(reply["data"]["queuePosition"], 1);

        let session_id = reply["data"]["sessionId"].as_str().unwrap();
        assert_eq!(conn.session_id(), Some(SessionId::from(session_id)));
    }

    #[test]
    fn join_queue_with_free_node_reports_position_zero() {
        let engine = make_engine();
        let _ = engine.register_node(ConnId::new(1), &ready_node());
        let (conn, _rx) = make_connection();

        let reply = handle_frame(r#"{"type":"joinQueue"}"#, &conn, &engine);
        assert_eq!(reply["type"], "queueJoined");
        // Assigned straight away: not queued anymore.
        assert_eq!(reply["data"]["queuePosition"], 0);
    }

    #[test]
    fn join_queue_defaults_are_optional() {
        let engine = make_engine();
        let (conn, _rx) = make_connection();
        let reply = handle_frame(r#"{"type":"joinQueue"}"#, &conn, &engine);
        assert_eq!(reply["type"], "queueJoined");
    }

    #[test]
    fn get_queue_status_reports_position() {
        let engine = make_engine();
        let (conn, _rx) = make_connection();
        let join = handle_frame(r#"{"type":"joinQueue","clientId":"a"}"#, &conn, &engine);
        let session_id = join["data"]["sessionId"].as_str().unwrap();

        let reply = handle_frame(
            &format!(r#"{{"type":"getQueueStatus","sessionId":"{session_id}"}}"#),
            &conn,
            &engine,
        );
        assert_eq!(reply["type"], "queueStatus");
        assert_eq!(reply["data"]["position"], 1);
        assert_eq!(reply["data"]["totalInQueue"], 1);
        assert_eq!(reply["data"]["etaMs"], 300_000);
    }

    #[test]
    fn get_queue_status_unknown_session_is_error() {
        let engine = make_engine();
        let (conn, _rx) = make_connection();
        let reply = handle_frame(
            r#"{"type":"getQueueStatus","sessionId":"ghost"}"#,
            &conn,
            &engine,
        );
        assert_eq!(reply["type"], "error");
    }

    #[test]
    fn update_activity_bumps_session() {
        let engine = make_engine();
        let (conn, _rx) = make_connection();
        let join = handle_frame(r#"{"type":"joinQueue"}"#, &conn, &engine);
        let session_id = join["data"]["sessionId"].as_str().unwrap();

        let reply = handle_frame(
            &format!(r#"{{"type":"updateActivity","sessionId":"{session_id}"}}"#),
            &conn,
            &engine,
        );
        assert_eq!(reply["type"], "activityUpdated");
        assert_eq!(reply["data"]["sessionId"], session_id);
    }

    #[test]
    fn update_activity_unknown_session_is_error() {
        let engine = make_engine();
        let (conn, _rx) = make_connection();
        let reply = handle_frame(
            r#"{"type":"updateActivity","sessionId":"ghost"}"#,
            &conn,
            &engine,
        );
        assert_eq!(reply["type"], "error");
    }

    #[test]
    fn ping_pongs() {
        let engine = make_engine();
        let (conn, _rx) = make_connection();
        let reply = handle_frame(r#"{"type":"ping"}"#, &conn, &engine);
        assert_eq!(reply["type"], "pong");
    }

    #[test]
    fn invalid_json_is_error_frame() {
        let engine = make_engine();
        let (conn, _rx) = make_connection();
        let reply = handle_frame("not json", &conn, &engine);
        assert_eq!(reply["type"], "error");
        assert!(reply["data"]["message"]
            .as_str()
            .unwrap()
            .contains("invalid frame"));
    }

    #[test]
    fn unknown_frame_type_is_error_frame() {
        let engine = make_engine();
        let (conn, _rx) = make_connection();
        let reply = handle_frame(r#"{"type":"selfDestruct"}"#, &conn, &engine);
        assert_eq!(reply["type"], "error");
    }

    #[test]
    fn frames_carry_timestamp() {
        let reply = frame("pong", json!({}));
        assert!(reply["timestamp"].is_string());
        assert!(!reply["timestamp"].as_str().unwrap().is_empty());
    }
}
