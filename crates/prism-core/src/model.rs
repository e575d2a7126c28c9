//! Data model shared by the engine, the wire protocol, and the edges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, SessionId};

/// A registered streaming server, as tracked by the matchmaker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamNode {
    pub id: NodeId,
    /// Endpoint as reachable by clients.
    pub address: String,
    pub port: u16,
    /// Whether clients should use an encrypted transport (wss).
    pub secure: bool,
    /// Clients currently assigned or attached.
    pub connected_clients: u32,
    /// Monotonic timestamp of the last keepalive from the node.
    pub last_ping_ms: u64,
    /// True iff the streamer side is up.
    pub ready: bool,
    /// The node is not eligible for a new assignment before this instant.
    pub cooldown_until_ms: u64,
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Monotonic registration instant; the registry iterates in this order.
    pub registered_at_ms: u64,
}

impl StreamNode {
    /// Whether the node can take a new assignment right now.
    #[must_use]
    pub fn is_eligible(&self, now_ms: u64) -> bool {
        self.ready && self.connected_clients == 0 && now_ms >= self.cooldown_until_ms
    }

    /// `address:port` as handed to clients.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Initial announcement a node sends on `connect`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAnnounce {
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub https: bool,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub player_connected: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Lifecycle state of a client session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Queued,
    Connected,
    Disconnected,
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A client's intent to be matched to a stream node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSession {
    pub id: SessionId,
    /// Caller-supplied label, sanitized on ingest.
    pub client_id: Option<String>,
    /// The node this session was matched to, if any.
    pub node_id: Option<NodeId>,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
    pub status: SessionStatus,
    /// Higher value = earlier service.
    pub priority: i32,
}

/// Position of a queued session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePosition {
    /// 1-based rank in the queue.
    pub position: usize,
    pub total_in_queue: usize,
    /// Estimated wait: `position × average_hold_ms`.
    pub eta_ms: u64,
}

/// Strip angle brackets and surrounding whitespace from a caller-supplied
/// client label.
#[must_use]
pub fn sanitize_client_id(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| *c != '<' && *c != '>').collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ready: bool, clients: u32, cooldown: u64) -> StreamNode {
        StreamNode {
            id: NodeId::new(),
            address: "10.0.0.1".into(),
            port: 8080,
            secure: false,
            connected_clients: clients,
            last_ping_ms: 0,
            ready,
            cooldown_until_ms: cooldown,
            metadata: BTreeMap::new(),
            registered_at_ms: 0,
        }
    }

    #[test]
    fn eligible_when_ready_idle_and_past_cooldown() {
        assert!(node(true, 0, 0).is_eligible(100));
    }

    #[test]
    fn not_eligible_when_not_ready() {
        assert!(!node(false, 0, 0).is_eligible(100));
    }

    #[test]
    fn not_eligible_with_connected_client() {
        assert!(!node(true, 1, 0).is_eligible(100));
    }

    #[test]
    fn not_eligible_during_cooldown() {
        assert!(!node(true, 0, 500).is_eligible(100));
    }

    #[test]
    fn eligible_at_exact_cooldown_boundary() {
        assert!(node(true, 0, 500).is_eligible(500));
    }

    #[test]
    fn endpoint_format() {
        assert_eq!(node(true, 0, 0).endpoint(), "10.0.0.1:8080");
    }

    #[test]
    fn announce_defaults() {
        let json = r#"{"address":"10.0.0.1","port":8080}"#;
        let a: NodeAnnounce = serde_json::from_str(json).unwrap();
        assert!(!a.https);
        assert!(!a.ready);
        assert!(!a.player_connected);
        assert!(a.metadata.is_empty());
    }

    #[test]
    fn announce_camel_case_fields() {
        let json = r#"{"address":"h","port":1,"playerConnected":true,"ready":true}"#;
        let a: NodeAnnounce = serde_json::from_str(json).unwrap();
        assert!(a.player_connected);
        assert!(a.ready);
    }

    #[test]
    fn session_status_serde() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Queued).unwrap(),
            "\"queued\""
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::Connected).unwrap(),
            "\"connected\""
        );
    }

    #[test]
    fn session_status_display() {
        assert_eq!(SessionStatus::Expired.to_string(), "expired");
    }

    #[test]
    fn sanitize_strips_angle_brackets() {
        assert_eq!(
            sanitize_client_id("<script>alice</script>").as_deref(),
            Some("scriptalice/script")
        );
    }

    #[test]
    fn sanitize_trims_whitespace() {
        assert_eq!(sanitize_client_id("  bob  ").as_deref(), Some("bob"));
    }

    #[test]
    fn sanitize_empty_becomes_none() {
        assert_eq!(sanitize_client_id("   "), None);
        assert_eq!(sanitize_client_id("<>"), None);
    }

    #[test]
    fn queue_position_serializes_camel_case() {
        let pos = QueuePosition {
            position: 1,
            total_in_queue: 3,
            eta_ms: 300_000,
        };
        let v = serde_json::to_value(pos).unwrap();
        assert_eq!(v["position"], 1);
        assert_eq!(v["totalInQueue"], 3);
        assert_eq!(v["etaMs"], 300_000);
    }
}
