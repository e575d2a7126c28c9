//! Control-message envelope and codec.

use serde::Deserialize;
use thiserror::Error;

use prism_core::NodeAnnounce;

/// Errors at the protocol boundary. Any decode error closes the offending
/// connection without touching engine state.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed JSON payload: {0}")]
    MalformedJson(String),
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Messages accepted from a stream node.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeMessage {
    /// Initial announcement; must be the first message on a connection.
    Connect(NodeAnnounce),
    StreamerConnected,
    StreamerDisconnected,
    ClientConnected,
    ClientDisconnected,
    Ping,
}

const KNOWN_KINDS: &[&str] = &[
    "connect",
    "streamerConnected",
    "streamerDisconnected",
    "clientConnected",
    "clientDisconnected",
    "ping",
];

/// Decode one inbound payload.
///
/// Distinguishes malformed JSON, an envelope without a usable `type`, and a
/// well-formed envelope of an unknown kind — all of which close the
/// connection, but log differently.
pub fn decode(payload: &[u8]) -> Result<NodeMessage, WireError> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| WireError::MalformedJson(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| WireError::InvalidEnvelope("missing \"type\" field".to_owned()))?;
    if !KNOWN_KINDS.contains(&kind) {
        return Err(WireError::UnknownKind(kind.to_owned()));
    }

    let message: NodeMessage = serde_json::from_value(value)
        .map_err(|e| WireError::InvalidEnvelope(e.to_string()))?;

    if let NodeMessage::Connect(announce) = &message {
        if announce.address.is_empty() {
            return Err(WireError::InvalidEnvelope("connect with empty address".to_owned()));
        }
        if announce.port == 0 {
            return Err(WireError::InvalidEnvelope("connect with port 0".to_owned()));
        }
    }

    Ok(message)
}
