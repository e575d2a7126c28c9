//! TCP accept loop and per-connection protocol handling.
//!
//! One node per connection, connection initiated by the node. The first
//! message must be `connect`; decode failures and protocol violations close
//! the connection. The engine only ever sees the opaque [`ConnId`] assigned
//! at accept time.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use prism_core::ConnId;
use prism_engine::{Matchmaker, NodeTransition};

use crate::message::{decode, NodeMessage, WireError};

/// Largest accepted payload. A control message is a small JSON object; a
/// bigger read is a misbehaving peer.
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Accepts node control connections and drives the engine.
pub struct NodeListener {
    engine: Arc<Matchmaker>,
    bind_addr: String,
}

impl NodeListener {
    pub fn new(engine: Arc<Matchmaker>, bind_addr: impl Into<String>) -> Self {
        Self {
            engine,
            bind_addr: bind_addr.into(),
        }
    }

    /// Bind and start accepting. Returns the bound address and the accept
    /// task handle; the task exits when `cancel` fires.
    pub async fn listen(
        &self,
        cancel: CancellationToken,
    ) -> Result<(SocketAddr, JoinHandle<()>), WireError> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "node control listener started");

        let engine = self.engine.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let conn = ConnId::new(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
                                debug!(%conn, %peer, "node connection accepted");
                                let engine = engine.clone();
                                let cancel = cancel.clone();
                                let _ = tokio::spawn(async move {
                                    handle_connection(stream, conn, engine, cancel).await;
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, "accept failed");
                            }
                        }
                    }
                    () = cancel.cancelled() => {
                        info!("node control listener shutting down");
                        break;
                    }
                }
            }
        });

        Ok((local_addr, handle))
    }
}

/// Drive one node connection from accept to close.
#[instrument(skip_all, fields(conn = %conn))]
async fn handle_connection(
    mut stream: TcpStream,
    conn: ConnId,
    engine: Arc<Matchmaker>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_PAYLOAD_BYTES];
    let mut bound = false;

    loop {
        let n = tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("node connection closed by peer");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "node connection read error");
                    break;
                }
            },
            () = cancel.cancelled() => break,
        };

        let message = match decode(&buf[..n]) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "closing node connection");
                break;
            }
        };

        if let Err(violation) = apply_message(&engine, conn, &mut bound, message) {
            warn!(error = %violation, "closing node connection");
            break;
        }
    }

    // The binding is released whether the peer closed, errored, or violated
    // the protocol; the bound node (if any) is unregistered with it.
    engine.connection_closed(conn);
}

/// Apply one decoded message to the engine. Returns a protocol violation if
/// the message is not acceptable in the current connection state.
fn apply_message(
    engine: &Matchmaker,
    conn: ConnId,
    bound: &mut bool,
    message: NodeMessage,
) -> Result<(), WireError> {
    match message {
        NodeMessage::Connect(announce) => {
            if *bound {
                // Re-announce on a live connection: drop the old node and
                // register fresh (same-endpoint eviction applies either way).
                if let Some(old) = engine.node_for_conn(conn) {
                    engine.unregister_node(&old);
                }
            }
            let _ = engine.register_node(conn, &announce);
            *bound = true;
            let _ = engine.drain_queue();
            Ok(())
        }
        other if !*bound => Err(WireError::ProtocolViolation(format!(
            "first message must be connect, got {other:?}"
        ))),
        other => {
            let Some(node_id) = engine.node_for_conn(conn) else {
                // Bound node was evicted by a racing re-registration.
                return Err(WireError::ProtocolViolation(
                    "connection no longer bound to a node".to_owned(),
                ));
            };
            let transition = match other {
                NodeMessage::StreamerConnected => NodeTransition::StreamerConnected,
                NodeMessage::StreamerDisconnected => NodeTransition::StreamerDisconnected,
                NodeMessage::ClientConnected => NodeTransition::ClientConnected,
                NodeMessage::ClientDisconnected => NodeTransition::ClientDisconnected,
                NodeMessage::Ping => NodeTransition::Ping,
                NodeMessage::Connect(_) => unreachable!("handled above"),
            };
            engine.update_node(&node_id, transition);
            // These transitions can make the node eligible again.
            if matches!(
                transition,
                NodeTransition::StreamerConnected | NodeTransition::ClientDisconnected
            ) {
                let _ = engine.drain_queue();
            }
            Ok(())
        }
    }
}
