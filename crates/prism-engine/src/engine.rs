//! The matchmaker engine.
//!
//! Owns the node registry (insertion order), the connection→node bindings,
//! the priority queue and the session store, all behind one mutex. Every
//! public operation is atomic with respect to the others; events fire inside
//! the critical section, after the mutation they describe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prism_core::{
    ClientSession, Clock, ConnId, EventBus, MatchEvent, NodeAnnounce, NodeId, QueuePosition,
    RemovalReason, SessionId, SessionStatus, StreamNode,
};

use crate::queue::PriorityQueue;
use crate::store::SessionStore;

/// Tunables for the assignment policy and the sweeps.
#[derive(Clone, Copy, Debug)]
pub struct MatchmakerConfig {
    /// Window after an assignment during which the node stays ineligible,
    /// covering the gap until its `clientConnected` arrives.
    pub assignment_cooldown_ms: u64,
    /// A node with no ping for this long is unregistered by the sweep.
    pub stale_node_after_ms: u64,
    /// A session idle longer than this is removed by the sweep.
    pub session_timeout_ms: u64,
    /// Per-position wait estimate used for queue ETAs.
    pub average_hold_ms: u64,
}

impl Default for MatchmakerConfig {
    fn default() -> Self {
        Self {
            assignment_cooldown_ms: 10_000,
            stale_node_after_ms: 120_000,
            session_timeout_ms: 1_800_000,
            average_hold_ms: 300_000,
        }
    }
}

/// State transition decoded from a node control message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeTransition {
    StreamerConnected,
    StreamerDisconnected,
    ClientConnected,
    ClientDisconnected,
    Ping,
}

/// Read-only snapshot of engine counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub total_nodes: usize,
    pub eligible_nodes: usize,
    pub connected_clients: u32,
    pub queue_length: usize,
    pub session_count: usize,
}

#[derive(Default)]
struct State {
    /// Registry in insertion order; `acquire` scans front to back.
    nodes: Vec<StreamNode>,
    bindings: HashMap<ConnId, NodeId>,
    queue: PriorityQueue,
    sessions: SessionStore,
}

/// The matchmaker core.
pub struct Matchmaker {
    state: Mutex<State>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: MatchmakerConfig,
}

impl Matchmaker {
    pub fn new(config: MatchmakerConfig, clock: Arc<dyn Clock>, bus: EventBus) -> Self {
        Self {
            state: Mutex::new(State::default()),
            bus,
            clock,
            config,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &MatchmakerConfig {
        &self.config
    }

    // ── Node registry ──────────────────────────────────────────────────

    /// Register a node announced over `conn`. An existing node at the same
    /// `(address, port)` is evicted first.
    pub fn register_node(&self, conn: ConnId, announce: &NodeAnnounce) -> NodeId {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();

        if let Some(index) = state
            .nodes
            .iter()
            .position(|n| n.address == announce.address && n.port == announce.port)
        {
            let evicted = state.nodes.remove(index);
            state.bindings.retain(|_, bound| bound != &evicted.id);
            info!(node_id = %evicted.id, endpoint = %evicted.endpoint(), "evicting re-registered node");
            self.bus.emit(&MatchEvent::NodeUnregistered {
                node_id: evicted.id,
            });
        }

        let node = StreamNode {
            id: NodeId::new(),
            address: announce.address.clone(),
            port: announce.port,
            secure: announce.https,
            connected_clients: u32::from(announce.player_connected),
            last_ping_ms: now,
            ready: announce.ready,
            cooldown_until_ms: 0,
            metadata: announce.metadata.clone(),
            registered_at_ms: now,
        };
        let node_id = node.id.clone();
        let _ = state.bindings.insert(conn, node_id.clone());
        state.nodes.push(node.clone());
        gauge!("mm_nodes_registered").set(state.nodes.len() as f64);
        info!(node_id = %node_id, endpoint = %node.endpoint(), ready = node.ready, "node registered");
        self.bus.emit(&MatchEvent::NodeRegistered { node });
        node_id
    }

    /// Apply a control-message transition to a node. Unknown nodes are
    /// logged and ignored — an update racing a disconnect is not a fault.
    pub fn update_node(&self, node_id: &NodeId, transition: NodeTransition) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let Some(node) = state.nodes.iter_mut().find(|n| &n.id == node_id) else {
            warn!(node_id = %node_id, ?transition, "update for unknown node");
            return;
        };
        match transition {
            NodeTransition::StreamerConnected => node.ready = true,
            NodeTransition::StreamerDisconnected => node.ready = false,
            NodeTransition::ClientConnected => node.connected_clients += 1,
            NodeTransition::ClientDisconnected => {
                node.connected_clients = node.connected_clients.saturating_sub(1);
                if node.connected_clients == 0 {
                    // Immediately eligible again.
                    node.cooldown_until_ms = 0;
                }
            }
            NodeTransition::Ping => node.last_ping_ms = now,
        }
        let snapshot = node.clone();
        debug!(node_id = %node_id, ?transition, "node updated");
        self.bus.emit(&MatchEvent::NodeUpdated { node: snapshot });
    }

    /// Remove a node from the registry. Idempotent.
    pub fn unregister_node(&self, node_id: &NodeId) {
        let mut state = self.state.lock();
        self.unregister_locked(&mut state, node_id);
    }

    fn unregister_locked(&self, state: &mut State, node_id: &NodeId) {
        let Some(index) = state.nodes.iter().position(|n| &n.id == node_id) else {
            return;
        };
        let _ = state.nodes.remove(index);
        state.bindings.retain(|_, bound| bound != node_id);
        gauge!("mm_nodes_registered").set(state.nodes.len() as f64);
        info!(node_id = %node_id, "node unregistered");
        self.bus.emit(&MatchEvent::NodeUnregistered {
            node_id: node_id.clone(),
        });
    }

    /// Release the connection binding and unregister the bound node, if any.
    pub fn connection_closed(&self, conn: ConnId) {
        let mut state = self.state.lock();
        if let Some(node_id) = state.bindings.remove(&conn) {
            self.unregister_locked(&mut state, &node_id);
        }
    }

    /// Node currently bound to a connection handle.
    pub fn node_for_conn(&self, conn: ConnId) -> Option<NodeId> {
        self.state.lock().bindings.get(&conn).cloned()
    }

    /// First eligible node in insertion order, with the assignment cooldown
    /// applied in the same critical section. Emits nothing.
    pub fn acquire_node(&self) -> Option<StreamNode> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        self.acquire_locked(&mut state, now)
    }

    fn acquire_locked(&self, state: &mut State, now: u64) -> Option<StreamNode> {
        let node = state.nodes.iter_mut().find(|n| n.is_eligible(now))?;
        node.cooldown_until_ms = now + self.config.assignment_cooldown_ms;
        Some(node.clone())
    }

    // ── Queue & sessions ───────────────────────────────────────────────

    /// Create a queued session and insert it per the priority rule.
    pub fn enqueue(&self, client_id: Option<&str>, priority: i32) -> ClientSession {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let session = state.sessions.create(client_id, priority, now, &self.bus);
        let position = state.queue.insert(session.id.clone(), priority);
        gauge!("mm_queue_depth").set(state.queue.len() as f64);
        debug!(session_id = %session.id, priority, position, "session queued");
        self.bus.emit(&MatchEvent::SessionQueued {
            session: session.clone(),
            position,
        });
        session
    }

    /// Position of a queued session, or `None` if unknown / not queued.
    pub fn queue_position(&self, session_id: &SessionId) -> Option<QueuePosition> {
        let state = self.state.lock();
        let position = state.queue.position(session_id)?;
        Some(QueuePosition {
            position,
            total_in_queue: state.queue.len(),
            eta_ms: position as u64 * self.config.average_hold_ms,
        })
    }

    /// Assign queued sessions to eligible nodes until one side runs dry.
    /// Returns whether at least one assignment happened.
    pub fn drain_queue(&self) -> bool {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let mut assigned = false;

        while !state.queue.is_empty() {
            let Some(node) = self.acquire_locked(&mut state, now) else {
                break;
            };
            let Some(session_id) = state.queue.pop_front() else {
                break;
            };
            {
                let session = state
                    .sessions
                    .get_mut(&session_id)
                    .expect("queued session must have a store record");
                session.node_id = Some(node.id.clone());
                session.last_activity_ms = now;
            }
            let _ = state
                .sessions
                .update_status(&session_id, SessionStatus::Connected, &self.bus);
            let session = state
                .sessions
                .get(&session_id)
                .expect("session still present after status change")
                .clone();
            counter!("mm_assignments_total").increment(1);
            info!(session_id = %session_id, node_id = %node.id, "session assigned");
            // Emitted after the status transition and after the cooldown
            // was applied, so subscribers see the post-assignment state.
            self.bus.emit(&MatchEvent::SessionAssigned { session, node });
            assigned = true;
        }

        gauge!("mm_queue_depth").set(state.queue.len() as f64);
        assigned
    }

    /// Remove a session from the queue and the store. Idempotent.
    pub fn remove_session(&self, session_id: &SessionId) {
        let mut state = self.state.lock();
        let _ = state.queue.remove(session_id);
        let _ = state
            .sessions
            .remove(session_id, RemovalReason::Explicit, &self.bus);
        gauge!("mm_queue_depth").set(state.queue.len() as f64);
    }

    /// Bump a session's activity timestamp.
    pub fn update_activity(&self, session_id: &SessionId) -> bool {
        let now = self.clock.now_ms();
        self.state.lock().sessions.update_activity(session_id, now)
    }

    /// Clone of a session record.
    pub fn session(&self, session_id: &SessionId) -> Option<ClientSession> {
        self.state.lock().sessions.get(session_id).cloned()
    }

    // ── Sweeps ─────────────────────────────────────────────────────────

    /// Unregister nodes whose last ping is at least the stale threshold old.
    /// Returns the number removed.
    pub fn sweep_stale_nodes(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let stale: Vec<NodeId> = state
            .nodes
            .iter()
            .filter(|n| now.saturating_sub(n.last_ping_ms) >= self.config.stale_node_after_ms)
            .map(|n| n.id.clone())
            .collect();
        for node_id in &stale {
            warn!(node_id = %node_id, "unregistering stale node");
            self.unregister_locked(&mut state, node_id);
        }
        counter!("mm_stale_nodes_swept_total").increment(stale.len() as u64);
        stale.len()
    }

    /// Remove sessions idle longer than the session timeout. Emits one
    /// `sessionRemoved` per session and a single `sweepCompleted`.
    pub fn sweep_sessions(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let expired = state
            .sessions
            .expired_snapshot(now, self.config.session_timeout_ms);
        for session in &expired {
            let _ = state.queue.remove(&session.id);
            let _ = state
                .sessions
                .remove(&session.id, RemovalReason::Expired, &self.bus);
        }
        gauge!("mm_queue_depth").set(state.queue.len() as f64);
        counter!("mm_sessions_expired_total").increment(expired.len() as u64);
        if !expired.is_empty() {
            info!(removed = expired.len(), "session sweep completed");
        }
        self.bus.emit(&MatchEvent::SweepCompleted {
            removed: expired.len(),
        });
        expired.len()
    }

    // ── Snapshots ──────────────────────────────────────────────────────

    /// Aggregate counters, copied under the lock.
    pub fn stats(&self) -> EngineStats {
        let now = self.clock.now_ms();
        let state = self.state.lock();
        EngineStats {
            total_nodes: state.nodes.len(),
            eligible_nodes: state.nodes.iter().filter(|n| n.is_eligible(now)).count(),
            connected_clients: state.nodes.iter().map(|n| n.connected_clients).sum(),
            queue_length: state.queue.len(),
            session_count: state.sessions.len(),
        }
    }

    /// Copies of all registered nodes, in insertion order.
    pub fn node_snapshots(&self) -> Vec<StreamNode> {
        self.state.lock().nodes.clone()
    }
}

/// Periodic sweep driver: runs both sweeps every `interval` until cancelled.
pub async fn run_sweep_loop(
    engine: Arc<Matchmaker>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so a fresh start does not
    // sweep before anything can have gone stale.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stale = engine.sweep_stale_nodes();
                let expired = engine.sweep_sessions();
                debug!(stale, expired, "sweep tick");
            }
            () = cancel.cancelled() => {
                debug!("sweep loop cancelled");
                break;
            }
        }
    }
}
