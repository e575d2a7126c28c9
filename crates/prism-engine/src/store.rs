//! Session store — canonical records for client sessions.
//!
//! The store is a plain map owned by the engine and mutated under the
//! engine's single-writer lock; the priority queue references sessions by ID
//! only. Store mutations emit their own events (`sessionCreated`,
//! `sessionStatusChanged`, `sessionRemoved`) through the shared bus.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use prism_core::{
    sanitize_client_id, ClientSession, EventBus, MatchEvent, RemovalReason, SessionId,
    SessionStatus,
};

/// Read-only counters for the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStoreStats {
    pub total: usize,
    pub queued: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub expired: usize,
}

/// In-memory session records, keyed by session ID.
#[derive(Default)]
pub struct SessionStore {
    sessions: HashMap<SessionId, ClientSession>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Queued` session. The caller-supplied label is sanitized
    /// (angle brackets stripped, whitespace trimmed).
    pub fn create(
        &mut self,
        client_id: Option<&str>,
        priority: i32,
        now_ms: u64,
        bus: &EventBus,
    ) -> ClientSession {
        let session = ClientSession {
            id: SessionId::generate(now_ms),
            client_id: client_id.and_then(sanitize_client_id),
            node_id: None,
            created_at_ms: now_ms,
            last_activity_ms: now_ms,
            status: SessionStatus::Queued,
            priority,
        };
        let _ = self.sessions.insert(session.id.clone(), session.clone());
        bus.emit(&MatchEvent::SessionCreated {
            session: session.clone(),
        });
        session
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&ClientSession> {
        self.sessions.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &SessionId) -> Option<&mut ClientSession> {
        self.sessions.get_mut(id)
    }

    /// Bump `last_activity`. Returns whether the session exists.
    pub fn update_activity(&mut self, id: &SessionId, now_ms: u64) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.last_activity_ms = now_ms;
                true
            }
            None => false,
        }
    }

    /// Transition a session's status, emitting `sessionStatusChanged`.
    pub fn update_status(&mut self, id: &SessionId, to: SessionStatus, bus: &EventBus) -> bool {
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };
        let from = session.status;
        if from == to {
            return true;
        }
        session.status = to;
        bus.emit(&MatchEvent::SessionStatusChanged {
            session_id: id.clone(),
            from,
            to,
        });
        true
    }

    /// Remove a session, emitting `sessionRemoved`. Idempotent.
    pub fn remove(
        &mut self,
        id: &SessionId,
        reason: RemovalReason,
        bus: &EventBus,
    ) -> Option<ClientSession> {
        let removed = self.sessions.remove(id)?;
        debug!(session_id = %id, ?reason, "session removed");
        bus.emit(&MatchEvent::SessionRemoved {
            session_id: id.clone(),
            reason,
        });
        Some(removed)
    }

    /// Sessions currently in `status`.
    #[must_use]
    pub fn by_status(&self, status: SessionStatus) -> Vec<ClientSession> {
        self.sessions
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect()
    }

    /// Sessions carrying the given client label.
    #[must_use]
    pub fn by_client(&self, client_id: &str) -> Vec<ClientSession> {
        self.sessions
            .values()
            .filter(|s| s.client_id.as_deref() == Some(client_id))
            .cloned()
            .collect()
    }

    /// Sessions idle longer than `timeout_ms` at `now_ms`.
    #[must_use]
    pub fn expired_snapshot(&self, now_ms: u64, timeout_ms: u64) -> Vec<ClientSession> {
        self.sessions
            .values()
            .filter(|s| now_ms.saturating_sub(s.last_activity_ms) > timeout_ms)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> SessionStoreStats {
        let mut stats = SessionStoreStats {
            total: self.sessions.len(),
            ..Default::default()
        };
        for session in self.sessions.values() {
            match session.status {
                SessionStatus::Queued => stats.queued += 1,
                SessionStatus::Connected => stats.connected += 1,
                SessionStatus::Disconnected => stats.disconnected += 1,
                SessionStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }
}
