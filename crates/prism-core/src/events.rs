//! Typed notification bus.
//!
//! The engine publishes [`MatchEvent`]s synchronously with the mutation that
//! produced them, so a subscriber always observes a consistent post-mutation
//! snapshot. Subscribers run in-process and in subscription order; a panic in
//! one subscriber is caught and logged, never propagated back into the
//! engine. Subscribers must not re-enter the engine — edge adapters forward
//! events into their own channels and do real work on their own tasks.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ids::{NodeId, SessionId};
use crate::model::{ClientSession, SessionStatus, StreamNode};

/// Health level of a named check. Ordering: `Healthy < Degraded < Unhealthy`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Why a session was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalReason {
    /// Explicit removal by the client or an edge adapter.
    Explicit,
    /// Idle longer than the session timeout; removed by the sweep.
    Expired,
}

/// Events published by the engine, session store and health supervisor.
///
/// Payloads are owned snapshots cloned under the engine lock — never
/// references into live engine state.
#[derive(Clone, Debug)]
pub enum MatchEvent {
    NodeRegistered {
        node: StreamNode,
    },
    NodeUpdated {
        node: StreamNode,
    },
    NodeUnregistered {
        node_id: NodeId,
    },
    SessionCreated {
        session: ClientSession,
    },
    SessionQueued {
        session: ClientSession,
        /// 1-based position at insert time.
        position: usize,
    },
    SessionAssigned {
        session: ClientSession,
        node: StreamNode,
    },
    SessionStatusChanged {
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },
    SessionRemoved {
        session_id: SessionId,
        reason: RemovalReason,
    },
    /// One per session sweep, carrying the number of sessions removed.
    SweepCompleted {
        removed: usize,
    },
    HealthChanged {
        check: String,
        from: HealthStatus,
        to: HealthStatus,
    },
    ServiceUnhealthy {
        check: String,
    },
    RecoveryOk {
        check: String,
    },
    RecoveryFail {
        check: String,
    },
}

impl MatchEvent {
    /// Stable kind string for logging and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NodeRegistered { .. } => "nodeRegistered",
            Self::NodeUpdated { .. } => "nodeUpdated",
            Self::NodeUnregistered { .. } => "nodeUnregistered",
            Self::SessionCreated { .. } => "sessionCreated",
            Self::SessionQueued { .. } => "sessionQueued",
            Self::SessionAssigned { .. } => "sessionAssigned",
            Self::SessionStatusChanged { .. } => "sessionStatusChanged",
            Self::SessionRemoved { .. } => "sessionRemoved",
            Self::SweepCompleted { .. } => "sweepCompleted",
            Self::HealthChanged { .. } => "healthChanged",
            Self::ServiceUnhealthy { .. } => "serviceUnhealthy",
            Self::RecoveryOk { .. } => "recoveryOk",
            Self::RecoveryFail { .. } => "recoveryFail",
        }
    }
}

type Subscriber = Arc<dyn Fn(&MatchEvent) + Send + Sync>;

/// In-process fan-out of [`MatchEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Subscribers live for the process lifetime and
    /// are invoked in registration order.
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&MatchEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Arc::new(f));
    }

    /// Deliver an event to every subscriber, isolating panics.
    pub fn emit(&self, event: &MatchEvent) {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| (**subscriber)(event)));
            if result.is_err() {
                warn!(event = event.kind(), "event subscriber panicked");
            }
        }
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn sample_event() -> MatchEvent {
        MatchEvent::NodeUnregistered {
            node_id: NodeId::from("n1"),
        }
    }

    #[test]
    fn emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe(move |_| {
                let _ = count.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.emit(&sample_event());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn emit_with_no_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.emit(&sample_event());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_panic_does_not_propagate() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicUsize::new(0));
        bus.subscribe(|_| panic!("boom"));
        {
            let reached = reached.clone();
            bus.subscribe(move |_| {
                let _ = reached.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.emit(&sample_event());
        // The subscriber after the panicking one still runs.
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribers_observe_events_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            bus.subscribe(move |e| seen.lock().unwrap().push(e.kind()));
        }
        bus.emit(&MatchEvent::SweepCompleted { removed: 0 });
        bus.emit(&sample_event());
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["sweepCompleted", "nodeUnregistered"]
        );
    }

    #[test]
    fn event_kinds_are_stable() {
        assert_eq!(sample_event().kind(), "nodeUnregistered");
        assert_eq!(
            MatchEvent::HealthChanged {
                check: "c".into(),
                from: HealthStatus::Healthy,
                to: HealthStatus::Degraded,
            }
            .kind(),
            "healthChanged"
        );
        assert_eq!(
            MatchEvent::RecoveryOk { check: "c".into() }.kind(),
            "recoveryOk"
        );
    }

    #[test]
    fn health_status_ordering_worst_last() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Unhealthy);
    }

    #[test]
    fn health_status_serde() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn removal_reason_serde() {
        assert_eq!(
            serde_json::to_string(&RemovalReason::Expired).unwrap(),
            "\"expired\""
        );
    }

    #[test]
    fn bus_clones_share_subscribers() {
        let bus = EventBus::new();
        let clone = bus.clone();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            clone.subscribe(move |_| {
                let _ = count.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.emit(&sample_event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
