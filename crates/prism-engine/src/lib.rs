//! # prism-engine
//!
//! The matchmaker core: registry of stream nodes, priority wait queue,
//! session store, assignment policy, liveness sweeps and the health
//! supervisor.
//!
//! ## Concurrency model
//!
//! The engine and the session store are single-writer: every public
//! operation takes one `parking_lot::Mutex` for its full duration, and
//! events are emitted inside that critical section so subscribers observe a
//! consistent post-mutation snapshot. Reads (`stats`, snapshots) copy under
//! the same lock — raw references to engine state are never handed out.

#![deny(unsafe_code)]

pub mod engine;
pub mod health;
pub mod queue;
pub mod store;

pub use engine::{run_sweep_loop, EngineStats, Matchmaker, MatchmakerConfig, NodeTransition};
pub use health::{run_health_loop, CheckOutcome, HealthReport, HealthSupervisor};
pub use queue::PriorityQueue;
pub use store::{SessionStore, SessionStoreStats};
