//! # prism-core
//!
//! Shared core types for the prism matchmaker: branded identifiers, the
//! monotonic clock abstraction, and the typed notification bus that couples
//! the engine to its edge adapters.

#![deny(unsafe_code)]

pub mod clock;
pub mod events;
pub mod ids;
pub mod model;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{EventBus, HealthStatus, MatchEvent, RemovalReason};
pub use ids::{ConnId, NodeId, SessionId};
pub use model::{
    sanitize_client_id, ClientSession, NodeAnnounce, QueuePosition, SessionStatus, StreamNode,
};
