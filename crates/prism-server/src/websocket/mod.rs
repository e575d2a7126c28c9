//! WebSocket surface: connection management, frame dispatch, broadcasting.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-connection state (session binding, send channel, liveness) |
//! | `broadcast` | Fan-out manager: session-scoped and global pushes |
//! | `handler` | Frame parsing, dispatch to the engine, reply framing |
//! | `heartbeat` | Liveness loop; times out silent clients |
//! | `session` | Full connection lifecycle from upgrade to disconnect |
//! | `event_bridge` | Engine events → WebSocket frames |

pub mod broadcast;
pub mod connection;
pub mod event_bridge;
pub mod handler;
pub mod heartbeat;
pub mod session;
