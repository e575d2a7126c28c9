//! # prism-server
//!
//! The matchmaker's edges: the client-facing HTTP API, the WebSocket
//! surface, configuration loading, graceful shutdown and metrics. The
//! engine itself lives in `prism-engine`; this crate translates engine
//! results to HTTP status codes and WebSocket frames.

#![deny(unsafe_code)]

pub mod config;
pub mod http;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{Config, ConfigError};
pub use server::{AppState, MatchmakerServer};
pub use shutdown::{ShutdownCoordinator, ShutdownPhase};
