//! # prism-wire
//!
//! The stream-node control protocol: a long-lived TCP connection per node,
//! one UTF-8 JSON object per inbound payload, no length prefix. Decoded
//! messages drive node state transitions in the engine; transport close or
//! error unregisters the bound node.

#![deny(unsafe_code)]

pub mod listener;
pub mod message;

pub use listener::NodeListener;
pub use message::{decode, NodeMessage, WireError};
