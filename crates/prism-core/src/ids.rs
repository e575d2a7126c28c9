//! Matchmaker identifiers.
//!
//! Nodes, sessions and connections each get their own key type so the node
//! registry, the session store and the connection binding map cannot be
//! indexed with the wrong kind of ID. The wrappers stay deliberately thin:
//! string view, `Display`, conversions from raw text, and serde passthrough.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Borrow the raw identifier text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

string_id!(NodeId, "Key for a registered stream node.");
string_id!(SessionId, "Key for a client session.");

impl NodeId {
    /// Mint a fresh node ID. UUIDv7 keeps registry entries roughly
    /// time-ordered when they show up in logs.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionId {
    /// Mint a session ID of the form `session_<millis>_<9 base36 chars>`.
    ///
    /// The timestamp makes IDs roughly sortable; the random suffix separates
    /// sessions created within the same millisecond.
    #[must_use]
    pub fn generate(now_ms: u64) -> Self {
        Self(format!("session_{now_ms}_{}", base36_suffix(9)))
    }
}

fn base36_suffix(len: usize) -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Opaque connection handle assigned at accept time.
///
/// The engine correlates transport-level disconnects through this handle and
/// never holds a reference to the socket itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(u64);

impl ConnId {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}
