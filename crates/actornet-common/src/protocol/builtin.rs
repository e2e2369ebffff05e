//! Built-in node service payloads
//!
//! Every node registers these services next to the user's own ones. The
//! types here are the single source of truth for their wire shape.

use serde::{Deserialize, Serialize};

// ============================================================================
// Service names
// ============================================================================

/// Liveness probe; replies with [`PING_REPLY`].
pub const PING: &str = "Node.Ping";

/// Node description; replies with [`NodeInfo`].
pub const INFO: &str = "Node.Info";

pub const PING_REPLY: &str = "pong";

// ============================================================================
// Info Response
// ============================================================================

/// Reply of the `Node.Info` service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Version string from Cargo.toml
    pub version: String,
    /// Milliseconds since the node started listening
    pub uptime_ms: u64,
    /// Live connections at the time of the call
    pub connections: usize,
}

impl NodeInfo {
    pub fn new(uptime_ms: u64, connections: usize) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms,
            connections,
        }
    }
}
