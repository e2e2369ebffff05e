//! RPC response types
//!
//! A response is matched to its request purely by `seq`. The reply payload is
//! kept serialized; the client unmarshals it into the caller's reply type.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Seq;

/// Error reported by the remote side for a single call.
///
/// # Example
///
/// ```
/// use actornet_common::protocol::RpcError;
///
/// let err = RpcError::new("method not found: Math.Div");
/// assert_eq!(err.to_string(), "method not found: Math.Div");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub message: String,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        RpcError {
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RpcError {}

/// Response envelope written as one frame.
///
/// # Fields
///
/// - `seq`: sequence number of the request being answered
/// - `err`: remote application error, if the call failed
/// - `reply`: serialized return value, empty when there is none
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcResponse {
    pub seq: Seq,
    #[serde(default)]
    pub err: Option<RpcError>,
    #[serde(default, with = "super::base64_bytes")]
    pub reply: Vec<u8>,
}

impl RpcResponse {
    /// Creates a successful response carrying an already serialized reply.
    pub fn success(seq: Seq, reply: Vec<u8>) -> Self {
        RpcResponse {
            seq,
            err: None,
            reply,
        }
    }

    /// Creates an error response with an empty reply.
    pub fn error(seq: Seq, err: impl Into<RpcError>) -> Self {
        RpcResponse {
            seq,
            err: Some(err.into()),
            reply: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }
}

impl From<&str> for RpcError {
    fn from(message: &str) -> Self {
        RpcError::new(message)
    }
}

impl From<String> for RpcError {
    fn from(message: String) -> Self {
        RpcError::new(message)
    }
}
