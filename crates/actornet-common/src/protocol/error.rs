use thiserror::Error;

use super::responses::RpcError;
use crate::transport::framer::FrameError;

/// Broad class of an [`ActornetError`].
///
/// The class decides how far a failure spreads: connection errors tear down
/// the connection, protocol errors are either fatal to the connection (bad
/// frame) or tolerated (unknown sequence number), call errors stay scoped to
/// one call, and capacity errors only affect the refused peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Protocol,
    Call,
    Capacity,
    Config,
}

#[derive(Error, Debug)]
pub enum ActornetError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error: {0}")]
    Remote(RpcError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Callback dispatcher closed")]
    DispatcherClosed,

    #[error("Too many connections (max {0})")]
    CapacityExceeded(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ActornetError {
    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActornetError::Connection(_)
            | ActornetError::ConnectionClosed
            | ActornetError::Disconnected(_)
            | ActornetError::Timeout(_)
            | ActornetError::Io(_) => ErrorKind::Connection,
            ActornetError::Frame(_) | ActornetError::Protocol(_) => ErrorKind::Protocol,
            ActornetError::Remote(_)
            | ActornetError::Serialization(_)
            | ActornetError::JsonSerialization(_)
            | ActornetError::DispatcherClosed => ErrorKind::Call,
            ActornetError::CapacityExceeded(_) => ErrorKind::Capacity,
            ActornetError::InvalidConfig(_) => ErrorKind::Config,
        }
    }

    /// True for errors produced by a connection going away.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ActornetError::Disconnected(_) | ActornetError::ConnectionClosed
        )
    }
}

impl From<RpcError> for ActornetError {
    fn from(err: RpcError) -> Self {
        ActornetError::Remote(err)
    }
}

pub type Result<T> = std::result::Result<T, ActornetError>;
