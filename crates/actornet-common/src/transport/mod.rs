//! actornet transport layer
//!
//! # Components
//!
//! - **[`MsgParser`]** / **[`FrameDecoder`]**: length-prefixed framing
//! - **[`TcpConn`]**: one framed socket with a bounded outbound queue and
//!   read/write deadlines
//! - **[`Agent`]**: per-connection behaviour (`run`, then `on_close`)
//! - **[`TcpServer`]**: accept loop with a connection ceiling and graceful drain
//! - **[`TcpClient`]**: dialer with retry and auto-reconnect
//!
//! # Lifecycle
//!
//! For every connection, on both sides: the agent's `run` is driven until it
//! returns, then the connection is closed, removed from the live set, and
//! `on_close` is called. Exactly once, in that order.

pub mod agent;
pub mod config;
pub mod conn;
pub mod framer;
pub mod tcp_client;
pub mod tcp_server;

pub use agent::{panic_message, Agent};
pub use config::TransportConfig;
pub use conn::TcpConn;
pub use framer::{FrameDecoder, FrameError, MsgParser};
pub use tcp_client::{TcpClient, TcpClientOptions};
pub use tcp_server::{ServerState, TcpServer};
