//! actornet RPC client
//!
//! Multiplexes calls to a remote node over one auto-reconnecting connection.
//!
//! - **[`RpcClient`]**: sequence numbering, pending-call table, read loop and
//!   disconnect flush
//! - **[`CallHandle`]** / **[`Call`]**: synchronous-style completion
//! - **[`CallbackDispatcher`]**: bounded executor for callback-style calls

pub mod call;
pub mod client;
pub mod dispatcher;

pub use call::{Call, CallHandle};
pub use client::{is_local_addr, RpcClient};
pub use dispatcher::{CallbackDispatcher, DEFAULT_CALLBACK_QUEUE_DEPTH};
