//! actornet common types and transport
//!
//! This crate provides the wire protocol and the TCP transport shared by
//! every actornet node, both the side that accepts connections and the side
//! that dials them.
//!
//! # Overview
//!
//! - **Protocol Layer**: request/response envelopes, the pluggable payload
//!   [`Processor`], the error taxonomy and the built-in node services
//! - **Transport Layer**: length-prefixed framing, framed connections with a
//!   bounded outbound queue, and the TCP server/client that run one
//!   [`Agent`](transport::Agent) per connection
//!
//! # Wire Format
//!
//! ```text
//! [length prefix: 1, 2 or 4 bytes, big- or little-endian] [payload]
//! ```
//!
//! The payload is a serialized [`RpcRequest`] or [`RpcResponse`].
//!
//! # Example
//!
//! ```
//! use actornet_common::{JsonProcessor, Processor, RpcRequest, RpcResponse};
//!
//! let processor = JsonProcessor;
//! let request = RpcRequest::new(1, "Math.Add", processor.marshal(&(2, 3)).unwrap());
//!
//! let reply = processor.marshal(&5).unwrap();
//! let response = RpcResponse::success(request.seq, reply);
//! assert!(response.is_success());
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
