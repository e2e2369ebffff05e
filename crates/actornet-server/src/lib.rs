//! actornet Server
//!
//! This crate provides the answering side of an actornet link: a registry of
//! typed service methods, the per-connection agent that executes requests,
//! and [`Node`], which puts both behind a TCP server.

pub mod agent;
pub mod node;
pub mod registry;

pub use agent::ServerAgent;
pub use node::Node;
pub use registry::ServiceRegistry;
