use actornet_common::builtin::{self, NodeInfo};
use actornet_common::transport::{ServerState, TcpServer, TransportConfig};
use actornet_common::{JsonProcessor, Processor, Result, RpcError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::ToSocketAddrs;

use crate::agent::ServerAgent;
use crate::registry::ServiceRegistry;

/// actornet node - a TCP server answering RPCs from a [`ServiceRegistry`].
///
/// Besides the caller's services, every node answers the built-in
/// `Node.Ping` and `Node.Info` methods.
///
/// # Example
///
/// ```no_run
/// use actornet_common::transport::TransportConfig;
/// use actornet_common::RpcError;
/// use actornet_server::{Node, ServiceRegistry};
/// use std::sync::Arc;
///
/// # async fn example() -> actornet_common::Result<()> {
/// let registry = Arc::new(ServiceRegistry::default());
/// registry.register("Math.Add", |(a, b): (i64, i64)| async move { Ok::<_, RpcError>(a + b) })?;
///
/// let node = Node::start("0.0.0.0:3563", TransportConfig::default(), registry).await?;
/// println!("node listening on {}", node.local_addr());
/// node.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Node<P: Processor = JsonProcessor> {
    server: TcpServer,
    registry: Arc<ServiceRegistry<P>>,
    started: Instant,
}

impl<P: Processor> Node<P> {
    /// Registers the built-in services and starts listening.
    ///
    /// Built-ins already present in `registry` are left as they are.
    ///
    /// # Arguments
    ///
    /// * `listen_addr` - Address to bind (e.g., "0.0.0.0:3563")
    /// * `config` - Transport tuning; normalized before use
    /// * `registry` - Services to expose
    pub async fn start<A: ToSocketAddrs>(
        listen_addr: A,
        config: TransportConfig,
        registry: Arc<ServiceRegistry<P>>,
    ) -> Result<Self> {
        let started = Instant::now();
        let connections = Arc::new(AtomicUsize::new(0));

        register_builtins(&registry, started, connections.clone())?;

        let server = {
            let registry = registry.clone();
            TcpServer::start(listen_addr, config, move |conn| {
                ServerAgent::new(conn, registry.clone(), connections.clone())
            })
            .await?
        };

        tracing::info!(addr = %server.local_addr(), methods = registry.methods().len(), "node started");

        Ok(Self {
            server,
            registry,
            started,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn connection_count(&self) -> usize {
        self.server.connection_count()
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry<P>> {
        &self.registry
    }

    /// Time since the node started.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn state(&self) -> ServerState {
        self.server.state()
    }

    /// Stops accepting and drains every connection.
    pub async fn close(&self) {
        self.server.close().await;
    }
}

fn register_builtins<P: Processor>(
    registry: &ServiceRegistry<P>,
    started: Instant,
    connections: Arc<AtomicUsize>,
) -> Result<()> {
    if !registry.contains(builtin::PING) {
        registry.register(builtin::PING, |_: ()| async {
            Ok::<_, RpcError>(builtin::PING_REPLY.to_string())
        })?;
    }

    if !registry.contains(builtin::INFO) {
        registry.register(builtin::INFO, move |_: ()| {
            let info = NodeInfo::new(
                started.elapsed().as_millis() as u64,
                connections.load(Ordering::Relaxed),
            );
            async move { Ok::<_, RpcError>(info) }
        })?;
    }

    Ok(())
}
