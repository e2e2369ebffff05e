use parking_lot::Mutex;
use socket2::SockRef;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::agent::{drive, Agent};
use super::config::TransportConfig;
use super::conn::TcpConn;
use super::framer::MsgParser;
use crate::protocol::error::{ActornetError, Result};

/// First backoff after a transient accept error.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
/// Longest backoff between accept retries.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Lifecycle of a [`TcpServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    Draining,
    Stopped,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Listening,
            1 => ServerState::Draining,
            _ => ServerState::Stopped,
        }
    }
}

type ConnSet = Arc<Mutex<HashMap<u64, Arc<TcpConn>>>>;

/// Accepting side of the transport.
///
/// Every accepted socket is wrapped in a [`TcpConn`] and handed to a fresh
/// [`Agent`] built by the caller's factory. Once the number of live
/// connections reaches `max_conn_num`, new sockets are closed straight away.
///
/// # Example
///
/// ```no_run
/// use actornet_common::transport::{Agent, TcpConn, TcpServer, TransportConfig};
/// use std::sync::Arc;
///
/// struct Echo(Arc<TcpConn>);
///
/// impl Agent for Echo {
///     async fn run(&mut self) {
///         while let Ok(msg) = self.0.read_msg().await {
///             if self.0.write_msg(&msg).await.is_err() {
///                 break;
///             }
///         }
///     }
///
///     async fn on_close(&mut self) {}
/// }
///
/// # async fn example() -> actornet_common::Result<()> {
/// let server = TcpServer::start("127.0.0.1:0", TransportConfig::default(), Echo).await?;
/// println!("listening on {}", server.local_addr());
/// server.close().await;
/// # Ok(())
/// # }
/// ```
pub struct TcpServer {
    local_addr: SocketAddr,
    config: TransportConfig,
    conns: ConnSet,
    state: Arc<AtomicU8>,
    shutdown: CancellationToken,
    accept_loop: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    handlers: TaskTracker,
}

impl TcpServer {
    /// Binds `addr` and starts accepting.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to listen on (e.g., "0.0.0.0:3563")
    /// * `config` - Transport tuning; normalized before use
    /// * `new_agent` - Builds the agent for each accepted connection
    pub async fn start<T, F, A>(addr: T, config: TransportConfig, new_agent: F) -> Result<Self>
    where
        T: ToSocketAddrs,
        F: Fn(Arc<TcpConn>) -> A + Send + Sync + 'static,
        A: Agent,
    {
        let config = config.normalized();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ActornetError::Connection(format!("Failed to bind: {}", e)))?;
        let local_addr = listener.local_addr()?;

        let conns: ConnSet = Arc::new(Mutex::new(HashMap::new()));
        let state = Arc::new(AtomicU8::new(ServerState::Listening as u8));
        let shutdown = CancellationToken::new();
        let handlers = TaskTracker::new();

        let acceptor = Acceptor {
            listener,
            parser: MsgParser::from_config(&config),
            config: config.clone(),
            conns: conns.clone(),
            shutdown: shutdown.clone(),
            handlers: handlers.clone(),
            next_id: AtomicU64::new(0),
        };
        let accept_loop = tokio::spawn(acceptor.run(new_agent));

        tracing::info!(addr = %local_addr, "tcp server listening");

        Ok(Self {
            local_addr,
            config,
            conns,
            state,
            shutdown,
            accept_loop: tokio::sync::Mutex::new(Some(accept_loop)),
            handlers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live connections currently registered.
    pub fn connection_count(&self) -> usize {
        self.conns.lock().len()
    }

    /// Normalized configuration in effect.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Stops the server and drains every connection.
    ///
    /// Stops the listener and waits for the accept loop, closes every live
    /// connection, then waits until every handler (including `on_close`) has
    /// finished. Calling it again after completion returns immediately.
    pub async fn close(&self) {
        let mut accept_loop = self.accept_loop.lock().await;
        let Some(handle) = accept_loop.take() else {
            return;
        };

        self.state
            .store(ServerState::Draining as u8, Ordering::Release);
        self.shutdown.cancel();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "accept loop failed");
        }

        let conns: Vec<Arc<TcpConn>> = self.conns.lock().values().cloned().collect();
        for conn in conns {
            conn.close();
        }

        self.handlers.close();
        self.handlers.wait().await;

        self.state.store(ServerState::Stopped as u8, Ordering::Release);
        tracing::info!(addr = %self.local_addr, "tcp server stopped");
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Acceptor {
    listener: TcpListener,
    parser: MsgParser,
    config: TransportConfig,
    conns: ConnSet,
    shutdown: CancellationToken,
    handlers: TaskTracker,
    next_id: AtomicU64,
}

impl Acceptor {
    async fn run<F, A>(self, new_agent: F)
    where
        F: Fn(Arc<TcpConn>) -> A + Send + Sync + 'static,
        A: Agent,
    {
        let mut backoff: Option<Duration> = None;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(accepted) => {
                    backoff = None;
                    accepted
                }
                Err(e) if is_transient(&e) => {
                    let delay = match backoff {
                        None => ACCEPT_BACKOFF_MIN,
                        Some(d) => (d * 2).min(ACCEPT_BACKOFF_MAX),
                    };
                    backoff = Some(delay);
                    tracing::warn!(error = %e, retry_in = ?delay, "accept error");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed, stopping listener");
                    break;
                }
            };

            self.accept(stream, peer_addr, &new_agent);
        }
    }

    fn accept<F, A>(&self, stream: TcpStream, peer_addr: SocketAddr, new_agent: &F)
    where
        F: Fn(Arc<TcpConn>) -> A,
        A: Agent,
    {
        if let Err(e) = set_low_latency(&stream) {
            tracing::debug!(addr = %peer_addr, error = %e, "failed to set socket options");
        }

        let mut conns = self.conns.lock();
        if conns.len() >= self.config.max_conn_num {
            drop(conns);
            drop(stream);
            tracing::warn!(
                addr = %peer_addr,
                error = %ActornetError::CapacityExceeded(self.config.max_conn_num),
                "refusing connection"
            );
            return;
        }

        let conn = match TcpConn::new(stream, self.parser, &self.config) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(addr = %peer_addr, error = %e, "failed to wrap connection");
                return;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        conns.insert(id, conn.clone());
        drop(conns);

        tracing::debug!(addr = %peer_addr, "connection accepted");

        let agent = new_agent(conn.clone());
        let registry = self.conns.clone();
        self.handlers.spawn(drive(agent, conn, move || {
            registry.lock().remove(&id);
        }));
    }
}

/// Disables linger and Nagle's algorithm on an accepted socket.
pub(crate) fn set_low_latency(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_linger(Some(Duration::ZERO))
}

fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    if matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | Interrupted | WouldBlock | TimedOut
    ) {
        return true;
    }
    // EMFILE / ENFILE: out of file descriptors, may clear once peers go away.
    matches!(e.raw_os_error(), Some(23) | Some(24))
}
