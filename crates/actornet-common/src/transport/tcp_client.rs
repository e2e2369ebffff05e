use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::agent::{drive, Agent};
use super::config::TransportConfig;
use super::conn::TcpConn;
use super::framer::MsgParser;
use super::tcp_server::set_low_latency;

/// Default delay between dial attempts (2 seconds)
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_secs(2);
/// Default outbound queue depth for RPC client connections
pub const DEFAULT_CLIENT_PENDING_WRITE_NUM: usize = 10_000;

/// Dialing side options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpClientOptions {
    /// Number of parallel connections to keep
    pub conn_num: usize,
    /// Delay between failed dials and between reconnects
    pub connect_interval: Duration,
    /// Dial again after a connection ends
    pub auto_reconnect: bool,
    pub transport: TransportConfig,
}

impl Default for TcpClientOptions {
    fn default() -> Self {
        Self {
            conn_num: 1,
            connect_interval: DEFAULT_CONNECT_INTERVAL,
            auto_reconnect: true,
            transport: TransportConfig::default()
                .with_pending_write_num(DEFAULT_CLIENT_PENDING_WRITE_NUM),
        }
    }
}

impl TcpClientOptions {
    pub fn with_conn_num(mut self, conn_num: usize) -> Self {
        self.conn_num = conn_num;
        self
    }

    pub fn with_connect_interval(mut self, interval: Duration) -> Self {
        self.connect_interval = interval;
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    fn normalized(&self) -> Self {
        let mut options = self.clone();
        if options.conn_num == 0 {
            options.conn_num = 1;
            tracing::debug!(conn_num = options.conn_num, "invalid conn_num, reset");
        }
        if options.connect_interval.is_zero() {
            options.connect_interval = DEFAULT_CONNECT_INTERVAL;
            tracing::debug!(interval = ?options.connect_interval, "invalid connect_interval, reset");
        }
        options.transport = options.transport.normalized();
        options
    }
}

/// Dialing side of the transport.
///
/// Keeps `conn_num` connections to one address. Each connection is driven by
/// an [`Agent`] exactly like on the server: when `run` returns the connection
/// is closed, deregistered and `on_close` is called. With `auto_reconnect`
/// the slot then dials again after `connect_interval`.
pub struct TcpClient {
    addr: String,
    conns: Arc<Mutex<HashMap<u64, Arc<TcpConn>>>>,
    shutdown: CancellationToken,
    dialers: TaskTracker,
}

impl TcpClient {
    /// Starts dialing `addr` in the background.
    ///
    /// Never fails: unreachable peers are retried every `connect_interval`
    /// until [`close`](Self::close).
    pub fn start<F, A>(addr: impl Into<String>, options: TcpClientOptions, new_agent: F) -> Self
    where
        F: Fn(Arc<TcpConn>) -> A + Send + Sync + 'static,
        A: Agent,
    {
        let addr = addr.into();
        let options = options.normalized();
        let conns = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let dialers = TaskTracker::new();

        let dialer = Arc::new(Dialer {
            addr: addr.clone(),
            parser: MsgParser::from_config(&options.transport),
            options,
            conns: conns.clone(),
            shutdown: shutdown.clone(),
            next_id: AtomicU64::new(0),
            new_agent,
        });

        for _ in 0..dialer.options.conn_num {
            dialers.spawn(dialer.clone().run());
        }
        dialers.close();

        Self {
            addr,
            conns,
            shutdown,
            dialers,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connections currently established.
    pub fn connection_count(&self) -> usize {
        self.conns.lock().len()
    }

    /// Stops dialing, closes live connections and waits for every agent to
    /// finish.
    pub async fn close(&self) {
        self.shutdown.cancel();

        let conns: Vec<Arc<TcpConn>> = self.conns.lock().values().cloned().collect();
        for conn in conns {
            conn.close();
        }

        self.dialers.wait().await;
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for conn in self.conns.lock().values() {
            conn.close();
        }
    }
}

struct Dialer<F> {
    addr: String,
    parser: MsgParser,
    options: TcpClientOptions,
    conns: Arc<Mutex<HashMap<u64, Arc<TcpConn>>>>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
    new_agent: F,
}

impl<F, A> Dialer<F>
where
    F: Fn(Arc<TcpConn>) -> A + Send + Sync + 'static,
    A: Agent,
{
    async fn run(self: Arc<Self>) {
        loop {
            let Some(stream) = self.dial().await else {
                return;
            };

            let conn = match TcpConn::new(stream, self.parser, &self.options.transport) {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::debug!(addr = %self.addr, error = %e, "failed to wrap connection");
                    continue;
                }
            };

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.conns.lock().insert(id, conn.clone());
            if self.shutdown.is_cancelled() {
                conn.close();
            }

            tracing::debug!(addr = %self.addr, "connected");

            let agent = (self.new_agent)(conn.clone());
            let conns = self.conns.clone();
            drive(agent, conn, move || {
                conns.lock().remove(&id);
            })
            .await;

            if !self.options.auto_reconnect || self.shutdown.is_cancelled() {
                return;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.options.connect_interval) => {}
            }
        }
    }

    /// Dials until it succeeds or the client shuts down.
    async fn dial(&self) -> Option<TcpStream> {
        loop {
            let attempt = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                attempt = TcpStream::connect(self.addr.as_str()) => attempt,
            };

            match attempt {
                Ok(stream) => {
                    if let Err(e) = set_low_latency(&stream) {
                        tracing::debug!(addr = %self.addr, error = %e, "failed to set socket options");
                    }
                    return Some(stream);
                }
                Err(e) => {
                    tracing::info!(addr = %self.addr, error = %e, "connect failed, retrying");
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.options.connect_interval) => {}
            }
        }
    }
}
