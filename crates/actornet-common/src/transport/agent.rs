use futures_util::FutureExt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::conn::TcpConn;

/// Per-connection behaviour plugged into [`TcpServer`](super::TcpServer) and
/// [`TcpClient`](super::TcpClient).
///
/// `run` normally loops on [`TcpConn::read_msg`] and returns when the
/// connection fails. After it returns, for any reason, the owner closes the
/// connection, deregisters it and then calls `on_close` exactly once.
pub trait Agent: Send + 'static {
    fn run(&mut self) -> impl Future<Output = ()> + Send;

    fn on_close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Drives one agent through its lifecycle.
///
/// A panic inside `run` is logged and treated as a normal return; the
/// connection is still closed and `on_close` still runs.
pub(crate) async fn drive<A, F>(mut agent: A, conn: Arc<TcpConn>, deregister: F)
where
    A: Agent,
    F: FnOnce() + Send,
{
    let addr: SocketAddr = conn.remote_addr();

    if let Err(panic) = AssertUnwindSafe(agent.run()).catch_unwind().await {
        tracing::error!(%addr, panic = %panic_message(&*panic), "agent panicked");
    }

    conn.close();
    deregister();

    if let Err(panic) = AssertUnwindSafe(agent.on_close()).catch_unwind().await {
        tracing::error!(%addr, panic = %panic_message(&*panic), "agent on_close panicked");
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
