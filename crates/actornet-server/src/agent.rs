use actornet_common::transport::{panic_message, Agent, FrameError, TcpConn};
use actornet_common::{ActornetError, Processor, RpcError, RpcRequest, RpcResponse};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::registry::ServiceRegistry;

/// Serves one accepted connection.
///
/// Each decoded request runs on its own task, so slow methods never hold up
/// the read loop and responses go out in completion order. Requests flagged
/// `no_reply` are executed but never answered.
pub struct ServerAgent<P: Processor> {
    conn: Arc<TcpConn>,
    registry: Arc<ServiceRegistry<P>>,
    connections: Arc<AtomicUsize>,
}

impl<P: Processor> ServerAgent<P> {
    /// Wraps `conn`, counting it in `connections` until `on_close`.
    pub fn new(conn: Arc<TcpConn>, registry: Arc<ServiceRegistry<P>>, connections: Arc<AtomicUsize>) -> Self {
        connections.fetch_add(1, Ordering::Relaxed);
        Self {
            conn,
            registry,
            connections,
        }
    }
}

impl<P: Processor> Agent for ServerAgent<P> {
    async fn run(&mut self) {
        let addr = self.conn.remote_addr();
        tracing::debug!(%addr, "serving connection");

        loop {
            let frame = match self.conn.read_msg().await {
                Ok(frame) => frame,
                Err(e) => {
                    if !e.is_disconnect() {
                        tracing::debug!(%addr, error = %e, "connection read failed");
                    }
                    return;
                }
            };

            let request: RpcRequest = match self.registry.processor().unmarshal(&frame) {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!(%addr, error = %e, "failed to decode request");
                    continue;
                }
            };

            tokio::spawn(serve(self.conn.clone(), self.registry.clone(), request));
        }
    }

    async fn on_close(&mut self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(addr = %self.conn.remote_addr(), "connection closed");
    }
}

async fn serve<P: Processor>(conn: Arc<TcpConn>, registry: Arc<ServiceRegistry<P>>, request: RpcRequest) {
    let RpcRequest {
        seq,
        service_method,
        no_reply,
        in_param,
    } = request;

    let result = match AssertUnwindSafe(registry.call(&service_method, in_param))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            tracing::error!(seq, %service_method, panic = %panic_message(&*panic), "handler panicked");
            Err(RpcError::new("internal error"))
        }
    };

    if no_reply {
        if let Err(e) = result {
            tracing::debug!(seq, %service_method, error = %e, "no-reply call failed");
        }
        return;
    }

    let response = match result {
        Ok(reply) => RpcResponse::success(seq, reply),
        Err(err) => RpcResponse::error(seq, err),
    };

    match write_response(&conn, registry.processor(), &response).await {
        Ok(()) => {}
        Err(ActornetError::Frame(FrameError::TooLarge { len, max })) => {
            tracing::warn!(seq, %service_method, len, max, "reply too large");
            let response = RpcResponse::error(
                seq,
                format!("reply too large: {} bytes (max {})", len, max),
            );
            if let Err(e) = write_response(&conn, registry.processor(), &response).await {
                tracing::debug!(seq, error = %e, "failed to send response");
            }
        }
        Err(e) => tracing::debug!(seq, error = %e, "failed to send response"),
    }
}

async fn write_response<P: Processor>(
    conn: &TcpConn,
    processor: &P,
    response: &RpcResponse,
) -> actornet_common::Result<()> {
    let payload = processor.marshal(response)?;
    conn.write_msg(&payload).await
}
