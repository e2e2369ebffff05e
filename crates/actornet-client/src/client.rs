use actornet_common::transport::{Agent, TcpClient, TcpClientOptions, TcpConn};
use actornet_common::{
    ActornetError, JsonProcessor, LocalService, Processor, Result, RpcRequest, RpcResponse, Seq,
};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

use crate::call::{
    boxed_callback, Call, CallHandle, Completion, Delivery, PendingCall, PendingEntry,
};
use crate::dispatcher::CallbackDispatcher;

/// Reason attached to calls flushed by a disconnect.
const DISCONNECTED: &str = "node is disconnected";
const NO_LOCAL_SERVICE: &str = "no local service bound";
const CLIENT_DROPPED: &str = "client dropped";

/// Returns true for addresses served in-process.
///
/// Any address that begins with `localhost` is local; `127.0.0.1` and other
/// loopback literals still go through the network.
pub fn is_local_addr(addr: &str) -> bool {
    addr.starts_with("localhost")
}

/// Client side of one node-to-node link.
///
/// Calls are multiplexed over a single auto-reconnecting connection and
/// matched to responses purely by sequence number, so any number of calls may
/// be in flight at once. Cloning is cheap and every clone shares the same
/// connection and pending table.
///
/// # Example
///
/// ```no_run
/// use actornet_client::RpcClient;
///
/// # async fn example() -> actornet_common::Result<()> {
/// let client = RpcClient::default();
/// client.connect("127.0.0.1:3563").await?;
///
/// let sum: Option<i64> = client.call("Math.Add", &(1, 2)).await?;
/// assert_eq!(sum, Some(3));
/// # Ok(())
/// # }
/// ```
pub struct RpcClient<P: Processor = JsonProcessor> {
    inner: Arc<ClientInner<P>>,
}

impl<P: Processor> Clone for RpcClient<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct ClientInner<P> {
    processor: P,
    options: RwLock<TcpClientOptions>,
    local: AtomicBool,
    local_service: RwLock<Option<Arc<dyn LocalService>>>,
    conn: RwLock<Option<Arc<TcpConn>>>,
    pending: Mutex<PendingTable<P>>,
    transport: tokio::sync::Mutex<Option<TcpClient>>,
}

struct PendingTable<P> {
    /// Last sequence number handed out
    start_seq: Seq,
    calls: HashMap<Seq, Box<dyn PendingEntry<P>>>,
}

impl Default for RpcClient<JsonProcessor> {
    fn default() -> Self {
        Self::new(JsonProcessor)
    }
}

impl<P: Processor> RpcClient<P> {
    /// Creates a disconnected client using `processor` for every payload.
    pub fn new(processor: P) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                processor,
                options: RwLock::new(TcpClientOptions::default()),
                local: AtomicBool::new(false),
                local_service: RwLock::new(None),
                conn: RwLock::new(None),
                pending: Mutex::new(PendingTable {
                    start_seq: 0,
                    calls: HashMap::new(),
                }),
                transport: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Sets transport options used by the next [`connect`](Self::connect).
    ///
    /// The client always keeps exactly one connection and always reconnects,
    /// so `conn_num` and `auto_reconnect` are overridden.
    pub fn with_options(self, options: TcpClientOptions) -> Self {
        *self.inner.options.write() = options;
        self
    }

    /// Binds the in-process service used when connected to a local address.
    pub fn with_local_service(self, service: Arc<dyn LocalService>) -> Self {
        *self.inner.local_service.write() = Some(service);
        self
    }

    /// Points the client at `addr`.
    ///
    /// Any previous transport is closed and every call still pending on it
    /// fails with [`ActornetError::Disconnected`]. A local address (see
    /// [`is_local_addr`]) switches to the in-process fast path. Otherwise a
    /// background dialer is started; this returns before the connection is
    /// established.
    pub async fn connect(&self, addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(ActornetError::InvalidConfig("empty address".to_string()));
        }

        let mut transport = self.inner.transport.lock().await;
        if let Some(old) = transport.take() {
            old.close().await;
        }
        *self.inner.conn.write() = None;
        self.inner.flush_pending(DISCONNECTED).await;

        if is_local_addr(addr) {
            self.inner.local.store(true, Ordering::Release);
            tracing::debug!(addr, "using local fast path");
            return Ok(());
        }
        self.inner.local.store(false, Ordering::Release);

        let options = self
            .inner
            .options
            .read()
            .clone()
            .with_conn_num(1)
            .with_auto_reconnect(true);

        let client = Arc::downgrade(&self.inner);
        *transport = Some(TcpClient::start(addr, options, move |conn| ClientAgent {
            client: client.clone(),
            conn,
        }));

        tracing::debug!(addr, "rpc client connecting");
        Ok(())
    }

    /// Sends a call and returns a handle to wait on.
    ///
    /// With `no_reply` the request is sent without a pending entry and the
    /// returned handle is already complete. Local failures (serialization,
    /// no connection, write errors) also complete the handle immediately;
    /// check [`CallHandle::err`] or wait with [`CallHandle::done`].
    ///
    /// # Arguments
    ///
    /// * `no_reply` - The remote side will not answer
    /// * `service_method` - Target in `"Service.Method"` form
    /// * `args` - Call arguments, serialized with the client's processor
    pub async fn go<A, R>(&self, no_reply: bool, service_method: &str, args: &A) -> CallHandle<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let in_param = self.inner.processor.marshal(args);

        if self.is_local() {
            let seq = self.inner.next_seq();
            let call = Call::new(seq, service_method, Bytes::new());
            let in_param = match in_param {
                Ok(in_param) => in_param,
                Err(e) => return CallHandle::ready(call.failed(e)),
            };
            let call = Call {
                arg: Bytes::from(in_param.clone()),
                ..call
            };
            return CallHandle::ready(self.inner.call_local(call, in_param, no_reply).await);
        }

        let (sender, receiver) = oneshot::channel();
        let seq = self.inner.register(
            no_reply,
            service_method,
            in_param.as_deref().map(Bytes::copy_from_slice).unwrap_or_default(),
            Completion::Wait(sender),
        );

        let sent = match in_param {
            Ok(in_param) => self.inner.send(seq, no_reply, service_method, in_param).await,
            Err(e) => Err(e),
        };

        match sent {
            Ok(()) if no_reply => CallHandle::ready(Call::new(seq, service_method, Bytes::new())),
            Ok(()) => CallHandle::pending(seq, service_method, receiver),
            Err(e) if no_reply => {
                CallHandle::ready(Call::new(seq, service_method, Bytes::new()).failed(e))
            }
            Err(e) => match self.inner.unregister(seq) {
                Some(_) => {
                    CallHandle::ready(Call::new(seq, service_method, Bytes::new()).failed(e))
                }
                // A disconnect flush already completed it.
                None => CallHandle::pending(seq, service_method, receiver),
            },
        }
    }

    /// Sends a call whose result is handed to `callback` on `dispatcher`.
    ///
    /// Returns an error, without ever invoking `callback`, when the call
    /// could not be sent. Once this returns `Ok`, `callback` runs exactly
    /// once: with the reply, a remote error, or a disconnect error.
    pub async fn async_go<A, R, F, Fut>(
        &self,
        dispatcher: &CallbackDispatcher,
        service_method: &str,
        args: &A,
        callback: F,
    ) -> Result<()>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
        F: FnOnce(Call<R>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback = boxed_callback(callback);
        let in_param = self.inner.processor.marshal(args)?;

        if self.is_local() {
            if self.inner.local_service.read().is_none() {
                return Err(ActornetError::Disconnected(NO_LOCAL_SERVICE.to_string()));
            }
            let seq = self.inner.next_seq();
            let call = Call::new(seq, service_method, Bytes::from(in_param.clone()));
            let call = self.inner.call_local(call, in_param, false).await;
            Delivery::Dispatch {
                dispatcher: dispatcher.clone(),
                job: callback(call),
            }
            .deliver()
            .await;
            return Ok(());
        }

        let seq = self.inner.register(
            false,
            service_method,
            Bytes::from(in_param.clone()),
            Completion::Callback {
                callback,
                dispatcher: dispatcher.clone(),
            },
        );

        match self.inner.send(seq, false, service_method, in_param).await {
            Ok(()) => Ok(()),
            Err(e) => match self.inner.unregister(seq) {
                Some(_) => Err(e),
                None => Ok(()),
            },
        }
    }

    /// Sends a call and waits for its reply.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<Option<R>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.go(false, service_method, args).await.done().await.into_result()
    }

    /// True only while a live connection is attached.
    pub fn is_connected(&self) -> bool {
        self.inner
            .conn
            .read()
            .as_ref()
            .is_some_and(|conn| conn.is_connected())
    }

    pub fn is_local(&self) -> bool {
        self.inner.local.load(Ordering::Acquire)
    }

    /// Calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().calls.len()
    }

    /// Stops the transport and fails every pending call.
    pub async fn close(&self) {
        let mut transport = self.inner.transport.lock().await;
        if let Some(old) = transport.take() {
            old.close().await;
        }
        *self.inner.conn.write() = None;
        self.inner.flush_pending(DISCONNECTED).await;
    }
}

impl<P: Processor> ClientInner<P> {
    fn next_seq(&self) -> Seq {
        let mut pending = self.pending.lock();
        pending.start_seq += 1;
        pending.start_seq
    }

    /// Assigns the next sequence number and, unless `no_reply`, records the
    /// call under the same lock.
    fn register<R>(&self, no_reply: bool, service_method: &str, arg: Bytes, completion: Completion<R>) -> Seq
    where
        R: DeserializeOwned + Send + 'static,
    {
        let mut pending = self.pending.lock();
        pending.start_seq += 1;
        let seq = pending.start_seq;

        if !no_reply {
            let entry = PendingCall {
                call: Call::new(seq, service_method, arg),
                completion,
            };
            pending.calls.insert(seq, Box::new(entry));
        }
        seq
    }

    fn unregister(&self, seq: Seq) -> Option<Box<dyn PendingEntry<P>>> {
        self.pending.lock().calls.remove(&seq)
    }

    async fn send(&self, seq: Seq, no_reply: bool, service_method: &str, in_param: Vec<u8>) -> Result<()> {
        let request = RpcRequest::new(seq, service_method, in_param).with_no_reply(no_reply);
        let payload = self.processor.marshal(&request)?;

        let conn = self
            .conn
            .read()
            .clone()
            .ok_or_else(|| ActornetError::Disconnected(DISCONNECTED.to_string()))?;
        conn.write_msg(&payload).await
    }

    /// Runs a call against the bound local service.
    async fn call_local<R>(&self, call: Call<R>, in_param: Vec<u8>, no_reply: bool) -> Call<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let service = self.local_service.read().clone();
        let Some(service) = service else {
            return call.failed(ActornetError::Disconnected(NO_LOCAL_SERVICE.to_string()));
        };

        let result = service.call_local(&call.service_method, in_param);
        if no_reply {
            tokio::spawn(async move {
                if let Err(e) = result.await {
                    tracing::debug!(error = %e, "local no-reply call failed");
                }
            });
            return call;
        }

        let response = match result.await {
            Ok(reply) => RpcResponse::success(call.seq, reply),
            Err(err) => RpcResponse::error(call.seq, err),
        };
        call.complete(&self.processor, response)
    }

    async fn handle_response(&self, frame: &[u8]) {
        let response: RpcResponse = match self.processor.unmarshal(frame) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "failed to decode response");
                return;
            }
        };

        let entry = self.pending.lock().calls.remove(&response.seq);
        let Some(entry) = entry else {
            let err = ActornetError::Protocol(format!("response for unknown seq {}", response.seq));
            tracing::warn!(error = %err, "dropping response");
            return;
        };

        entry.resolve(&self.processor, response).deliver().await;
    }

    /// Fails every pending call with a disconnect error.
    async fn flush_pending(&self, reason: &str) {
        let mut entries: Vec<Box<dyn PendingEntry<P>>> = {
            let mut pending = self.pending.lock();
            pending.calls.drain().map(|(_, entry)| entry).collect()
        };
        if entries.is_empty() {
            return;
        }

        tracing::debug!(count = entries.len(), reason, "flushing pending calls");
        entries.sort_by_key(|entry| entry.seq());
        for entry in entries {
            entry
                .fail(ActornetError::Disconnected(reason.to_string()))
                .deliver()
                .await;
        }
    }
}

impl<P> Drop for ClientInner<P> {
    /// Fails whatever is still pending so every callback runs once.
    fn drop(&mut self) {
        let mut entries: Vec<Box<dyn PendingEntry<P>>> =
            self.pending.get_mut().calls.drain().map(|(_, entry)| entry).collect();
        if entries.is_empty() {
            return;
        }

        tracing::debug!(count = entries.len(), "client dropped with pending calls");
        entries.sort_by_key(|entry| entry.seq());
        for entry in entries {
            entry
                .fail(ActornetError::Disconnected(CLIENT_DROPPED.to_string()))
                .deliver_detached();
        }
    }
}

/// Read side of the client's connection.
///
/// Holds only a weak reference so dropping the last [`RpcClient`] tears the
/// transport down.
struct ClientAgent<P> {
    client: Weak<ClientInner<P>>,
    conn: Arc<TcpConn>,
}

impl<P: Processor> Agent for ClientAgent<P> {
    async fn run(&mut self) {
        match self.client.upgrade() {
            Some(client) => *client.conn.write() = Some(self.conn.clone()),
            None => return,
        }
        tracing::debug!(addr = %self.conn.remote_addr(), "rpc client connected");

        loop {
            let frame = match self.conn.read_msg().await {
                Ok(frame) => frame,
                Err(e) => {
                    if !e.is_disconnect() {
                        tracing::debug!(addr = %self.conn.remote_addr(), error = %e, "read loop stopped");
                    }
                    return;
                }
            };

            let Some(client) = self.client.upgrade() else {
                return;
            };
            client.handle_response(&frame).await;
        }
    }

    async fn on_close(&mut self) {
        let Some(client) = self.client.upgrade() else {
            return;
        };

        {
            let mut conn = client.conn.write();
            if conn.as_ref().is_some_and(|c| Arc::ptr_eq(c, &self.conn)) {
                *conn = None;
            }
        }
        client.flush_pending(DISCONNECTED).await;
    }
}
