//! RPC Client Integration Tests
//!
//! These tests run the client against a scripted server built directly on
//! the transport layer. The server's behaviour is chosen by service method:
//!
//! - `Test.Echo`: replies with the arguments
//! - `Test.Batch`: buffers 10 requests, then answers them in reverse order
//! - `Test.Hang`: never answers
//! - `Test.Fail`: answers with a remote error
//! - `Test.Stray`: sends a response for an unknown seq, then the real one
//! - `Test.Garbage`: sends an undecodable frame, then the real response
//! - `Test.Notify`: counts the request and never answers
//! - `Test.Kill`: drops the connection

use actornet_client::{Call, CallbackDispatcher, RpcClient};
use actornet_common::transport::{Agent, TcpClientOptions, TcpConn, TcpServer, TransportConfig};
use actornet_common::{
    ActornetError, JsonProcessor, LocalService, Processor, RpcError, RpcRequest, RpcResponse,
};
use futures_util::future::{join_all, BoxFuture};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(5);
const BATCH: usize = 10;

// ============================================================================
// Scripted server
// ============================================================================

struct Scripted {
    conn: Arc<TcpConn>,
    batch: Vec<RpcRequest>,
    notified: Arc<AtomicUsize>,
}

impl Scripted {
    async fn respond(&self, response: RpcResponse) {
        let payload = JsonProcessor.marshal(&response).unwrap();
        let _ = self.conn.write_msg(&payload).await;
    }
}

impl Agent for Scripted {
    async fn run(&mut self) {
        while let Ok(frame) = self.conn.read_msg().await {
            let request: RpcRequest = JsonProcessor.unmarshal(&frame).unwrap();

            if request.no_reply {
                self.notified.fetch_add(1, Ordering::SeqCst);
                if request.service_method == "Test.Kill" {
                    return;
                }
                continue;
            }

            match request.service_method.as_str() {
                "Test.Echo" => {
                    self.respond(RpcResponse::success(request.seq, request.in_param))
                        .await
                }
                "Test.Batch" => {
                    self.batch.push(request);
                    if self.batch.len() == BATCH {
                        let batch = std::mem::take(&mut self.batch);
                        for request in batch.into_iter().rev() {
                            self.respond(RpcResponse::success(request.seq, request.in_param))
                                .await;
                        }
                    }
                }
                "Test.Fail" => self.respond(RpcResponse::error(request.seq, "boom")).await,
                "Test.Stray" => {
                    self.respond(RpcResponse::success(request.seq + 10_000, b"0".to_vec()))
                        .await;
                    self.respond(RpcResponse::success(request.seq, request.in_param))
                        .await;
                }
                "Test.Garbage" => {
                    let _ = self.conn.write_msg(b"not an envelope").await;
                    self.respond(RpcResponse::success(request.seq, request.in_param))
                        .await;
                }
                "Test.Hang" => {}
                other => {
                    self.respond(RpcResponse::error(
                        request.seq,
                        format!("method not found: {}", other),
                    ))
                    .await
                }
            }
        }
    }

    async fn on_close(&mut self) {}
}

struct TestServer {
    server: TcpServer,
    notified: Arc<AtomicUsize>,
}

impl TestServer {
    async fn start() -> Self {
        let notified = Arc::new(AtomicUsize::new(0));
        let server = {
            let notified = notified.clone();
            TcpServer::start("127.0.0.1:0", TransportConfig::default(), move |conn| Scripted {
                conn,
                batch: Vec::new(),
                notified: notified.clone(),
            })
            .await
            .unwrap()
        };
        Self { server, notified }
    }

    fn addr(&self) -> String {
        self.server.local_addr().to_string()
    }
}

fn fast_options() -> TcpClientOptions {
    TcpClientOptions::default().with_connect_interval(Duration::from_millis(20))
}

async fn connected_client(server: &TestServer) -> RpcClient {
    let client = RpcClient::default().with_options(fast_options());
    client.connect(&server.addr()).await.unwrap();
    wait_until(|| client.is_connected()).await;
    client
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Synchronous calls
// ============================================================================

#[tokio::test]
async fn test_call_round_trip() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let reply: Option<i64> = client.call("Test.Echo", &42).await.unwrap();
    assert_eq!(reply, Some(42));
    assert_eq!(client.pending_count(), 0);

    client.close().await;
    server.server.close().await;
}

#[tokio::test]
async fn test_large_argument_fits_default_limits() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let arg = "x".repeat(40_000);
    let reply: Option<String> = client.call("Test.Echo", &arg).await.unwrap();
    assert_eq!(reply.as_deref(), Some(arg.as_str()));

    client.close().await;
    server.server.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reverse_order_responses_pair_by_seq() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut handles = Vec::new();
    for i in 0..BATCH as i64 {
        handles.push(client.go::<_, i64>(false, "Test.Batch", &i).await);
    }

    let calls = tokio::time::timeout(WAIT, join_all(handles.into_iter().map(|h| h.done())))
        .await
        .unwrap();

    for (i, call) in calls.into_iter().enumerate() {
        assert!(call.err.is_none(), "call {} failed: {:?}", i, call.err);
        assert_eq!(call.reply, Some(i as i64));
    }

    client.close().await;
    server.server.close().await;
}

#[tokio::test]
async fn test_remote_error() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let err = client.call::<_, i64>("Test.Fail", &1).await.unwrap_err();
    assert!(matches!(err, ActornetError::Remote(RpcError { ref message }) if message == "boom"));
    assert!(client.is_connected());

    client.close().await;
    server.server.close().await;
}

#[tokio::test]
async fn test_sequence_numbers_strictly_increase() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut last = 0;
    for i in 0..20 {
        let no_reply = i % 3 == 0;
        let handle = client.go::<_, i64>(no_reply, "Test.Echo", &i).await;
        assert!(handle.seq() > last);
        last = handle.seq();
        if !no_reply {
            handle.done().await.into_result().unwrap();
        }
    }

    client.close().await;
    server.server.close().await;
}

// ============================================================================
// Protocol anomalies
// ============================================================================

#[tokio::test]
async fn test_unknown_seq_is_tolerated() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let reply: Option<String> = client.call("Test.Stray", "hello").await.unwrap();
    assert_eq!(reply.as_deref(), Some("hello"));
    assert!(client.is_connected());

    client.close().await;
    server.server.close().await;
}

#[tokio::test]
async fn test_undecodable_response_is_skipped() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let reply: Option<Vec<u32>> = client.call("Test.Garbage", &vec![1u32, 2, 3]).await.unwrap();
    assert_eq!(reply, Some(vec![1, 2, 3]));
    assert!(client.is_connected());

    client.close().await;
    server.server.close().await;
}

#[tokio::test]
async fn test_oversized_request_rejected_before_send() {
    let server = TestServer::start().await;
    let options = fast_options().with_transport(TransportConfig::default().with_msg_len(2, 2, 128));
    let client = RpcClient::default().with_options(options);
    client.connect(&server.addr()).await.unwrap();
    wait_until(|| client.is_connected()).await;

    let handle = client.go::<_, String>(false, "Test.Echo", &"x".repeat(200)).await;
    assert!(handle.is_ready());
    assert!(matches!(handle.err(), Some(ActornetError::Frame(_))));
    assert_eq!(client.pending_count(), 0);

    // The connection survives.
    let reply: Option<String> = client.call("Test.Echo", "ok").await.unwrap();
    assert_eq!(reply.as_deref(), Some("ok"));

    client.close().await;
    server.server.close().await;
}

// ============================================================================
// NoReply
// ============================================================================

#[tokio::test]
async fn test_no_reply_never_registers() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let handle = client.go::<_, ()>(true, "Test.Notify", &"event").await;
    assert!(handle.is_ready());
    assert!(handle.err().is_none());
    assert_eq!(client.pending_count(), 0);

    let call = tokio::time::timeout(Duration::from_millis(100), handle.done())
        .await
        .unwrap();
    assert!(call.reply.is_none());

    wait_until(|| server.notified.load(Ordering::SeqCst) == 1).await;

    client.close().await;
    server.server.close().await;
}

// ============================================================================
// Disconnects
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_loss_flushes_pending_calls() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut handles = Vec::new();
    for i in 0..5 {
        handles.push(client.go::<_, i64>(false, "Test.Hang", &i).await);
    }
    assert_eq!(client.pending_count(), 5);

    client.go::<_, ()>(true, "Test.Kill", &()).await;

    let calls = tokio::time::timeout(WAIT, join_all(handles.into_iter().map(|h| h.done())))
        .await
        .expect("pending calls were not flushed");

    for call in calls {
        assert!(call.err.unwrap().is_disconnect());
    }
    assert_eq!(client.pending_count(), 0);

    // Auto-reconnect brings the link back.
    wait_until(|| client.is_connected()).await;
    let reply: Option<i64> = client.call("Test.Echo", &7).await.unwrap();
    assert_eq!(reply, Some(7));

    client.close().await;
    server.server.close().await;
}

#[tokio::test]
async fn test_close_flushes_pending_calls() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let handle = client.go::<_, i64>(false, "Test.Hang", &1).await;
    assert!(!handle.is_ready());

    client.close().await;
    assert!(!client.is_connected());

    let call = tokio::time::timeout(WAIT, handle.done()).await.unwrap();
    assert!(call.err.unwrap().is_disconnect());

    server.server.close().await;
}

#[tokio::test]
async fn test_call_without_connection_fails_fast() {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let client = RpcClient::default().with_options(fast_options());
    client.connect(&addr).await.unwrap();
    assert!(!client.is_connected());

    let handle = client.go::<_, i64>(false, "Test.Echo", &1).await;
    assert!(handle.is_ready());
    assert!(handle.err().unwrap().is_disconnect());
    assert_eq!(client.pending_count(), 0);

    let dispatcher = CallbackDispatcher::default();
    let invoked = Arc::new(AtomicUsize::new(0));
    let result = {
        let invoked = invoked.clone();
        client
            .async_go(&dispatcher, "Test.Echo", &1, move |_: Call<i64>| async move {
                invoked.fetch_add(1, Ordering::SeqCst);
            })
            .await
    };
    assert!(result.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    client.close().await;
}

#[tokio::test]
async fn test_empty_address_rejected() {
    let client = RpcClient::default();
    let err = client.connect("").await.unwrap_err();
    assert!(matches!(err, ActornetError::InvalidConfig(_)));
}

// ============================================================================
// Asynchronous calls
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_callback_runs_on_dispatcher() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;
    let dispatcher = CallbackDispatcher::default();

    let (tx, rx) = oneshot::channel();
    client
        .async_go(&dispatcher, "Test.Echo", &5, move |call: Call<i64>| async move {
            let _ = tx.send(call.into_result());
        })
        .await
        .unwrap();

    let result = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert_eq!(result.unwrap(), Some(5));

    client.close().await;
    server.server.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callback_may_issue_nested_rpc() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;
    let dispatcher = CallbackDispatcher::default();

    let (tx, rx) = oneshot::channel();
    let nested = client.clone();
    client
        .async_go(&dispatcher, "Test.Echo", &20, move |call: Call<i64>| async move {
            let first = call.reply.unwrap_or_default();
            let second: Option<i64> = nested.call("Test.Echo", &(first + 1)).await.unwrap();
            let _ = tx.send(second);
        })
        .await
        .unwrap();

    let second = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert_eq!(second, Some(21));

    client.close().await;
    server.server.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_callback_receives_disconnect() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;
    let dispatcher = CallbackDispatcher::default();

    let (tx, rx) = oneshot::channel();
    client
        .async_go(&dispatcher, "Test.Hang", &1, move |call: Call<i64>| async move {
            let _ = tx.send(call.err.map(|e| e.is_disconnect()));
        })
        .await
        .unwrap();

    client.go::<_, ()>(true, "Test.Kill", &()).await;

    let disconnected = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert_eq!(disconnected, Some(true));

    client.close().await;
    server.server.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropping_client_fails_pending_callbacks() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;
    let dispatcher = CallbackDispatcher::default();

    let (tx, rx) = oneshot::channel();
    client
        .async_go(&dispatcher, "Test.Hang", &1, move |call: Call<i64>| async move {
            let _ = tx.send(call.err.map(|e| e.is_disconnect()));
        })
        .await
        .unwrap();
    let waiting = client.go::<_, i64>(false, "Test.Hang", &2).await;
    assert_eq!(client.pending_count(), 2);

    drop(client);

    let disconnected = tokio::time::timeout(WAIT, rx)
        .await
        .expect("callback never ran")
        .unwrap();
    assert_eq!(disconnected, Some(true));

    let call = tokio::time::timeout(WAIT, waiting.done()).await.unwrap();
    assert!(call.err.unwrap().is_disconnect());

    server.server.close().await;
}

// ============================================================================
// Local fast path
// ============================================================================

struct Doubler;

impl LocalService for Doubler {
    fn call_local(
        &self,
        service_method: &str,
        in_param: Vec<u8>,
    ) -> BoxFuture<'static, Result<Vec<u8>, RpcError>> {
        let service_method = service_method.to_string();
        Box::pin(async move {
            if service_method != "Math.Double" {
                return Err(RpcError::new(format!("method not found: {}", service_method)));
            }
            let n: i64 = JsonProcessor.unmarshal(&in_param).map_err(|e| RpcError::new(e.to_string()))?;
            JsonProcessor.marshal(&(n * 2)).map_err(|e| RpcError::new(e.to_string()))
        })
    }
}

#[tokio::test]
async fn test_local_fast_path() {
    let client = RpcClient::default().with_local_service(Arc::new(Doubler));
    client.connect("localhost").await.unwrap();
    assert!(client.is_local());
    assert!(!client.is_connected());

    let reply: Option<i64> = client.call("Math.Double", &21).await.unwrap();
    assert_eq!(reply, Some(42));

    let err = client.call::<_, i64>("Math.Triple", &1).await.unwrap_err();
    assert!(matches!(err, ActornetError::Remote(_)));

    let dispatcher = CallbackDispatcher::default();
    let (tx, rx) = oneshot::channel();
    client
        .async_go(&dispatcher, "Math.Double", &4, move |call: Call<i64>| async move {
            let _ = tx.send(call.reply);
        })
        .await
        .unwrap();
    assert_eq!(tokio::time::timeout(WAIT, rx).await.unwrap().unwrap(), Some(8));

    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_local_without_service_is_disconnected() {
    let client = RpcClient::default();
    client.connect("localhost:3563").await.unwrap();
    assert!(client.is_local());

    let err = client.call::<_, i64>("Math.Double", &1).await.unwrap_err();
    assert!(err.is_disconnect());
}

#[tokio::test]
async fn test_reconnect_to_network_leaves_local_mode() {
    let server = TestServer::start().await;
    let client = RpcClient::default()
        .with_options(fast_options())
        .with_local_service(Arc::new(Doubler));

    client.connect("localhost").await.unwrap();
    assert!(client.is_local());

    client.connect(&server.addr()).await.unwrap();
    assert!(!client.is_local());
    wait_until(|| client.is_connected()).await;

    let reply: Option<i64> = client.call("Test.Echo", &3).await.unwrap();
    assert_eq!(reply, Some(3));

    client.close().await;
    server.server.close().await;
}
