use actornet_common::transport::panic_message;
use actornet_common::{ActornetError, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default number of completed callbacks that may wait for the worker.
pub const DEFAULT_CALLBACK_QUEUE_DEPTH: usize = 10_000;

/// Executor for asynchronous call callbacks.
///
/// Callbacks never run on a connection's read loop. They are queued on a
/// bounded channel and executed one at a time, in completion order, by a
/// single worker task. When the queue is full the read loop waits for space,
/// which in turn stops it from reading further responses.
///
/// A callback may issue further RPCs, synchronous or not. It should not wait
/// on a synchronous call while the queue is full, since the response to that
/// call cannot be read until the worker frees a slot.
///
/// The worker exits once every handle to the dispatcher has been dropped and
/// the queue is drained.
///
/// # Example
///
/// ```no_run
/// use actornet_client::{CallbackDispatcher, RpcClient};
///
/// # async fn example() -> actornet_common::Result<()> {
/// let dispatcher = CallbackDispatcher::default();
/// let client = RpcClient::default();
/// client.connect("127.0.0.1:3563").await?;
///
/// client
///     .async_go(&dispatcher, "Math.Add", &(1, 2), |call: actornet_client::Call<i64>| async move {
///         println!("1 + 2 = {:?}", call.reply);
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct CallbackDispatcher {
    sender: mpsc::Sender<BoxFuture<'static, ()>>,
}

impl CallbackDispatcher {
    /// Creates a dispatcher and spawns its worker.
    ///
    /// Must be called from within a tokio runtime. A depth of zero is raised
    /// to one.
    pub fn new(queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        tokio::spawn(run_worker(receiver));
        Self { sender }
    }

    /// Queues a job, waiting while the queue is full.
    pub(crate) async fn dispatch(&self, job: BoxFuture<'static, ()>) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| ActornetError::DispatcherClosed)
    }

    /// Queues a job without waiting.
    ///
    /// When the queue is full the job is handed to a spawned task that waits
    /// for space. Outside a runtime a full queue drops the job.
    pub(crate) fn dispatch_detached(&self, job: BoxFuture<'static, ()>) {
        let job = match self.sender.try_send(job) {
            Ok(()) => return,
            Err(TrySendError::Closed(_)) => {
                tracing::error!(error = %ActornetError::DispatcherClosed, "dropping callback");
                return;
            }
            Err(TrySendError::Full(job)) => job,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let dispatcher = self.clone();
                handle.spawn(async move {
                    if let Err(e) = dispatcher.dispatch(job).await {
                        tracing::error!(error = %e, "dropping callback");
                    }
                });
            }
            Err(_) => tracing::error!("dropping callback, queue full and no runtime"),
        }
    }

    /// Jobs waiting for the worker.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl Default for CallbackDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CALLBACK_QUEUE_DEPTH)
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<BoxFuture<'static, ()>>) {
    while let Some(job) = receiver.recv().await {
        if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
            tracing::error!(panic = %panic_message(&*panic), "callback panicked");
        }
    }
}
