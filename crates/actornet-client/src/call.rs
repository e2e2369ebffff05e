//! In-flight call bookkeeping.
//!
//! A [`Call`] is registered in the client's pending table from the moment its
//! request is queued until exactly one of {matching response, local send
//! failure, disconnect flush} removes it. Whoever removes it owns it and
//! hands it to its [`Completion`].

use actornet_common::{ActornetError, Processor, Result, RpcResponse, Seq};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::future::Future;
use tokio::sync::oneshot;

use crate::dispatcher::CallbackDispatcher;

/// Outcome of one RPC call.
///
/// # Fields
///
/// - `seq`: sequence number assigned by the client
/// - `service_method`: target in `"Service.Method"` form
/// - `arg`: serialized arguments as sent
/// - `reply`: decoded return value; `None` on error or for an empty reply
/// - `err`: local, remote or disconnect error
#[derive(Debug)]
pub struct Call<R> {
    pub seq: Seq,
    pub service_method: String,
    pub arg: Bytes,
    pub reply: Option<R>,
    pub err: Option<ActornetError>,
}

impl<R> Call<R> {
    pub(crate) fn new(seq: Seq, service_method: impl Into<String>, arg: Bytes) -> Self {
        Self {
            seq,
            service_method: service_method.into(),
            arg,
            reply: None,
            err: None,
        }
    }

    pub(crate) fn failed(mut self, err: ActornetError) -> Self {
        self.err = Some(err);
        self
    }

    /// Fills `reply`/`err` from a decoded response.
    ///
    /// A remote error wins over the reply payload. A reply that does not
    /// decode into `R` is recorded as a call error.
    pub(crate) fn complete<P: Processor>(mut self, processor: &P, response: RpcResponse) -> Self
    where
        R: DeserializeOwned,
    {
        if let Some(err) = response.err {
            self.err = Some(ActornetError::Remote(err));
            return self;
        }

        if !response.reply.is_empty() {
            match processor.unmarshal(&response.reply) {
                Ok(reply) => self.reply = Some(reply),
                Err(e) => {
                    self.err = Some(ActornetError::Serialization(format!(
                        "cannot decode reply of {}: {}",
                        self.service_method, e
                    )))
                }
            }
        }
        self
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }

    /// Converts into a plain result.
    pub fn into_result(self) -> Result<Option<R>> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self.reply),
        }
    }
}

/// Handle returned by [`RpcClient::go`](crate::RpcClient::go).
///
/// Ready immediately when the call failed locally or was sent with
/// `no_reply`; otherwise resolved by the connection's read loop or by a
/// disconnect flush.
#[derive(Debug)]
pub struct CallHandle<R> {
    seq: Seq,
    service_method: String,
    state: HandleState<R>,
}

#[derive(Debug)]
enum HandleState<R> {
    Ready(Call<R>),
    Pending(oneshot::Receiver<Call<R>>),
}

impl<R> CallHandle<R> {
    pub(crate) fn ready(call: Call<R>) -> Self {
        Self {
            seq: call.seq,
            service_method: call.service_method.clone(),
            state: HandleState::Ready(call),
        }
    }

    pub(crate) fn pending(seq: Seq, service_method: &str, receiver: oneshot::Receiver<Call<R>>) -> Self {
        Self {
            seq,
            service_method: service_method.to_string(),
            state: HandleState::Pending(receiver),
        }
    }

    pub fn seq(&self) -> Seq {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// True when the call was completed without waiting.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }

    /// Error of a call that failed without waiting.
    pub fn err(&self) -> Option<&ActornetError> {
        match &self.state {
            HandleState::Ready(call) => call.err.as_ref(),
            HandleState::Pending(_) => None,
        }
    }

    /// Waits for the call to complete.
    pub async fn done(self) -> Call<R> {
        match self.state {
            HandleState::Ready(call) => call,
            HandleState::Pending(receiver) => match receiver.await {
                Ok(call) => call,
                Err(_) => Call::new(self.seq, self.service_method, Bytes::new()).failed(
                    ActornetError::Disconnected("client dropped".to_string()),
                ),
            },
        }
    }
}

pub(crate) type CallbackFn<R> = Box<dyn FnOnce(Call<R>) -> BoxFuture<'static, ()> + Send>;

pub(crate) fn boxed_callback<R, F, Fut>(callback: F) -> CallbackFn<R>
where
    F: FnOnce(Call<R>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |call| Box::pin(callback(call)))
}

/// How a resolved call reaches its consumer.
pub(crate) enum Completion<R> {
    /// A synchronous caller waiting on a [`CallHandle`]
    Wait(oneshot::Sender<Call<R>>),
    /// An asynchronous caller; the callback runs on the dispatcher
    Callback {
        callback: CallbackFn<R>,
        dispatcher: CallbackDispatcher,
    },
}

/// Work left after a call was completed.
pub(crate) enum Delivery {
    Done,
    Dispatch {
        dispatcher: CallbackDispatcher,
        job: BoxFuture<'static, ()>,
    },
}

impl Delivery {
    /// Hands a callback job to its dispatcher, waiting while the queue is full.
    pub(crate) async fn deliver(self) {
        if let Delivery::Dispatch { dispatcher, job } = self {
            if let Err(e) = dispatcher.dispatch(job).await {
                tracing::error!(error = %e, "dropping callback");
            }
        }
    }
}

impl Delivery {
    /// Like [`deliver`](Self::deliver), for callers that cannot await.
    pub(crate) fn deliver_detached(self) {
        if let Delivery::Dispatch { dispatcher, job } = self {
            dispatcher.dispatch_detached(job);
        }
    }
}

impl<R: Send + 'static> Completion<R> {
    pub(crate) fn complete(self, call: Call<R>) -> Delivery {
        match self {
            Completion::Wait(sender) => {
                // The caller may have dropped its handle.
                let _ = sender.send(call);
                Delivery::Done
            }
            Completion::Callback {
                callback,
                dispatcher,
            } => Delivery::Dispatch {
                dispatcher,
                job: callback(call),
            },
        }
    }
}

/// Type-erased pending-table entry.
pub(crate) trait PendingEntry<P>: Send {
    fn seq(&self) -> Seq;

    fn resolve(self: Box<Self>, processor: &P, response: RpcResponse) -> Delivery;

    fn fail(self: Box<Self>, err: ActornetError) -> Delivery;
}

pub(crate) struct PendingCall<R> {
    pub(crate) call: Call<R>,
    pub(crate) completion: Completion<R>,
}

impl<P, R> PendingEntry<P> for PendingCall<R>
where
    P: Processor,
    R: DeserializeOwned + Send + 'static,
{
    fn seq(&self) -> Seq {
        self.call.seq
    }

    fn resolve(self: Box<Self>, processor: &P, response: RpcResponse) -> Delivery {
        let call = self.call.complete(processor, response);
        self.completion.complete(call)
    }

    fn fail(self: Box<Self>, err: ActornetError) -> Delivery {
        let call = self.call.failed(err);
        self.completion.complete(call)
    }
}
