use futures_util::future::BoxFuture;

use super::RpcError;

/// In-process service reachable without framing or networking.
///
/// A client connected to a local address hands serialized arguments straight
/// to this capability and receives the serialized reply.
pub trait LocalService: Send + Sync + 'static {
    fn call_local(
        &self,
        service_method: &str,
        in_param: Vec<u8>,
    ) -> BoxFuture<'static, Result<Vec<u8>, RpcError>>;
}
