use actornet_common::{
    split_service_method, ActornetError, JsonProcessor, LocalService, Processor, Result, RpcError,
};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

type MethodFn = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, std::result::Result<Vec<u8>, RpcError>> + Send + Sync>;

/// Routes `"Service.Method"` names to typed handlers.
///
/// Handlers take deserialized arguments and return a serializable reply or
/// an [`RpcError`]; the registry's processor converts both ends. The
/// registry is also a [`LocalService`], so an `RpcClient` can call it
/// in-process without a network hop.
///
/// # Example
///
/// ```
/// use actornet_common::RpcError;
/// use actornet_server::ServiceRegistry;
///
/// let registry = ServiceRegistry::default();
/// registry
///     .register("Math.Add", |(a, b): (i64, i64)| async move { Ok::<_, RpcError>(a + b) })
///     .unwrap();
///
/// assert!(registry.contains("Math.Add"));
/// ```
pub struct ServiceRegistry<P: Processor = JsonProcessor> {
    processor: Arc<P>,
    methods: RwLock<HashMap<String, MethodFn>>,
}

impl Default for ServiceRegistry<JsonProcessor> {
    fn default() -> Self {
        Self::new(JsonProcessor)
    }
}

impl<P: Processor> ServiceRegistry<P> {
    pub fn new(processor: P) -> Self {
        Self {
            processor: Arc::new(processor),
            methods: RwLock::new(HashMap::new()),
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Registers a handler.
    ///
    /// # Errors
    ///
    /// [`ActornetError::InvalidConfig`] when the name is not of the form
    /// `Service.Method` or is already registered.
    pub fn register<A, R, F, Fut>(&self, service_method: &str, handler: F) -> Result<()>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, RpcError>> + Send + 'static,
    {
        if split_service_method(service_method).is_none() {
            return Err(ActornetError::InvalidConfig(format!(
                "invalid service method name: {:?}",
                service_method
            )));
        }

        let processor = self.processor.clone();
        let handler = Arc::new(handler);
        let method: MethodFn = Arc::new(move |in_param: Vec<u8>| {
            let processor = processor.clone();
            let handler = handler.clone();
            Box::pin(async move {
                let args: A = processor
                    .unmarshal(&in_param)
                    .map_err(|e| RpcError::new(format!("invalid arguments: {}", e)))?;
                let reply = handler(args).await?;
                processor
                    .marshal(&reply)
                    .map_err(|e| RpcError::new(format!("cannot encode reply: {}", e)))
            })
        });

        let mut methods = self.methods.write();
        if methods.contains_key(service_method) {
            return Err(ActornetError::InvalidConfig(format!(
                "service method already registered: {}",
                service_method
            )));
        }
        methods.insert(service_method.to_string(), method);

        tracing::debug!(service_method, "registered service method");
        Ok(())
    }

    /// Invokes a registered method with serialized arguments.
    pub async fn call(&self, service_method: &str, in_param: Vec<u8>) -> std::result::Result<Vec<u8>, RpcError> {
        self.call_local(service_method, in_param).await
    }

    pub fn contains(&self, service_method: &str) -> bool {
        self.methods.read().contains_key(service_method)
    }

    /// Registered names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl<P: Processor> LocalService for ServiceRegistry<P> {
    fn call_local(
        &self,
        service_method: &str,
        in_param: Vec<u8>,
    ) -> BoxFuture<'static, std::result::Result<Vec<u8>, RpcError>> {
        let method = self.methods.read().get(service_method).cloned();
        match method {
            Some(method) => method(in_param),
            None => {
                let message = format!("method not found: {}", service_method);
                Box::pin(async move { Err(RpcError::new(message)) })
            }
        }
    }
}
