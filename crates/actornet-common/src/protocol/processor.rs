use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::Result;

/// Pluggable payload serializer.
///
/// The same processor serializes call arguments into `in_param`, return
/// values into `reply`, and the request/response envelopes themselves. The
/// transport never looks inside the bytes it produces.
///
/// # Example
///
/// ```
/// use actornet_common::protocol::{JsonProcessor, Processor, RpcRequest};
///
/// let processor = JsonProcessor;
/// let request = RpcRequest::new(1, "Math.Add", processor.marshal(&(1, 2)).unwrap());
///
/// let encoded = processor.marshal(&request).unwrap();
/// let decoded: RpcRequest = processor.unmarshal(&encoded).unwrap();
/// assert_eq!(request, decoded);
/// ```
pub trait Processor: Send + Sync + 'static {
    /// Serialize a value to bytes.
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes into a value of type `T`.
    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;
}

/// JSON processor backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonProcessor;

impl Processor for JsonProcessor {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
