use serde::{Deserialize, Serialize};

pub type Seq = u64;
pub type ServiceMethod = String;

/// Request envelope written as one frame.
///
/// `in_param` holds the arguments already serialized by the client's
/// [`Processor`](super::Processor); the envelope itself is serialized with the
/// same processor. When `no_reply` is set the remote side must not answer and
/// the caller does not keep a pending entry for `seq`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcRequest {
    pub seq: Seq,
    /// `"Service.Method"`
    pub service_method: ServiceMethod,
    #[serde(default)]
    pub no_reply: bool,
    #[serde(default, with = "super::base64_bytes")]
    pub in_param: Vec<u8>,
}

impl RpcRequest {
    pub fn new(seq: Seq, service_method: impl Into<String>, in_param: Vec<u8>) -> Self {
        RpcRequest {
            seq,
            service_method: service_method.into(),
            no_reply: false,
            in_param,
        }
    }

    pub fn with_no_reply(mut self, no_reply: bool) -> Self {
        self.no_reply = no_reply;
        self
    }
}

/// Splits `"Service.Method"` at the last dot; both halves must be non-empty.
pub fn split_service_method(service_method: &str) -> Option<(&str, &str)> {
    let (service, method) = service_method.rsplit_once('.')?;
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service, method))
}
