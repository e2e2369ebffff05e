mod base64_bytes;
pub mod builtin;
pub mod error;
pub mod local;
pub mod processor;
pub mod requests;
pub mod responses;


pub use error::{ActornetError, ErrorKind, Result};
pub use local::LocalService;
pub use processor::{JsonProcessor, Processor};
pub use requests::{split_service_method, RpcRequest, Seq, ServiceMethod};
pub use responses::{RpcError, RpcResponse};
