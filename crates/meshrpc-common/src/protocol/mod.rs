pub mod requests;
pub mod responses;

pub use requests::{RequestId, RequestIdGen, RpcRequest};
pub use responses::RpcResponse;
