use crate::error::Result;
use crate::protocol::{RpcRequest, RpcResponse};

/// Codec for encoding/decoding RPC payloads.
///
/// Currently only JSON is supported, but the enum leaves room for other
/// formats (e.g., MessagePack, CBOR). The transport only ever sees the
/// byte arrays this codec produces.
///
/// # Example
///
/// ```
/// use meshrpc_common::{Codec, RpcRequest};
/// use serde_json::json;
///
/// let codec = Codec::new();
/// let request = RpcRequest::new(1, "HelloService", "hello", vec![json!("World")]);
///
/// let encoded = codec.encode_request(&request).unwrap();
/// let decoded = codec.decode_request(&encoded).unwrap();
/// assert_eq!(request, decoded);
/// ```
pub enum Codec {
    /// JSON codec (currently the only supported format)
    Json(JsonCodec),
}

impl Codec {
    /// Create a new codec (JSON is the only supported format)
    pub fn new() -> Self {
        Codec::Json(JsonCodec)
    }

    /// Encode a request to bytes.
    pub fn encode_request(&self, request: &RpcRequest) -> Result<Vec<u8>> {
        match self {
            Codec::Json(_) => JsonCodec::encode_request(request),
        }
    }

    /// Decode a request from bytes.
    pub fn decode_request(&self, data: &[u8]) -> Result<RpcRequest> {
        match self {
            Codec::Json(_) => JsonCodec::decode_request(data),
        }
    }

    /// Encode a response to bytes.
    pub fn encode_response(&self, response: &RpcResponse) -> Result<Vec<u8>> {
        match self {
            Codec::Json(_) => JsonCodec::encode_response(response),
        }
    }

    /// Decode a response from bytes.
    pub fn decode_response(&self, data: &[u8]) -> Result<RpcResponse> {
        match self {
            Codec::Json(_) => JsonCodec::decode_response(data),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON codec for RPC payloads.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a request to bytes.
    pub fn encode_request(request: &RpcRequest) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    /// Decode a request from bytes.
    pub fn decode_request(data: &[u8]) -> Result<RpcRequest> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encode a response to bytes.
    pub fn encode_response(response: &RpcResponse) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    /// Decode a response from bytes.
    pub fn decode_response(data: &[u8]) -> Result<RpcResponse> {
        Ok(serde_json::from_slice(data)?)
    }
}
