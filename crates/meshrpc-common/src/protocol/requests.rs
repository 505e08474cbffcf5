use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

pub type RequestId = u64;

/// An RPC request sent from a client to a server.
///
/// Identifies the target by service and method name; `param_types` carries
/// the JSON type name of each argument so the wire contract stays
/// self-describing across implementations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub id: RequestId,
    pub service: String,
    pub method: String,
    pub param_types: Vec<String>,
    pub args: Vec<Value>,
}

impl RpcRequest {
    pub fn new(
        id: RequestId,
        service: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        let param_types = args.iter().map(|v| json_type_name(v).to_string()).collect();
        RpcRequest {
            id,
            service: service.into(),
            method: method.into(),
            param_types,
            args,
        }
    }
}

/// The JSON type name of a value, used as the wire-level type descriptor.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A monotonically increasing request id generator.
///
/// One generator belongs to one client instance; two clients in the same
/// process each carry their own so they never share mutable state. Ids
/// start at 1 and never repeat for the lifetime of the generator (the
/// counter would have to wrap a u64 first).
#[derive(Debug, Default)]
pub struct RequestIdGen(AtomicU64);

impl RequestIdGen {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Returns the next id. Safe to call from any number of tasks.
    pub fn next(&self) -> RequestId {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_construction() {
        let req = RpcRequest::new(7, "HelloService", "hello", vec![json!("World")]);
        assert_eq!(req.id, 7);
        assert_eq!(req.service, "HelloService");
        assert_eq!(req.method, "hello");
        assert_eq!(req.param_types, vec!["string"]);
        assert_eq!(req.args, vec![json!("World")]);
    }

    #[test]
    fn test_param_types_track_args() {
        let req = RpcRequest::new(
            1,
            "S",
            "m",
            vec![json!(null), json!(true), json!(1), json!([2]), json!({})],
        );
        assert_eq!(
            req.param_types,
            vec!["null", "bool", "number", "array", "object"]
        );
    }

    #[test]
    fn test_id_gen_is_monotonic() {
        let ids = RequestIdGen::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[test]
    fn test_id_gen_unique_across_threads() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let ids = Arc::new(RequestIdGen::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = ids.clone();
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| ids.next()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {id} generated twice");
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_generators_are_independent() {
        let a = RequestIdGen::new();
        let b = RequestIdGen::new();
        assert_eq!(a.next(), 1);
        assert_eq!(b.next(), 1);
    }
}
