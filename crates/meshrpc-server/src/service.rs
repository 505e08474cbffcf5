//! Per-service dispatch tables.
//!
//! A [`ServiceHandler`] maps method names to async closures. The table is
//! built once when the service is registered and only read afterwards, so
//! dispatch is a plain map lookup: no runtime type introspection. Method
//! resolution checks the declared arity against the request's argument
//! count, which keeps the "dispatch by name" wire contract while
//! rejecting calls with the wrong shape.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;

use meshrpc_common::{MeshError, Result, RpcRequest};

type MethodFn = Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

struct MethodEntry {
    arity: usize,
    handler: MethodFn,
}

/// A named service and its dispatch table.
///
/// # Example
///
/// ```
/// use meshrpc_server::ServiceHandler;
/// use serde_json::json;
///
/// let hello = ServiceHandler::builder("HelloService")
///     .method("hello", 1, |args| async move {
///         let name = args[0].as_str().unwrap_or_default().to_string();
///         Ok(json!(format!("Hello {name}")))
///     })
///     .build();
/// assert_eq!(hello.name(), "HelloService");
/// ```
pub struct ServiceHandler {
    name: String,
    methods: HashMap<String, MethodEntry>,
}

impl ServiceHandler {
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves the method named by `request` and invokes it.
    ///
    /// # Errors
    ///
    /// [`MeshError::MethodNotFound`] when no method matches the name and
    /// argument count; otherwise whatever the method itself returns.
    pub async fn dispatch(&self, request: &RpcRequest) -> Result<Value> {
        let entry = self
            .methods
            .get(&request.method)
            .filter(|entry| entry.arity == request.args.len())
            .ok_or_else(|| MeshError::MethodNotFound {
                service: self.name.clone(),
                method: request.method.clone(),
            })?;
        (entry.handler)(request.args.clone()).await
    }
}

/// Builds a [`ServiceHandler`] method by method.
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, MethodEntry>,
}

impl ServiceBuilder {
    /// Registers a method under `name` taking `arity` arguments. A later
    /// registration under the same name replaces the earlier one.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        self.methods.insert(
            name.into(),
            MethodEntry {
                arity,
                handler: Box::new(move |args| Box::pin(handler(args))),
            },
        );
        self
    }

    pub fn build(self) -> ServiceHandler {
        ServiceHandler {
            name: self.name,
            methods: self.methods,
        }
    }
}
