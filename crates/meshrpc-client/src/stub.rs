//! Typed service stubs.
//!
//! Stubs are explicit interface implementations: a hand-written struct per
//! remote interface, each method performing the same four steps (build the
//! request, register the future, send, block). There is no runtime proxy
//! generation; [`ServiceStub`] carries the service name and the generic
//! plumbing, and the concrete stub adds the typed method surface.
//!
//! ```no_run
//! use meshrpc_client::{RpcClient, ServiceStub};
//! use meshrpc_common::Result;
//! use serde_json::json;
//!
//! /// Client-side interface of the remote HelloService.
//! struct HelloServiceStub {
//!     stub: ServiceStub,
//! }
//!
//! impl HelloServiceStub {
//!     fn new(client: &RpcClient) -> Self {
//!         Self { stub: client.service("HelloService") }
//!     }
//!
//!     async fn hello(&self, name: &str) -> Result<String> {
//!         self.stub.call("hello", vec![json!(name)]).await
//!     }
//! }
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use meshrpc_common::Result;

use crate::client::RpcClient;

/// A handle for calling one remote service by name.
pub struct ServiceStub {
    client: RpcClient,
    service: String,
}

impl ServiceStub {
    pub(crate) fn new(client: RpcClient, service: impl Into<String>) -> Self {
        Self {
            client,
            service: service.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    /// Calls a method and deserializes the result value.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
        let value = self.client.call(&self.service, method, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Calls a method with a bounded wait.
    pub async fn call_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<T> {
        let value = self
            .client
            .call_timeout(&self.service, method, args, timeout)
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}
