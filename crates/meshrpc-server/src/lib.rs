//! Meshrpc Server
//!
//! This crate provides the serving side of meshrpc: a registry of named
//! services, a per-service dispatch table built once at registration time,
//! and the accept/read/dispatch loops that turn framed
//! [`RpcRequest`](meshrpc_common::RpcRequest)s into framed
//! [`RpcResponse`](meshrpc_common::RpcResponse)s.
//!
//! Each request runs on its own task, so one slow call never blocks other
//! requests on the same or other connections. A failing service method
//! produces an error response for that request's id; it never takes down
//! the connection or the server.

pub mod server;
pub mod service;

pub use server::RpcServer;
pub use service::{ServiceBuilder, ServiceHandler};
