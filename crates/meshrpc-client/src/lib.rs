//! Meshrpc Client
//!
//! This crate provides the calling side of meshrpc: a connection to one
//! remote service host, a pending-call table correlating responses to
//! requests by id, and typed per-service stubs.
//!
//! # Call flow
//!
//! 1. A stub method builds an [`RpcRequest`](meshrpc_common::RpcRequest)
//!    with a fresh id from the client's own id generator.
//! 2. The client registers an [`RpcFuture`] for that id, frames the
//!    request onto the wire, and blocks on the future.
//! 3. A background reader task frames in responses and completes the
//!    matching future; responses with no pending entry are discarded.
//! 4. The caller gets the result value, a
//!    [`MeshError::Remote`](meshrpc_common::MeshError::Remote) carrying
//!    the server's failure description, or (with a timeout variant) a
//!    [`MeshError::Timeout`](meshrpc_common::MeshError::Timeout).
//!
//! A call without a timeout blocks until its response arrives, even across
//! a transparent reconnect. A request that was already sent when the
//! connection dropped is never retried; bound such calls with
//! [`RpcClient::call_timeout`].

pub mod client;
pub mod future;
pub mod stub;

pub use client::RpcClient;
pub use future::RpcFuture;
pub use stub::ServiceStub;
