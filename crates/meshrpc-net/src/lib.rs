//! Meshrpc Transport Layer
//!
//! This crate provides the two transport building blocks of meshrpc:
//!
//! - [`Node`]: one physical duplex TCP connection to a specific peer, with
//!   connect/reconnect/disconnect state, serialized reads and writes, and
//!   keep-alive tuning.
//! - [`Endpoint`]: the cluster multiplexer. It accepts inbound connections,
//!   keeps dialing a configured set of desired peers until they are
//!   reachable, fans every received frame into a single inbound queue, and
//!   exposes unified send/broadcast/receive operations.
//!
//! # Delivery semantics
//!
//! Sends are best-effort and at-most-once per physical connection: a send
//! to a peer without a live connection is silently dropped, and nothing is
//! buffered or retried. Callers that need stronger guarantees layer their
//! own retry policy on top.

pub mod endpoint;
pub mod node;

pub use endpoint::{Endpoint, Inbound};
pub use node::Node;
