//! Meshrpc Common Types and Wire Protocol
//!
//! This crate provides the core protocol definitions and wire framing for
//! the meshrpc peer-to-peer RPC system.
//!
//! # Overview
//!
//! Meshrpc is a peer-to-peer message transport with an RPC layer on top.
//! This crate contains the pieces shared by every component:
//!
//! - **Addressing**: [`PeerAddr`], the canonical `host:port` peer identity
//! - **Framing**: length-prefixed binary frames with a 4-byte kind tag
//! - **Protocol**: [`RpcRequest`] / [`RpcResponse`] and request id generation
//! - **Codec**: JSON payload encoding behind a pluggable seam
//! - **Configuration**: connection and queue tunables
//!
//! # Wire Format
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! [4-byte kind as u32 big-endian] [8-byte length as u64 big-endian] [payload]
//! ```
//!
//! The payload of RPC frames is the JSON encoding of a request or response.
//! The maximum frame size is 64 MiB (prevents memory exhaustion).

pub mod address;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod protocol;

pub use address::PeerAddr;
pub use codec::{Codec, JsonCodec};
pub use config::NetConfig;
pub use error::{MeshError, Result};
pub use protocol::{RequestIdGen, RpcRequest, RpcResponse};
