//! Spanning-tree topology, handshake state machine, burst protocol, and the
//! single-actor engine that ties them together for meshd.
//!
//! This crate is transport-agnostic: every type here operates on already
//! parsed [`meshd_proto::Message`]s and plain data, never a socket. Wiring
//! real TCP sockets to [`engine::Engine`] lives in `meshd-transport-tcp`.

pub mod burst;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod tree;

pub use error::CoreError;
pub use session::{LinkBlock, LinkBlockSet, LinkSession, LocalIdentity, Role, SessionAction, SessionState};
pub use tree::{NodeId, ServerNode, ServerTree};
