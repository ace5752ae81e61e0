//! # asyncmc
//!
//! Purpose: Provide an async memcached text-protocol client that
//! multiplexes logical requests over a bounded pool of persistent TCP
//! connections.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections FIFO under explicit
//!    min-cached / max-cached / max-connections bounds.
//! 2. **Explicit State Machine**: Replies are decoded by a socket-free FSM
//!    fed line and byte chunks, so framing is testable in isolation.
//! 3. **Half-Duplex Discipline**: One in-flight command per connection,
//!    enforced by ownership rather than convention.
//! 4. **Typed Failures**: Every transport and framing fault resolves into
//!    the pending request's result; nothing panics past the decoder.

mod client;
mod connection;
mod error;
mod pool;
mod proto;

pub use client::{ClientConfig, McClient};
pub use error::{McError, McResult};
pub use pool::{ConnectionPool, PoolConfig, PooledConn};
pub use proto::{Expectation, ReadHint, Reply, ResponseDecoder, MAX_KEY_LEN, MAX_VALUE_LEN};
