//! # Client Errors
//!
//! Purpose: Collect every failure the client can surface into one typed
//! enum so callers can match on the exact fault.
//!
//! ## Design Principles
//! 1. **Typed Results**: Decode-phase faults resolve to values, never panics.
//! 2. **Carry Evidence**: Protocol errors keep the server's literal reply.
//! 3. **Local Resolution**: Transport faults are settled at the connection
//!    boundary and delivered through the pending request's result.

use thiserror::Error;

/// Result type for the client.
pub type McResult<T> = Result<T, McError>;

/// Errors surfaced by the pool, connection, and client layers.
#[derive(Debug, Error)]
pub enum McError {
    /// TCP connect to the server failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Network or IO failure while reading or writing an established stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Pool is at its connection ceiling and no request slot is available.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Server reply did not match the expected token or violated value
    /// framing. Carries the offending reply line.
    #[error("unexpected server reply: {}", String::from_utf8_lossy(.reply))]
    Protocol { reply: Vec<u8> },

    /// Peer closed the stream while a request was in flight.
    #[error("server closed the connection")]
    PeerClosed,

    /// No reply arrived within the configured response timeout.
    #[error("timed out waiting for server reply")]
    Timeout,

    /// Pool bounds rejected at construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Key is empty, too long, or contains whitespace/control bytes.
    #[error("invalid key")]
    InvalidKey,
}

impl McError {
    pub(crate) fn protocol(reply: &[u8]) -> Self {
        McError::Protocol {
            reply: reply.to_vec(),
        }
    }
}
