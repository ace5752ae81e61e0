//! # Client API
//!
//! Purpose: Expose a compact async API for issuing memcached text-protocol
//! commands, hiding pooling and framing details.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `McClient` formats one command, acquires one
//!    connection, and decodes one reply per call.
//! 2. **Borrow-Friendly API**: Keys and values are `&[u8]` to avoid copies.
//! 3. **Typed Outcomes**: Misses are `Ok(None)`, never errors; protocol
//!    violations surface as `McError::Protocol`.

use std::time::Duration;

use crate::error::{McError, McResult};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::proto::{self, Expectation, Reply};

/// Configuration for the client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connections opened eagerly at construction.
    pub min_cached: usize,
    /// Maximum idle connections kept for reuse (0 = unbounded).
    pub max_cached: usize,
    /// Maximum concurrent in-flight connections (0 = unbounded).
    pub max_connections: usize,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional per-command reply timeout.
    pub response_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "localhost".to_string(),
            port: 11211,
            min_cached: 0,
            max_cached: 0,
            max_connections: 0,
            connect_timeout: None,
            response_timeout: None,
        }
    }
}

/// Async memcached client with connection pooling.
///
/// Each call acquires a connection, runs one half-duplex exchange, and
/// returns the connection to the pool.
#[derive(Clone)]
pub struct McClient {
    pool: ConnectionPool,
}

impl McClient {
    /// Creates a client for `host:port` with default pool bounds.
    pub async fn connect(host: impl Into<String>, port: u16) -> McResult<Self> {
        let config = ClientConfig {
            host: host.into(),
            port,
            ..ClientConfig::default()
        };
        Self::with_config(config).await
    }

    /// Creates a client with a custom configuration.
    pub async fn with_config(config: ClientConfig) -> McResult<Self> {
        let pool = ConnectionPool::connect(PoolConfig {
            host: config.host,
            port: config.port,
            min_cached: config.min_cached,
            max_cached: config.max_cached,
            max_connections: config.max_connections,
            connect_timeout: config.connect_timeout,
            response_timeout: config.response_timeout,
        })
        .await?;
        Ok(McClient { pool })
    }

    /// Fetches a value by key. Returns `Ok(None)` on a miss.
    pub async fn get(&self, key: &[u8]) -> McResult<Option<Vec<u8>>> {
        let command = proto::key_command("get", key)?;
        match self.exec(&command, Expectation::Value).await? {
            Reply::Bytes(value) => Ok(Some(value)),
            Reply::NoValue => Ok(None),
            // The reply line was the bare integer itself.
            Reply::Integer(value) => Err(McError::protocol(value.to_string().as_bytes())),
        }
    }

    /// Stores a value unconditionally.
    pub async fn set(&self, key: &[u8], value: &[u8], flags: u32, exptime: u32) -> McResult<()> {
        self.store("set", key, value, flags, exptime).await
    }

    /// Stores a value only if the key does not already exist.
    pub async fn add(&self, key: &[u8], value: &[u8], flags: u32, exptime: u32) -> McResult<()> {
        self.store("add", key, value, flags, exptime).await
    }

    /// Stores a value only if the key already exists.
    pub async fn replace(&self, key: &[u8], value: &[u8], flags: u32, exptime: u32) -> McResult<()> {
        self.store("replace", key, value, flags, exptime).await
    }

    /// Deletes a key. Any reply other than `DELETED` is a protocol error.
    pub async fn delete(&self, key: &[u8]) -> McResult<()> {
        let command = proto::key_command("delete", key)?;
        self.exec(&command, Expectation::Ack("DELETED")).await?;
        Ok(())
    }

    /// Increments a counter. Returns `Ok(None)` when the key is missing.
    pub async fn incr(&self, key: &[u8], delta: u64) -> McResult<Option<u64>> {
        self.arith("incr", key, delta).await
    }

    /// Decrements a counter. Returns `Ok(None)` when the key is missing.
    pub async fn decr(&self, key: &[u8], delta: u64) -> McResult<Option<u64>> {
        self.arith("decr", key, delta).await
    }

    /// Closes every idle connection in the pool.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Access to the underlying pool, for callers that format their own
    /// commands.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    async fn store(
        &self,
        verb: &str,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> McResult<()> {
        let command = proto::storage_command(verb, key, value, flags, exptime)?;
        self.exec(&command, Expectation::Ack("STORED")).await?;
        Ok(())
    }

    async fn arith(&self, verb: &str, key: &[u8], delta: u64) -> McResult<Option<u64>> {
        let command = proto::delta_command(verb, key, delta)?;
        match self.exec(&command, Expectation::Value).await? {
            Reply::Integer(value) => Ok(Some(value)),
            Reply::NoValue => Ok(None),
            Reply::Bytes(value) => Err(McError::protocol(&value)),
        }
    }

    async fn exec(&self, command: &[u8], expectation: Expectation) -> McResult<Reply> {
        let mut conn = self.pool.acquire().await?;
        conn.send_command(command, expectation).await
    }
}
