//! # Connection Pool
//!
//! Purpose: Multiplex many logical requests over a bounded set of
//! persistent connections to one memcached server.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Idle connections are cached FIFO and reused.
//! 2. **Minimal Locking**: One mutex guards the idle cache and counters;
//!    critical sections mutate containers and integers only, never do I/O.
//! 3. **Fail Fast**: An acquire at the connection ceiling returns
//!    `PoolExhausted` immediately instead of queueing.
//! 4. **Close, Don't Recycle**: A connection that errored mid-reply is
//!    discarded; only cleanly finished connections return to the cache.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::connection::Connection;
use crate::error::{McError, McResult};
use crate::proto::{Expectation, Reply};

/// Pool configuration.
///
/// The three bounds follow memcached client convention: 0 means unbounded.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server hostname or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connections opened eagerly at pool construction.
    pub min_cached: usize,
    /// Maximum idle connections kept for reuse (0 = unbounded).
    pub max_cached: usize,
    /// Maximum connections handed out concurrently (0 = unbounded).
    pub max_connections: usize,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional per-command reply timeout. On expiry the pending command
    /// fails with `Timeout` and its connection is closed.
    pub response_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
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

impl PoolConfig {
    fn validate(&self) -> McResult<()> {
        if self.min_cached > 0 && self.max_cached > 0 && self.min_cached > self.max_cached {
            return Err(McError::Config(format!(
                "min_cached ({}) exceeds max_cached ({})",
                self.min_cached, self.max_cached
            )));
        }
        if self.max_connections > 0
            && (self.max_connections < self.max_cached || self.max_connections < self.min_cached)
        {
            return Err(McError::Config(format!(
                "max_connections ({}) is below the cache bounds",
                self.max_connections
            )));
        }
        Ok(())
    }
}

struct PoolState {
    idle: VecDeque<Connection>,
    /// Connections currently held by in-flight requests. Incremented once
    /// per acquire, decremented once per release.
    total: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Connection pool handle. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool and eagerly opens `min_cached` connections.
    pub async fn connect(config: PoolConfig) -> McResult<Self> {
        config.validate()?;
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_cached),
            total: 0,
        };
        let pool = ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        };

        for _ in 0..pool.inner.config.min_cached {
            let conn = Connection::open(&pool.inner.config).await?;
            let mut state = pool.inner.state.lock().expect("pool mutex poisoned");
            state.idle.push_back(conn);
        }

        Ok(pool)
    }

    /// Hands out a connection, reusing an idle one when possible.
    ///
    /// Fails with `PoolExhausted` when `max_connections` requests are
    /// already in flight; the ceiling check mutates nothing.
    pub async fn acquire(&self) -> McResult<PooledConn> {
        self.try_reserve()?;

        loop {
            let candidate = {
                let mut state = self.inner.state.lock().expect("pool mutex poisoned");
                state.idle.pop_front()
            };
            match candidate {
                Some(conn) if conn.is_closed() => {
                    debug!(id = conn.id(), "discarding dead idle connection");
                }
                Some(conn) => return Ok(PooledConn::new(self.inner.clone(), conn)),
                None => break,
            }
        }

        match Connection::open(&self.inner.config).await {
            Ok(conn) => Ok(PooledConn::new(self.inner.clone(), conn)),
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    /// Closes every idle connection. Busy connections are untouched; they
    /// release themselves when their request finishes.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        let closed = state.idle.len();
        state.idle.clear();
        if closed > 0 {
            debug!(closed, "pool shutdown, idle connections closed");
        }
    }

    /// Number of idle connections currently cached.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().expect("pool mutex poisoned").idle.len()
    }

    /// Number of connections currently held by in-flight requests.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().expect("pool mutex poisoned").total
    }

    fn try_reserve(&self) -> McResult<()> {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        let max = self.inner.config.max_connections;
        if max > 0 && state.total >= max {
            return Err(McError::PoolExhausted);
        }
        state.total += 1;
        Ok(())
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.total = state.total.saturating_sub(1);
    }

    /// Returns a finished connection to the idle cache.
    ///
    /// Idempotent: a connection already present in the cache (a close
    /// notification racing a normal completion) is dropped without
    /// touching the counters.
    fn release(&self, conn: Connection) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if state.idle.iter().any(|cached| cached.id() == conn.id()) {
            return;
        }
        let max_cached = self.inner.config.max_cached;
        if max_cached == 0 || state.idle.len() < max_cached {
            state.idle.push_back(conn);
        } else {
            debug!(
                id = conn.id(),
                max_cached, "idle cache full, closing connection"
            );
            drop(conn);
        }
        state.total = state.total.saturating_sub(1);
    }
}

/// RAII guard for an acquired connection.
///
/// Drop returns a cleanly finished connection to the pool; a connection
/// that saw any error is closed and only its request slot is returned.
pub struct PooledConn {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConn {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConn {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Sends one fully formatted command and decodes its reply.
    ///
    /// The expectation selects the decode path: `Ack` for fixed-token
    /// acknowledgements, `Value` for `get`/`incr`/`decr` replies. The
    /// future resolves exactly once with the decoded reply or a failure.
    pub async fn send_command(
        &mut self,
        command: &[u8],
        expectation: Expectation,
    ) -> McResult<Reply> {
        let limit = self.pool.config.response_timeout;
        let conn = self.conn.as_mut().expect("connection present until drop");

        let result = match limit {
            Some(limit) => match tokio::time::timeout(limit, conn.exchange(command, expectation))
                .await
            {
                Ok(result) => result,
                // The protocol has no cancel; the stream may still carry a
                // late reply, so the connection cannot be reused.
                Err(_) => Err(McError::Timeout),
            },
            None => conn.exchange(command, expectation).await,
        };

        if result.is_err() {
            self.valid = false;
        }
        result
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };

        if self.valid {
            pool.release(conn);
        } else {
            pool.release_slot();
        }
    }
}
