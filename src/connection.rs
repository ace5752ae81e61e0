//! # Connection
//!
//! Purpose: Own one TCP stream to the cache server and drive the reply
//! decoder over it, one command at a time.
//!
//! ## Design Principles
//! 1. **Half-Duplex**: `&mut self` on `exchange` makes pipelining
//!    unrepresentable; a new command cannot start before the previous
//!    reply is fully consumed.
//! 2. **Pull Parsing**: Bytes accumulate in a `BytesMut`; the decoder's
//!    `read_hint` decides when enough has arrived.
//! 3. **Settle Faults Locally**: Peer close and framing violations resolve
//!    into the pending request's result, never past it.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::{McError, McResult};
use crate::pool::PoolConfig;
use crate::proto::{Expectation, ReadHint, Reply, ResponseDecoder};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// One established connection to the server.
#[derive(Debug)]
pub(crate) struct Connection {
    id: u64,
    stream: TcpStream,
    buf: BytesMut,
    closed: bool,
}

impl Connection {
    /// Dials the configured server.
    pub(crate) async fn open(config: &PoolConfig) -> McResult<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let connect = TcpStream::connect(&addr);
        let stream = match config.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
            },
            None => connect.await,
        }
        .map_err(|source| McError::Connect {
            addr: addr.clone(),
            source,
        })?;
        // Small request/reply exchanges; Nagle only adds latency here.
        stream.set_nodelay(true).map_err(McError::Io)?;

        Ok(Connection {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            stream,
            buf: BytesMut::with_capacity(4 * 1024),
            closed: false,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Writes one command and decodes its full reply.
    pub(crate) async fn exchange(
        &mut self,
        command: &[u8],
        expectation: Expectation,
    ) -> McResult<Reply> {
        self.stream.write_all(command).await?;

        let mut decoder = ResponseDecoder::new(expectation);
        loop {
            let ready = match decoder.read_hint() {
                ReadHint::Line => self.buf.iter().position(|&b| b == b'\n').map(|pos| pos + 1),
                ReadHint::Exact(len) => (self.buf.len() >= len).then_some(len),
            };

            let len = match ready {
                Some(len) => len,
                None => {
                    let read = self.stream.read_buf(&mut self.buf).await?;
                    if read == 0 {
                        self.closed = true;
                        return Err(McError::PeerClosed);
                    }
                    continue;
                }
            };

            let chunk = self.buf.split_to(len);
            if let Some(reply) = decoder.feed(&chunk)? {
                if !self.buf.is_empty() {
                    // Bytes after a terminal reply mean the stream is
                    // desynced; the reply cannot be trusted either.
                    return Err(McError::protocol(&self.buf));
                }
                return Ok(reply);
            }
        }
    }

    /// Reports whether the peer has gone away.
    ///
    /// Used by the pool when revalidating an idle connection. An idle
    /// connection owes the server nothing, so any readable byte (or EOF)
    /// means it cannot be reused.
    pub(crate) fn is_closed(&self) -> bool {
        if self.closed {
            return true;
        }
        let mut probe = [0u8; 1];
        match self.stream.try_read(&mut probe) {
            Ok(0) => true,
            Ok(_) => true,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}
