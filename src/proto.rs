//! # Memcached Text Protocol
//!
//! Purpose: Encode command lines and decode server replies for the ASCII
//! protocol without touching a socket, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **Explicit State Machine**: Replies are decoded by a small FSM driven
//!    through a single `feed` entry point, testable on canned chunks.
//! 2. **Driver Pull Model**: `read_hint` tells the I/O layer whether the
//!    next chunk is a CRLF line or an exact byte count.
//! 3. **Binary-Safe**: Value payloads are raw bytes, framed by the
//!    byte-length declared in the VALUE header.
//! 4. **Fail Fast**: Any framing violation resolves to a protocol error
//!    carrying the offending reply line.

use crate::error::{McError, McResult};

/// Longest key the protocol accepts.
pub const MAX_KEY_LEN: usize = 250;

/// Largest value payload a VALUE header may declare, matching the server's
/// default item size limit. Anything larger is treated as a framing
/// violation rather than an allocation request.
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

/// What kind of reply a command expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// A fixed literal acknowledgement line, e.g. `STORED` or `DELETED`.
    Ack(&'static str),
    /// A value reply: `VALUE ... END`, a bare integer, or a miss line.
    Value,
}

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Acknowledgement matched, or a value command missed (`END`,
    /// `NOT_FOUND`).
    NoValue,
    /// Numeric reply to `incr`/`decr`.
    Integer(u64),
    /// Value payload from `get`, exactly as many bytes as the header
    /// declared.
    Bytes(Vec<u8>),
}

/// What the decoder needs next from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadHint {
    /// One CRLF-terminated line, terminator included.
    Line,
    /// Exactly this many raw bytes.
    Exact(usize),
}

#[derive(Debug)]
enum State {
    AwaitAck { expect: &'static str },
    AwaitValueHeader,
    AwaitValueBytes { len: usize },
    AwaitTrailer { value: Vec<u8> },
    Done,
}

/// Incremental decoder for one reply.
///
/// Construct one per command, then loop: ask `read_hint`, read that chunk
/// from the stream, and `feed` it. A `Some(reply)` return is terminal.
#[derive(Debug)]
pub struct ResponseDecoder {
    state: State,
}

impl ResponseDecoder {
    /// Creates a decoder for the given expectation.
    pub fn new(expectation: Expectation) -> Self {
        let state = match expectation {
            Expectation::Ack(expect) => State::AwaitAck { expect },
            Expectation::Value => State::AwaitValueHeader,
        };
        ResponseDecoder { state }
    }

    /// Returns the shape of the next chunk to feed.
    pub fn read_hint(&self) -> ReadHint {
        match self.state {
            // Payload plus its trailing CRLF.
            State::AwaitValueBytes { len } => ReadHint::Exact(len + 2),
            _ => ReadHint::Line,
        }
    }

    /// Consumes one chunk and advances the state machine.
    ///
    /// Line chunks must include their CRLF terminator; the decoder strips
    /// and validates it. Returns `Ok(Some(reply))` on a terminal state.
    pub fn feed(&mut self, chunk: &[u8]) -> McResult<Option<Reply>> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::AwaitAck { expect } => {
                let line = strip_crlf(chunk)?;
                if line == expect.as_bytes() {
                    Ok(Some(Reply::NoValue))
                } else {
                    Err(McError::protocol(line))
                }
            }
            State::AwaitValueHeader => {
                let line = strip_crlf(chunk)?;
                if line.starts_with(b"VALUE") {
                    let len = parse_value_header(line)?;
                    self.state = State::AwaitValueBytes { len };
                    Ok(None)
                } else if !line.is_empty() && line.iter().all(u8::is_ascii_digit) {
                    Ok(Some(Reply::Integer(parse_u64(line)?)))
                } else {
                    // END with no VALUE (miss), NOT_FOUND from incr/decr.
                    Ok(Some(Reply::NoValue))
                }
            }
            State::AwaitValueBytes { len } => {
                debug_assert_eq!(chunk.len(), len + 2);
                if !chunk.ends_with(b"\r\n") {
                    return Err(McError::protocol(chunk));
                }
                self.state = State::AwaitTrailer {
                    value: chunk[..len].to_vec(),
                };
                Ok(None)
            }
            State::AwaitTrailer { value } => {
                let line = strip_crlf(chunk)?;
                if line == b"END" {
                    Ok(Some(Reply::Bytes(value)))
                } else {
                    Err(McError::protocol(line))
                }
            }
            State::Done => Err(McError::protocol(chunk)),
        }
    }
}

fn strip_crlf(chunk: &[u8]) -> McResult<&[u8]> {
    if chunk.len() < 2 || !chunk.ends_with(b"\r\n") {
        return Err(McError::protocol(chunk));
    }
    Ok(&chunk[..chunk.len() - 2])
}

/// Parses `VALUE <key> <flags> <bytes>` and returns the byte length.
fn parse_value_header(line: &[u8]) -> McResult<usize> {
    let mut fields = line.split(|b| b.is_ascii_whitespace()).filter(|f| !f.is_empty());
    let token = fields.next();
    let key = fields.next();
    let flags = fields.next();
    let bytes = fields.next();
    match (token, key, flags, bytes, fields.next()) {
        (Some(b"VALUE"), Some(_), Some(flags), Some(bytes), None)
            if is_digits(flags) && is_digits(bytes) =>
        {
            let len = parse_u64(bytes)?;
            if len > MAX_VALUE_LEN as u64 {
                return Err(McError::protocol(line));
            }
            Ok(len as usize)
        }
        _ => Err(McError::protocol(line)),
    }
}

fn is_digits(data: &[u8]) -> bool {
    !data.is_empty() && data.iter().all(u8::is_ascii_digit)
}

fn parse_u64(data: &[u8]) -> McResult<u64> {
    let mut value: u64 = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(McError::protocol(data));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as u64))
            .ok_or_else(|| McError::protocol(data))?;
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Command formatting
// ---------------------------------------------------------------------------

/// Rejects keys the server would refuse: empty, over 250 bytes, or
/// containing whitespace/control bytes.
pub fn validate_key(key: &[u8]) -> McResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(McError::InvalidKey);
    }
    if key.iter().any(|&b| b <= b' ' || b == 0x7f) {
        return Err(McError::InvalidKey);
    }
    Ok(())
}

/// Formats a storage command: `<verb> <key> <flags> <exptime> <bytes>`
/// followed by the data block.
pub fn storage_command(
    verb: &str,
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
) -> McResult<Vec<u8>> {
    validate_key(key)?;
    let mut out = Vec::with_capacity(verb.len() + key.len() + value.len() + 32);
    out.extend_from_slice(verb.as_bytes());
    out.push(b' ');
    out.extend_from_slice(key);
    let header = format!(" {} {} {}\r\n", flags, exptime, value.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
    Ok(out)
}

/// Formats a single-key command: `get <key>` or `delete <key>`.
pub fn key_command(verb: &str, key: &[u8]) -> McResult<Vec<u8>> {
    validate_key(key)?;
    let mut out = Vec::with_capacity(verb.len() + key.len() + 3);
    out.extend_from_slice(verb.as_bytes());
    out.push(b' ');
    out.extend_from_slice(key);
    out.extend_from_slice(b"\r\n");
    Ok(out)
}

/// Formats `incr <key> <delta>` or `decr <key> <delta>`.
pub fn delta_command(verb: &str, key: &[u8], delta: u64) -> McResult<Vec<u8>> {
    validate_key(key)?;
    let mut out = Vec::with_capacity(verb.len() + key.len() + 24);
    out.extend_from_slice(verb.as_bytes());
    out.push(b' ');
    out.extend_from_slice(key);
    let tail = format!(" {}\r\n", delta);
    out.extend_from_slice(tail.as_bytes());
    Ok(out)
}
