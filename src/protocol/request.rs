//! Incremental Request Parser
//!
//! Clients send a request as either:
//!
//! - a RESP array of bulk strings: `*2\r\n$3\r\nGET\r\n$1\r\na\r\n`
//! - an inline command line: `GET a\r\n` (what `telnet` and `nc` produce)
//!
//! [`parse_request`] looks at the front of a buffer and returns:
//! - `Ok(Some((args, consumed)))` - one complete request, `consumed` bytes used
//! - `Ok(None)` - the request is incomplete, read more and try again
//! - `Err(ProtocolError)` - the bytes can never form a valid request
//!
//! A blank inline line or `*0` yields an empty argument list, which callers
//! skip.

use crate::protocol::frame::CRLF;
use bytes::Bytes;
use thiserror::Error;

/// Largest accepted bulk string (64 MB)
pub const MAX_BULK_LEN: usize = 64 * 1024 * 1024;

/// Largest accepted argument count
pub const MAX_ARGS: usize = 1024;

/// Longest inline command line (64 KB)
pub const MAX_INLINE_LEN: usize = 64 * 1024;

/// The arguments of one request, command name first.
pub type Request = Vec<Bytes>;

/// Errors that make a request unparseable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid length: {0:?}")]
    InvalidLength(String),

    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    #[error("expected '$', got {0:#04x}")]
    ExpectedBulk(u8),

    #[error("too many arguments: {count} (max: {max})")]
    TooManyArguments { count: usize, max: usize },

    #[error("bulk string too large: {size} bytes (max: {max})")]
    BulkTooLarge { size: usize, max: usize },

    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    #[error("inline request too long")]
    InlineTooLong,

    #[error("invalid UTF-8 in inline request")]
    InvalidUtf8,
}

/// Result type for request parsing.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Parses one request from the front of `buf`.
pub fn parse_request(buf: &[u8]) -> ProtocolResult<Option<(Request, usize)>> {
    match buf.first() {
        None => Ok(None),
        Some(b'*') => parse_multibulk(buf),
        Some(_) => parse_inline(buf),
    }
}

/// `*<count>\r\n` followed by `count` bulk strings.
fn parse_multibulk(buf: &[u8]) -> ProtocolResult<Option<(Request, usize)>> {
    let Some((count, mut pos)) = read_length(buf, 1)? else {
        return Ok(None);
    };

    if count < 0 {
        return Err(ProtocolError::InvalidArrayLength(count));
    }
    let count = count as usize;
    if count > MAX_ARGS {
        return Err(ProtocolError::TooManyArguments {
            count,
            max: MAX_ARGS,
        });
    }

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        match buf.get(pos) {
            None => return Ok(None),
            Some(b'$') => {}
            Some(&other) => return Err(ProtocolError::ExpectedBulk(other)),
        }

        let Some((len, data_start)) = read_length(buf, pos + 1)? else {
            return Ok(None);
        };
        if len < 0 {
            return Err(ProtocolError::InvalidBulkLength(len));
        }
        let len = len as usize;
        if len > MAX_BULK_LEN {
            return Err(ProtocolError::BulkTooLarge {
                size: len,
                max: MAX_BULK_LEN,
            });
        }

        let data_end = data_start + len;
        if buf.len() < data_end + 2 {
            return Ok(None);
        }
        if &buf[data_end..data_end + 2] != CRLF {
            return Err(ProtocolError::MissingCrlf);
        }

        args.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
        pos = data_end + 2;
    }

    Ok(Some((args, pos)))
}

/// A whitespace-separated line ending in `\n` or `\r\n`.
fn parse_inline(buf: &[u8]) -> ProtocolResult<Option<(Request, usize)>> {
    let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_INLINE_LEN {
            return Err(ProtocolError::InlineTooLong);
        }
        return Ok(None);
    };

    let line = &buf[..newline];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let line = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;

    let args = line
        .split_whitespace()
        .map(|part| Bytes::copy_from_slice(part.as_bytes()))
        .collect();

    Ok(Some((args, newline + 1)))
}

/// Reads the decimal length line starting at `start`.
///
/// Returns the length and the offset just past its CRLF.
fn read_length(buf: &[u8], start: usize) -> ProtocolResult<Option<(i64, usize)>> {
    let Some(rest) = buf.get(start..) else {
        return Ok(None);
    };
    let Some(end) = rest.windows(2).position(|w| w == CRLF) else {
        return Ok(None);
    };

    let digits = &rest[..end];
    let len = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidLength(String::from_utf8_lossy(digits).into()))?;

    Ok(Some((len, start + end + 2)))
}
