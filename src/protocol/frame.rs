//! RESP reply values.
//!
//! Each reply starts with a type prefix byte and ends with CRLF:
//!
//! - `+OK\r\n` simple string
//! - `-NOTFOUND record not found\r\n` error
//! - `:42\r\n` integer
//! - `$4\r\nAriz\r\n` bulk string, `$-1\r\n` null
//! - `*2\r\n...` array

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// A reply sent back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Short status line, must not contain CR or LF
    Simple(String),
    /// Error line, first word is the error code
    Error(String),
    Integer(i64),
    /// Binary-safe string
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    pub fn simple(s: impl Into<String>) -> Self {
        Frame::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Frame::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Frame::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    pub fn null() -> Self {
        Frame::Null
    }

    pub fn array(values: Vec<Frame>) -> Self {
        Frame::Array(values)
    }

    /// Common reply for successful operations
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    pub fn pong() -> Self {
        Frame::Simple("PONG".to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Encodes the frame into its wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the frame onto the end of `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => line(buf, b'+', s.as_bytes()),
            Frame::Error(s) => line(buf, b'-', s.as_bytes()),
            Frame::Integer(n) => line(buf, b':', n.to_string().as_bytes()),
            Frame::Bulk(data) => {
                line(buf, b'$', data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Frame::Null => line(buf, b'$', b"-1"),
            Frame::Array(values) => {
                line(buf, b'*', values.len().to_string().as_bytes());
                for value in values {
                    value.encode_into(buf);
                }
            }
        }
    }
}

fn line(buf: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "{}", s),
            Frame::Error(s) => write!(f, "(error) {}", s),
            Frame::Integer(n) => write!(f, "(integer) {}", n),
            Frame::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Frame::Null => write!(f, "(nil)"),
            Frame::Array(values) => write!(f, "(array, {} items)", values.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_simple_and_error() {
        assert_eq!(Frame::ok().encode(), b"+OK\r\n");
        assert_eq!(Frame::pong().encode(), b"+PONG\r\n");
        assert_eq!(
            Frame::error("NOTFOUND record expired").encode(),
            b"-NOTFOUND record expired\r\n"
        );
    }

    #[test]
    fn test_encode_integer() {
        assert_eq!(Frame::integer(1000).encode(), b":1000\r\n");
        assert_eq!(Frame::integer(-42).encode(), b":-42\r\n");
    }

    #[test]
    fn test_encode_bulk_and_null() {
        assert_eq!(Frame::bulk("hello").encode(), b"$5\r\nhello\r\n");
        assert_eq!(Frame::bulk("").encode(), b"$0\r\n\r\n");
        assert_eq!(Frame::null().encode(), b"$-1\r\n");
    }

    #[test]
    fn test_encode_nested_array() {
        let value = Frame::array(vec![
            Frame::integer(1),
            Frame::array(vec![Frame::bulk("a"), Frame::null()]),
        ]);
        assert_eq!(value.encode(), b"*2\r\n:1\r\n*2\r\n$1\r\na\r\n$-1\r\n");
    }

    #[test]
    fn test_display() {
        assert_eq!(Frame::bulk("v").to_string(), "\"v\"");
        assert_eq!(Frame::null().to_string(), "(nil)");
        assert_eq!(Frame::error("ERR x").to_string(), "(error) ERR x");
    }
}
