//! RESP Protocol Implementation
//!
//! LedgerKV speaks the Redis Serialization Protocol (RESP2), so `redis-cli`
//! and ordinary Redis client libraries can talk to it.
//!
//! ## Modules
//!
//! - `request`: Incremental parser for client requests
//! - `frame`: Reply values and their wire encoding
//!
//! ## Example
//!
//! ```
//! use ledgerkv::protocol::{parse_request, Frame};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (args, consumed) = parse_request(data).unwrap().unwrap();
//! assert_eq!(args, vec![Bytes::from("GET"), Bytes::from("name")]);
//! assert_eq!(consumed, data.len());
//!
//! // Creating replies
//! let reply = Frame::bulk("Ariz");
//! assert_eq!(reply.encode(), b"$4\r\nAriz\r\n");
//! ```

pub mod frame;
pub mod request;

// Re-export commonly used types for convenience
pub use frame::Frame;
pub use request::{parse_request, ProtocolError, ProtocolResult, Request};
