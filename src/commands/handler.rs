//! Command Handler Module
//!
//! This module turns parsed requests into storage engine calls and storage
//! results into RESP replies. It is the only place that validates input;
//! the engine trusts what it is given.
//!
//! ## Supported Commands
//!
//! - `SET key value [EX seconds] [SYNC]` - Set a key, optionally extending its TTL
//! - `GET key` - Get a key's value
//! - `DEL key [SYNC]` - Delete a key
//! - `PING [message]` - Test connection
//! - `ECHO message` - Echo message
//! - `DBSIZE` - Number of keys in memory
//! - `SAVE` - Flush pending asynchronous writes now
//! - `QUIT` - Close the connection
//!
//! Without `SYNC` a write is acknowledged once it is in memory and reaches
//! the log at the next background flush.
//!
//! ## Error Replies
//!
//! ```text
//! validation failure  ->  -ERR ...
//! missing / expired   ->  -NOTFOUND record not found | record expired
//! failed durable write -> -ABORTED failed to add record | failed to delete record
//! ```

use crate::protocol::{Frame, Request};
use crate::storage::{StorageEngine, StorageError};
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

/// Dispatches requests to the storage engine.
#[derive(Clone)]
pub struct CommandHandler {
    /// The storage engine
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Executes one request and returns the reply.
    ///
    /// Callers skip empty requests before getting here.
    pub fn execute(&self, request: &Request) -> Frame {
        let Some((name, args)) = request.split_first() else {
            return Frame::error("ERR empty command");
        };

        let cmd = String::from_utf8_lossy(name).to_uppercase();
        self.dispatch(&cmd, args)
    }

    /// Returns true if `request` asks to close the connection.
    pub fn is_quit(request: &Request) -> bool {
        request
            .first()
            .map(|name| name.eq_ignore_ascii_case(b"QUIT"))
            .unwrap_or(false)
    }

    fn dispatch(&self, cmd: &str, args: &[Bytes]) -> Frame {
        match cmd {
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "DEL" => self.cmd_del(args),
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "SAVE" => self.cmd_save(args),
            "QUIT" => Frame::ok(),
            _ => Frame::error(format!("ERR unknown command '{}'", cmd)),
        }
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    fn wrong_arity(cmd: &str) -> Frame {
        Frame::error(format!("ERR wrong number of arguments for '{}' command", cmd))
    }

    /// Decodes a key, rejecting empty or non-UTF-8 input.
    fn key(arg: &Bytes) -> Result<&str, Frame> {
        match std::str::from_utf8(arg) {
            Ok("") => Err(Frame::error("ERR key should not be empty")),
            Ok(key) => Ok(key),
            Err(_) => Err(Frame::error("ERR key must be valid UTF-8")),
        }
    }

    fn value(arg: &Bytes) -> Result<&str, Frame> {
        match std::str::from_utf8(arg) {
            Ok("") => Err(Frame::error("ERR value should not be empty")),
            Ok(value) => Ok(value),
            Err(_) => Err(Frame::error("ERR value must be valid UTF-8")),
        }
    }

    fn option(arg: &Bytes) -> String {
        String::from_utf8_lossy(arg).to_uppercase()
    }

    // ========================================================================
    // Storage Commands
    // ========================================================================

    /// SET key value [EX seconds] [SYNC]
    fn cmd_set(&self, args: &[Bytes]) -> Frame {
        if args.len() < 2 {
            return Self::wrong_arity("SET");
        }

        let key = match Self::key(&args[0]) {
            Ok(k) => k,
            Err(reply) => return reply,
        };
        let value = match Self::value(&args[1]) {
            Ok(v) => v,
            Err(reply) => return reply,
        };

        let mut ttl_secs = 0u64;
        let mut sync_commit = false;

        let mut i = 2;
        while i < args.len() {
            match Self::option(&args[i]).as_str() {
                "EX" => {
                    let Some(raw) = args.get(i + 1) else {
                        return Frame::error("ERR syntax error");
                    };
                    ttl_secs = match std::str::from_utf8(raw).ok().and_then(|s| s.parse().ok()) {
                        Some(secs) => secs,
                        None => {
                            return Frame::error("ERR value is not an integer or out of range")
                        }
                    };
                    i += 2;
                }
                "SYNC" => {
                    sync_commit = true;
                    i += 1;
                }
                _ => return Frame::error("ERR syntax error"),
            }
        }

        match self.storage.set(key, value, ttl_secs, sync_commit) {
            Ok(()) => Frame::ok(),
            Err(e) => {
                warn!(key = key, error = %e, "SET failed");
                Frame::error("ABORTED failed to add record")
            }
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> Frame {
        if args.len() != 1 {
            return Self::wrong_arity("GET");
        }

        let key = match Self::key(&args[0]) {
            Ok(k) => k,
            Err(reply) => return reply,
        };

        match self.storage.get(key) {
            Ok(value) => Frame::bulk(value),
            Err(StorageError::NotFound) => Frame::error("NOTFOUND record not found"),
            Err(StorageError::Expired) => Frame::error("NOTFOUND record expired"),
            Err(e) => Frame::error(format!("ERR {}", e)),
        }
    }

    /// DEL key [SYNC]
    fn cmd_del(&self, args: &[Bytes]) -> Frame {
        let sync_commit = match args {
            [_] => false,
            [_, opt] if Self::option(opt) == "SYNC" => true,
            [_, _] => return Frame::error("ERR syntax error"),
            _ => return Self::wrong_arity("DEL"),
        };

        let key = match Self::key(&args[0]) {
            Ok(k) => k,
            Err(reply) => return reply,
        };

        match self.storage.delete(key, sync_commit) {
            Ok(()) => Frame::ok(),
            Err(e) => {
                warn!(key = key, error = %e, "DEL failed");
                Frame::error("ABORTED failed to delete record")
            }
        }
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> Frame {
        match args {
            [] => Frame::pong(),
            [message] => Frame::bulk(message.clone()),
            _ => Self::wrong_arity("PING"),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> Frame {
        match args {
            [message] => Frame::bulk(message.clone()),
            _ => Self::wrong_arity("ECHO"),
        }
    }

    /// DBSIZE
    fn cmd_dbsize(&self, _args: &[Bytes]) -> Frame {
        Frame::integer(self.storage.len() as i64)
    }

    /// SAVE
    fn cmd_save(&self, _args: &[Bytes]) -> Frame {
        match self.storage.flush_now() {
            Ok(()) => Frame::ok(),
            Err(e) => {
                warn!(error = %e, "SAVE failed");
                Frame::error("ABORTED failed to flush pending writes")
            }
        }
    }
}
