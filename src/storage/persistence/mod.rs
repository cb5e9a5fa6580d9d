//! Persistence Backends
//!
//! The engine keeps every record in memory and hands durability to a
//! [`Persistence`] backend. A backend is an append-only log of
//! `(key, record)` entries with two write paths:
//!
//! - **Synchronous** (`save` / `delete`): the entry is on the log when the
//!   call returns.
//! - **Asynchronous** (`save_async` / `delete_async`): the entry waits in a
//!   pending buffer, one slot per key, until the next `flush`.
//!
//! ```text
//!   save ──────────────────────────────┐
//!                                      ▼
//!   save_async ──> pending[key] ──> flush ──> append-only log
//!                        ▲
//!          save(key) clears pending[key]
//! ```
//!
//! On startup the log is replayed with [`replay_entry`]: later entries win,
//! tombstones remove the key, and entries already past their expiration are
//! skipped.

pub mod json_file;
pub mod noop;

pub use json_file::{FsyncPolicy, JsonFileBackend};
pub use noop::NoopBackend;

use crate::storage::record::{LogRecord, Record};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O error on the log file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry could not be encoded
    #[error("failed to encode log entry: {0}")]
    Encode(#[source] serde_json::Error),

    /// A log line could not be decoded
    #[error("corrupt log entry at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The backend was stopped
    #[error("persistence backend is closed")]
    Closed,
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// An append-only log that the storage engine replays and writes through.
///
/// Implementations serialize their own writes; every method may be called
/// from several threads at once.
pub trait Persistence: Send + Sync + std::fmt::Debug {
    /// Replays the whole log into `into`, skipping entries expired as of `now`.
    fn load(&self, into: &mut HashMap<String, Record>, now: DateTime<Utc>)
        -> PersistenceResult<()>;

    /// Appends `record` for `key` immediately and drops any pending write
    /// for `key`.
    fn save(&self, key: &str, record: &Record) -> PersistenceResult<()>;

    /// Makes `record` the pending write for `key`.
    fn save_async(&self, key: &str, record: &Record);

    /// Appends a tombstone for `key` immediately.
    fn delete(&self, key: &str) -> PersistenceResult<()>;

    /// Makes a tombstone the pending write for `key`.
    fn delete_async(&self, key: &str);

    /// Appends every pending write to the log and clears the buffer.
    fn flush(&self) -> PersistenceResult<()>;

    /// Releases the log. Calling it again is a no-op.
    fn stop(&self) -> PersistenceResult<()>;
}

/// Applies one log entry to a map being rebuilt from the log.
pub fn replay_entry(
    map: &mut HashMap<String, Record>,
    key: String,
    record: LogRecord,
    now: DateTime<Utc>,
) {
    match record {
        LogRecord::Tombstone => {
            map.remove(&key);
        }
        LogRecord::Value { value, expires_at } => {
            let record = Record { value, expires_at };
            if record.is_expired_at(now) {
                return;
            }
            map.insert(key, record);
        }
    }
}
