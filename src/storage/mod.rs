//! Storage Engine Module
//!
//! This module provides the core storage functionality for LedgerKV:
//! an in-memory record map with TTLs, written through to an append-only log.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │           RwLock<HashMap<String, Record>>                   │
//! └───────────────┬───────────────────────────▲─────────────────┘
//!                 │ save / save_async         │ load (startup)
//!                 ▼                           │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Persistence backend                         │
//! │   pending buffer ──flush──> append-only log (JSON lines)    │
//! └───────────────▲─────────────────────────────────────────────┘
//!                 │ flush every interval
//!   ┌─────────────┴─────────────┐
//!   │         Flusher           │
//!   │  (Background Tokio Task)  │
//!   └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **RwLock**: Multiple concurrent readers, exclusive writers
//! - **TTL Support**: Deadlines accumulate when a key is set again
//! - **Lazy Expiry**: Expired keys are evicted on access
//! - **Sync/Async Commit**: Per-call choice between durable-now and
//!   durable-at-next-flush
//! - **Replay**: The log is replayed into memory on startup
//!
//! ## Example
//!
//! ```
//! use ledgerkv::storage::{EngineConfig, NoopBackend, StorageEngine, StorageError};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let engine = StorageEngine::open(Arc::new(NoopBackend::new()), EngineConfig::default());
//!
//! engine.set("session", "token123", 3600, false).unwrap();
//! assert_eq!(engine.get("session").unwrap(), "token123");
//!
//! engine.delete("session", true).unwrap();
//! assert!(matches!(engine.get("session"), Err(StorageError::NotFound)));
//! # });
//! ```

pub mod clock;
pub mod engine;
pub mod flusher;
pub mod persistence;
pub mod record;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineConfig, StorageEngine, StorageError, StorageResult, StorageStats};
pub use flusher::Flusher;
pub use persistence::{
    FsyncPolicy, JsonFileBackend, NoopBackend, Persistence, PersistenceError, PersistenceResult,
};
pub use record::{LogEntry, LogRecord, Record};
