//! Thread-Safe Storage Engine with Expiry and Durability
//!
//! This module implements the core storage engine for LedgerKV.
//! It keeps every record in one in-memory map and writes each mutation
//! through a [`Persistence`] backend, either before returning (sync commit)
//! or at the next background flush (async commit).
//!
//! ## Design Decisions
//!
//! 1. **One RwLock**: `get` shares the lock; `set` and `delete` hold it
//!    exclusively for the whole map-plus-durability step, so a sync commit
//!    on one key blocks all other access until the log write finishes.
//! 2. **Extend, don't reset**: setting a key that already has a deadline
//!    pushes the old deadline out by the new TTL.
//! 3. **Lazy Expiry**: expired records are evicted when read. Eviction does
//!    not write a tombstone; replay drops expired entries by timestamp.
//!
//! ## Lifecycle
//!
//! ```text
//!   open ──> replay log ──> start flush loop ──> serve set/get/delete
//!                                                      │
//!   stop ──> stop flush loop ──> final flush ──> close log
//! ```

use crate::storage::clock::{Clock, SystemClock};
use crate::storage::flusher::Flusher;
use crate::storage::persistence::{Persistence, PersistenceError};
use crate::storage::record::Record;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default time between background flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Errors returned by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key has no value
    #[error("record does not exist")]
    NotFound,

    /// The key had a value but its TTL ran out
    #[error("record expired")]
    Expired,

    /// A durable write failed; the in-memory map was not changed
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    /// `stop` was already called
    #[error("storage engine already stopped")]
    AlreadyStopped,

    /// The blocking task running the final flush panicked
    #[error("shutdown task failed: {0}")]
    Shutdown(#[from] tokio::task::JoinError),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Settings for [`StorageEngine::open`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between background flushes of async writes
    pub flush_interval: Duration,
    /// Source of "now" for TTLs and replay
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            clock: Arc::new(SystemClock),
        }
    }
}

impl EngineConfig {
    pub fn new(flush_interval: Duration) -> Self {
        Self {
            flush_interval,
            ..Default::default()
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Point-in-time counters for the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: usize,
    pub gets: u64,
    pub sets: u64,
    pub deletes: u64,
    pub expired: u64,
    pub flush_failures: u64,
}

/// The main storage engine for LedgerKV.
///
/// Wrap it in an `Arc` and share it across all client handler tasks. All
/// operations are thread-safe.
///
/// # Example
///
/// ```
/// use ledgerkv::storage::{EngineConfig, NoopBackend, StorageEngine};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let engine = StorageEngine::open(Arc::new(NoopBackend::new()), EngineConfig::default());
///
/// engine.set("name", "Ariz", 0, true).unwrap();
/// assert_eq!(engine.get("name").unwrap(), "Ariz");
///
/// engine.stop().await.unwrap();
/// # });
/// ```
pub struct StorageEngine {
    /// Current record per key
    data: RwLock<HashMap<String, Record>>,

    /// Where mutations are made durable
    backend: Arc<dyn Persistence>,

    clock: Arc<dyn Clock>,

    /// Running flush loop (None once stopped)
    flusher: Mutex<Option<Flusher>>,

    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
    flush_failures: Arc<AtomicU64>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("backend", &self.backend)
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl StorageEngine {
    /// Replays `backend` into memory and starts the background flush loop.
    ///
    /// A log that fails to replay part-way is reported and the engine starts
    /// with whatever was read before the failure.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(backend: Arc<dyn Persistence>, config: EngineConfig) -> Self {
        let mut data = HashMap::new();
        if let Err(e) = backend.load(&mut data, config.clock.now()) {
            warn!(error = %e, "Error reading from log, some data might be missing");
        }
        info!(keys = data.len(), "Storage engine initialized");

        let flush_failures = Arc::new(AtomicU64::new(0));
        let flusher = Flusher::start(
            Arc::clone(&backend),
            config.flush_interval,
            Arc::clone(&flush_failures),
        );

        Self {
            data: RwLock::new(data),
            backend,
            clock: config.clock,
            flusher: Mutex::new(Some(flusher)),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            flush_failures,
        }
    }

    /// Sets `key` to `value`.
    ///
    /// `ttl_secs == 0` means no new lifetime. If the key already has a
    /// deadline, the deadline moves out by `ttl_secs`; otherwise it becomes
    /// now + `ttl_secs` (or never, for 0).
    ///
    /// A record whose deadline has passed but that nobody has read yet counts
    /// as absent: its stale deadline is not extended, and the new deadline
    /// starts from now.
    ///
    /// With `sync_commit` the record is on the log before this returns, and
    /// a failed write leaves memory untouched. Without it the record is
    /// buffered for the next flush and memory is updated regardless.
    pub fn set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
        sync_commit: bool,
    ) -> StorageResult<()> {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.data.write();
        let now = self.clock.now();

        // An expired record that nobody has read yet counts as absent.
        let current_deadline = data
            .get(key)
            .filter(|record| !record.is_expired_at(now))
            .and_then(|record| record.expires_at);

        let expires_at = match current_deadline {
            Some(deadline) => Some(add_ttl(deadline, ttl_secs)),
            None if ttl_secs == 0 => None,
            None => Some(add_ttl(now, ttl_secs)),
        };

        let record = Record {
            value: value.to_string(),
            expires_at,
        };

        if sync_commit {
            self.backend.save(key, &record)?;
        } else {
            self.backend.save_async(key, &record);
        }

        data.insert(key.to_string(), record);
        Ok(())
    }

    /// Gets the value for `key`.
    ///
    /// An expired record is evicted from memory on the way out and reported
    /// as [`StorageError::Expired`]; the next read reports
    /// [`StorageError::NotFound`].
    pub fn get(&self, key: &str) -> StorageResult<String> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        // Fast path under the shared lock
        {
            let data = self.data.read();
            match data.get(key) {
                None => return Err(StorageError::NotFound),
                Some(record) if !record.is_expired_at(self.clock.now()) => {
                    return Ok(record.value.clone());
                }
                Some(_) => {}
            }
        }

        // Expired: need the exclusive lock to evict
        let mut data = self.data.write();
        match data.get(key) {
            Some(record) if !record.is_expired_at(self.clock.now()) => {
                // Race: a writer replaced the record in between
                Ok(record.value.clone())
            }
            Some(_) => {
                data.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Evicted expired record");
                Err(StorageError::Expired)
            }
            // Another reader evicted it first
            None => Err(StorageError::Expired),
        }
    }

    /// Deletes `key`. Deleting a missing key succeeds.
    ///
    /// A tombstone is written synchronously or buffered, following the same
    /// rules as [`StorageEngine::set`].
    pub fn delete(&self, key: &str, sync_commit: bool) -> StorageResult<()> {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.data.write();

        if sync_commit {
            self.backend.delete(key)?;
        } else {
            self.backend.delete_async(key);
        }

        data.remove(key);
        Ok(())
    }

    /// Flushes pending async writes right now.
    pub fn flush_now(&self) -> StorageResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Stops the flush loop, flushes what is still pending and closes the
    /// backend.
    ///
    /// The returned future resolving is the shutdown completion signal; it
    /// has no deadline of its own. The close is attempted even when the
    /// final flush fails, and the flush error is the one reported.
    pub async fn stop(&self) -> StorageResult<()> {
        let flusher = self.flusher.lock().take();
        let Some(flusher) = flusher else {
            return Err(StorageError::AlreadyStopped);
        };

        flusher.shutdown().await;

        let backend = Arc::clone(&self.backend);
        let (flushed, closed) = tokio::task::spawn_blocking(move || {
            let flushed = backend.flush();
            if let Err(e) = &flushed {
                warn!(error = %e, "Final flush failed, pending writes lost");
            }
            (flushed, backend.stop())
        })
        .await?;

        flushed?;
        closed?;

        info!(keys = self.len(), "Storage engine stopped");
        Ok(())
    }

    /// Returns the number of keys in memory, including expired records that
    /// have not been read since they expired.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len(),
            gets: self.get_count.load(Ordering::Relaxed),
            sets: self.set_count.load(Ordering::Relaxed),
            deletes: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
        }
    }

    /// Returns the deadline currently stored for `key`, if any.
    #[cfg(test)]
    fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.data.read().get(key).and_then(|r| r.expires_at)
    }
}

/// `base + ttl_secs`, saturating at the largest representable instant.
fn add_ttl(base: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| base.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
