//! JSON-Lines Append-Only File
//!
//! Every write is one JSON document on its own line:
//!
//! ```text
//! {"key":"a","record":{"kind":"value","value":"1","expires_at":"2026-01-01T00:01:00Z"}}
//! {"key":"a","record":{"kind":"tombstone"}}
//! ```
//!
//! The file is only ever appended to. Replaying it from the top rebuilds the
//! latest state of every key.
//!
//! ## Locking
//!
//! The append handle and the pending-writes buffer live behind one mutex, so
//! a background `flush` and foreground `save` calls never interleave partial
//! lines. For a single key, writes reach the file in the order they take the
//! lock.
//!
//! ## Failed writes
//!
//! Each commit is a single unbuffered `write_all` of whole lines. If the
//! write (or its fsync) fails, the file is cut back to its length before the
//! write, so nothing a caller was told failed can reappear on replay. A torn
//! final line left by a crash is cut off by `load` for the same reason.

use super::{replay_entry, Persistence, PersistenceError, PersistenceResult};
use crate::storage::record::{LogEntry, LogRecord, Record};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Whether committed writes are forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// Leave it to the OS page cache
    #[default]
    Never,
    /// `fdatasync` after every synchronous write and every flush
    Always,
}

#[derive(Debug)]
struct Inner {
    /// Append handle (None once stopped)
    file: Option<File>,
    /// Latest not-yet-flushed record per key
    pending: HashMap<String, LogRecord>,
    /// Makes the next append write half its bytes and then fail
    #[cfg(test)]
    tear_next_write: bool,
}

impl Inner {
    /// Appends `bytes` as one unit: either all of them are in the file
    /// (and synced, under [`FsyncPolicy::Always`]) or none are.
    fn append(&mut self, bytes: &[u8], fsync: FsyncPolicy) -> PersistenceResult<()> {
        #[cfg(test)]
        let tear = std::mem::take(&mut self.tear_next_write);
        #[cfg(not(test))]
        let tear = false;

        let file = self.file.as_mut().ok_or(PersistenceError::Closed)?;
        let start = file.metadata()?.len();

        let result = if tear {
            file.write_all(&bytes[..bytes.len() / 2])
                .and_then(|()| Err(io::Error::other("write torn mid-line")))
        } else {
            write_durably(file, bytes, fsync)
        };

        let Err(e) = result else {
            return Ok(());
        };

        if let Err(undo) = file.set_len(start) {
            // The tail now holds bytes of a failed write. Appending after
            // them would corrupt the next line too, so stop writing.
            error!(error = %undo, "Failed to roll back partial log write, closing log");
            self.file = None;
        }
        Err(e.into())
    }
}

fn write_durably(file: &mut File, bytes: &[u8], fsync: FsyncPolicy) -> io::Result<()> {
    file.write_all(bytes)?;
    if fsync == FsyncPolicy::Always {
        file.sync_data()?;
    }
    Ok(())
}

fn encode_line(out: &mut Vec<u8>, entry: &LogEntry) -> PersistenceResult<()> {
    serde_json::to_writer(&mut *out, entry).map_err(PersistenceError::Encode)?;
    out.push(b'\n');
    Ok(())
}

/// A [`Persistence`] backend writing JSON lines to a single file.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    fsync: FsyncPolicy,
    inner: Mutex<Inner>,
}

impl JsonFileBackend {
    /// Opens the log at `path`, creating it and its parent directories if
    /// they don't exist.
    pub fn open(path: impl Into<PathBuf>, fsync: FsyncPolicy) -> PersistenceResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), ?fsync, "Opened append-only log");

        Ok(Self {
            path,
            fsync,
            inner: Mutex::new(Inner {
                file: Some(file),
                pending: HashMap::new(),
                #[cfg(test)]
                tear_next_write: false,
            }),
        })
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of keys waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Returns true once [`Persistence::stop`] has released the file.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().file.is_none()
    }

    #[cfg(test)]
    fn tear_next_write(&self) {
        self.inner.lock().tear_next_write = true;
    }

    fn write_now(&self, key: &str, record: LogRecord) -> PersistenceResult<()> {
        let mut inner = self.inner.lock();
        if inner.file.is_none() {
            return Err(PersistenceError::Closed);
        }

        let mut line = Vec::new();
        encode_line(&mut line, &LogEntry::new(key, record))?;
        inner.append(&line, self.fsync)?;

        // A committed write supersedes whatever was still buffered.
        inner.pending.remove(key);
        Ok(())
    }

    fn buffer(&self, key: &str, record: LogRecord) {
        let mut inner = self.inner.lock();
        if inner.file.is_none() {
            warn!(key = key, "Log is closed, dropping asynchronous write");
            return;
        }
        inner.pending.insert(key.to_string(), record);
    }
}

impl Persistence for JsonFileBackend {
    fn load(
        &self,
        into: &mut HashMap<String, Record>,
        now: DateTime<Utc>,
    ) -> PersistenceResult<()> {
        // Hold the lock so no append lands mid-scan.
        let mut inner = self.inner.lock();

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut offset = 0u64;
        let mut line_no = 0usize;
        let mut entries = 0usize;

        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            let start = offset;
            offset += n as u64;
            line_no += 1;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<LogEntry>(&line) {
                Ok(entry) => {
                    replay_entry(into, entry.key, entry.record, now);
                    entries += 1;
                    if line.last() != Some(&b'\n') {
                        // Valid but unterminated: the next append must not
                        // land on the same line.
                        inner.append(b"\n", self.fsync)?;
                    }
                }
                Err(source) => {
                    if reader.fill_buf()?.is_empty() {
                        warn!(
                            path = %self.path.display(),
                            line = line_no,
                            bytes = n,
                            "Cutting torn final line off the log"
                        );
                        if let Some(file) = inner.file.as_mut() {
                            file.set_len(start)?;
                        }
                    }
                    return Err(PersistenceError::Corrupt {
                        line: line_no,
                        source,
                    });
                }
            }
        }

        info!(
            path = %self.path.display(),
            entries = entries,
            keys = into.len(),
            "Replayed append-only log"
        );
        Ok(())
    }

    fn save(&self, key: &str, record: &Record) -> PersistenceResult<()> {
        self.write_now(key, record.clone().into())
    }

    fn save_async(&self, key: &str, record: &Record) {
        self.buffer(key, record.clone().into());
    }

    fn delete(&self, key: &str) -> PersistenceResult<()> {
        self.write_now(key, LogRecord::Tombstone)
    }

    fn delete_async(&self, key: &str) {
        self.buffer(key, LogRecord::Tombstone);
    }

    /// Writes every pending entry in one append.
    ///
    /// The buffer is only cleared once the append succeeded; on failure
    /// every entry stays pending for the next attempt and nothing reaches
    /// the file.
    fn flush(&self) -> PersistenceResult<()> {
        let mut inner = self.inner.lock();

        if inner.pending.is_empty() {
            return Ok(());
        }

        let mut batch = Vec::new();
        for (key, record) in &inner.pending {
            encode_line(&mut batch, &LogEntry::new(key.clone(), record.clone()))?;
        }

        inner.append(&batch, self.fsync)?;

        let written = inner.pending.len();
        inner.pending.clear();
        debug!(entries = written, "Flushed pending writes");
        Ok(())
    }

    fn stop(&self) -> PersistenceResult<()> {
        let mut inner = self.inner.lock();

        let Some(file) = inner.file.take() else {
            return Ok(());
        };

        if !inner.pending.is_empty() {
            warn!(
                pending = inner.pending.len(),
                "Closing log with unflushed writes"
            );
            inner.pending.clear();
        }

        file.sync_all()?;
        info!(path = %self.path.display(), "Closed append-only log");
        Ok(())
    }
}
