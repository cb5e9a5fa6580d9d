//! Background Flush Loop
//!
//! Asynchronous writes sit in the backend's pending buffer until something
//! flushes them. This module runs that "something": a Tokio task that wakes
//! once per interval and appends the whole buffer to the log in one batch.
//!
//! ## Design
//!
//! The flusher:
//! 1. Sleeps until the next interval tick
//! 2. Runs `Persistence::flush` on the blocking pool (it does file I/O)
//! 3. Logs and counts failures, then goes back to sleep
//!
//! A failed flush never stops the loop; the entries stay pending and the next
//! tick retries them. The loop only ends when the handle is shut down.

use crate::storage::persistence::Persistence;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// A handle to the running flush loop.
///
/// Dropping the handle signals the loop to stop but does not wait for it;
/// use [`Flusher::shutdown`] to stop and join.
#[derive(Debug)]
pub struct Flusher {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    /// The spawned loop
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    /// Starts the flush loop as a background task.
    ///
    /// # Arguments
    ///
    /// * `backend` - The backend whose pending writes get flushed
    /// * `interval` - Time between flushes (must be non-zero)
    /// * `failures` - Incremented every time a flush fails
    pub fn start(
        backend: Arc<dyn Persistence>,
        interval: Duration,
        failures: Arc<AtomicU64>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(flush_loop(backend, interval, failures, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Background flush loop started");

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Stops the loop and waits for it to exit.
    ///
    /// A flush already in progress is allowed to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Flush loop ended abnormally");
            }
        }

        info!("Background flush loop stopped");
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// The main flush loop.
async fn flush_loop(
    backend: Arc<dyn Persistence>,
    interval: Duration,
    failures: Arc<AtomicU64>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately; there is nothing to flush yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Flush loop received shutdown signal");
                    return;
                }
            }
        }

        let backend = Arc::clone(&backend);
        match tokio::task::spawn_blocking(move || backend.flush()).await {
            Ok(Ok(())) => trace!("Periodic flush complete"),
            Ok(Err(e)) => {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Periodic flush failed, pending writes kept for retry");
            }
            Err(e) => {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Periodic flush task panicked");
            }
        }
    }
}
