//! TCP server lifecycle.
//!
//! [`Server::bind`] wires the pieces together (log backend, storage engine,
//! listener) and [`Server::run_until`] accepts clients until a shutdown
//! future resolves, then stops the storage engine under a deadline.

use crate::commands::CommandHandler;
use crate::config::{Config, ConfigError, LogTarget};
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::{
    EngineConfig, JsonFileBackend, NoopBackend, Persistence, PersistenceError, StorageEngine,
    StorageError,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Errors while starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to open log: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Errors while shutting down.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The storage engine did not finish stopping in time
    #[error("storage engine did not stop within {0:?}")]
    Timeout(Duration),

    #[error("storage engine failed to stop: {0}")]
    Storage(#[from] StorageError),
}

pub struct Server {
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    stats: Arc<ConnectionStats>,
    shutdown_timeout: Duration,
}

impl Server {
    /// Opens the log, replays it into a new storage engine and binds the
    /// listener.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        config.validate()?;

        let backend: Arc<dyn Persistence> = match config.log_target() {
            LogTarget::Disabled => {
                info!("Persistence disabled, data lives in memory only");
                Arc::new(NoopBackend::new())
            }
            LogTarget::File(path) => {
                Arc::new(JsonFileBackend::open(path, config.fsync_policy())?)
            }
        };

        let storage = Arc::new(StorageEngine::open(
            backend,
            EngineConfig::new(config.flush_interval()),
        ));

        let listener = TcpListener::bind(config.bind_address()).await?;
        info!(addr = %listener.local_addr()?, "Listening");

        Ok(Self {
            listener,
            storage,
            stats: Arc::new(ConnectionStats::new()),
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Serves clients until `shutdown` resolves, then stops the storage
    /// engine.
    ///
    /// Connections still open at that point keep their task, but writes they
    /// make after the engine stopped are not persisted.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ShutdownError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = accept_loop(&self.listener, &self.storage, &self.stats) => {}
            _ = shutdown => {
                info!("Shutdown signal received, stopping server...");
            }
        }
        drop(self.listener);

        match tokio::time::timeout(self.shutdown_timeout, self.storage.stop()).await {
            Ok(Ok(())) => {
                info!("Server shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Storage engine failed to stop cleanly");
                Err(ShutdownError::Storage(e))
            }
            Err(_) => {
                error!(timeout = ?self.shutdown_timeout, "Timed out stopping storage engine");
                Err(ShutdownError::Timeout(self.shutdown_timeout))
            }
        }
    }
}

/// Accepts connections forever, one task per client.
async fn accept_loop(
    listener: &TcpListener,
    storage: &Arc<StorageEngine>,
    stats: &Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(storage));
                let stats = Arc::clone(stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
