//! Client connections.
//!
//! The server spawns one Tokio task per accepted socket. Each task owns a
//! [`ConnectionHandler`], which buffers incoming bytes, parses as many
//! requests as are complete, runs them through a
//! [`CommandHandler`](crate::commands::CommandHandler) and writes the replies back in one batch.
//!
//! Requests can be RESP arrays (what `redis-cli` sends) or inline lines
//! (what `nc` or `telnet` send), mixed freely on one connection.
//!
//! ## Example
//!
//! ```ignore
//! use ledgerkv::connection::{handle_connection, ConnectionStats};
//! use ledgerkv::commands::CommandHandler;
//! use ledgerkv::storage::{EngineConfig, NoopBackend, StorageEngine};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageEngine::open(
//!     Arc::new(NoopBackend::new()),
//!     EngineConfig::default(),
//! ));
//! let stats = Arc::new(ConnectionStats::new());
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! let commands = CommandHandler::new(Arc::clone(&storage));
//! tokio::spawn(handle_connection(stream, addr, commands, Arc::clone(&stats)));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionSnapshot, ConnectionStats,
};
