//! # LedgerKV - An In-Memory Key-Value Store with a Write-Behind Log
//!
//! LedgerKV keeps string keys and values in memory and records every change
//! in an append-only JSON-lines log, so a restart replays the log and comes
//! back with the same data. Keys may carry a time-to-live.
//!
//! ## Features
//!
//! - **Write-behind persistence**: writes land in memory at once and reach the
//!   log at the next background flush, or immediately with `SYNC`
//! - **TTL Support**: expired keys are evicted lazily when read
//! - **Crash-tolerant replay**: a torn trailing line loses only that line
//! - **Redis-style protocol**: speak RESP2 with `redis-cli`, or plain text
//!   with `nc`
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              LedgerKV                                │
//! │                                                                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐               │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │               │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │               │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘               │
//! │                                               │                      │
//! │                                               ▼                      │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────┐     │
//! │  │  Request    │    │              StorageEngine               │     │
//! │  │  Parser     │    │      HashMap<String, Record> + RwLock    │     │
//! │  └─────────────┘    └────────────────────┬─────────────────────┘     │
//! │                                          │ save / delete             │
//! │                                          ▼                           │
//! │                     ┌──────────────────────────────────────────┐     │
//! │                     │  Persistence (JsonFileBackend | Noop)    │     │
//! │                     │  pending writes ──flush──> cache.json    │     │
//! │                     └──────────────────────────────────────────┘     │
//! │                                          ▲                           │
//! │                     ┌────────────────────┴─────────────────────┐     │
//! │                     │        Flusher (Background Tokio Task)    │     │
//! │                     └──────────────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use ledgerkv::config::Config;
//! use ledgerkv::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let server = Server::bind(&config).await?;
//!
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `SET key value [EX seconds] [SYNC]`
//! - `GET key`
//! - `DEL key [SYNC]`
//! - `PING [message]`, `ECHO message`
//! - `DBSIZE`, `SAVE`, `QUIT`
//!
//! ## Module Overview
//!
//! - [`protocol`]: request parser and reply frames
//! - [`storage`]: the storage engine, its clock and persistence backends
//! - [`commands`]: command validation and dispatch
//! - [`connection`]: client connection management
//! - [`config`]: flags and environment variables
//! - [`server`]: listener and shutdown sequencing

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{parse_request, Frame, ProtocolError};
pub use server::{Server, ShutdownError};
pub use storage::{EngineConfig, JsonFileBackend, NoopBackend, StorageEngine, StorageError};

/// The default port LedgerKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host LedgerKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of LedgerKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
