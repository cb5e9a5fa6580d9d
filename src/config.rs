//! Server configuration.
//!
//! Every option can be given as a flag or an environment variable:
//!
//! ```text
//! LEDGERKV_ENV                    production    "local" switches to pretty debug logs
//! LEDGERKV_HOST                   127.0.0.1
//! LEDGERKV_PORT                   6379
//! LEDGERKV_FLUSH_INTERVAL_MS      1000          must be > 0
//! LEDGERKV_LOG_PATH               ./cache/cache.json   "none" disables the log
//! LEDGERKV_FSYNC                  false         fsync after every log write
//! LEDGERKV_SHUTDOWN_TIMEOUT_SECS  60
//! ```

use crate::storage::FsyncPolicy;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ENV: &str = "production";
pub const DEFAULT_LOG_PATH: &str = "./cache/cache.json";
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 60;

/// Value of `--log-path` that selects the no-op backend.
const NO_LOG: &str = "none";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("flush interval must be greater than zero")]
    ZeroFlushInterval,

    #[error("log path must not be empty (use \"none\" to disable the log)")]
    EmptyLogPath,
}

/// Where the write-behind log lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Nothing is persisted
    Disabled,
    File(PathBuf),
}

#[derive(Parser, Debug, Clone)]
#[command(name = "ledgerkv", author, version, about = "In-memory key-value store with a write-behind JSON log")]
pub struct Config {
    /// Deployment environment, "local" enables human-readable debug logs
    #[arg(long, env = "LEDGERKV_ENV", default_value = DEFAULT_ENV)]
    pub env: String,

    /// Host to bind to
    #[arg(long, env = "LEDGERKV_HOST", default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "LEDGERKV_PORT", default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Milliseconds between background flushes of buffered writes
    #[arg(long, env = "LEDGERKV_FLUSH_INTERVAL_MS", default_value_t = DEFAULT_FLUSH_INTERVAL_MS)]
    pub flush_interval_ms: u64,

    /// Path of the append-only log, or "none"
    #[arg(long, env = "LEDGERKV_LOG_PATH", default_value = DEFAULT_LOG_PATH)]
    pub log_path: String,

    /// Fsync the log after every write
    #[arg(long, env = "LEDGERKV_FSYNC")]
    pub fsync: bool,

    /// Seconds to wait for the storage engine to stop on shutdown
    #[arg(long, env = "LEDGERKV_SHUTDOWN_TIMEOUT_SECS", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: DEFAULT_ENV.to_string(),
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            log_path: DEFAULT_LOG_PATH.to_string(),
            fsync: false,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::ZeroFlushInterval);
        }
        if self.log_path.trim().is_empty() {
            return Err(ConfigError::EmptyLogPath);
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_local(&self) -> bool {
        self.env.eq_ignore_ascii_case("local")
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn log_target(&self) -> LogTarget {
        if self.log_path.eq_ignore_ascii_case(NO_LOG) {
            LogTarget::Disabled
        } else {
            LogTarget::File(PathBuf::from(&self.log_path))
        }
    }

    pub fn fsync_policy(&self) -> FsyncPolicy {
        if self.fsync {
            FsyncPolicy::Always
        } else {
            FsyncPolicy::Never
        }
    }
}
