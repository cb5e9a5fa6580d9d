//! LedgerKV server binary.
//!
//! Loads configuration, installs logging, and serves until Ctrl+C.

use clap::Parser;
use ledgerkv::config::Config;
use ledgerkv::server::Server;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Local runs get readable debug output, everything else JSON lines at info.
/// `RUST_LOG` overrides the level either way.
fn init_tracing(config: &Config) {
    let default_level = if config.is_local() { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if config.is_local() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    }
}

fn print_banner(config: &Config) {
    println!(
        r#"
LedgerKV v{} - In-Memory Key-Value Store with a Write-Behind Log
──────────────────────────────────────────────────────────────
Listening on    {}
Log file        {}
Flush interval  {} ms

Use Ctrl+C to shutdown gracefully.
"#,
        ledgerkv::VERSION,
        config.bind_address(),
        config.log_path,
        config.flush_interval_ms,
    );
}

async fn wait_for_ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config);

    let server = Server::bind(&config).await?;
    if config.is_local() {
        print_banner(&config);
    }
    info!(
        env = %config.env,
        log_path = %config.log_path,
        flush_interval_ms = config.flush_interval_ms,
        "Server started"
    );

    server.run_until(wait_for_ctrl_c()).await?;
    Ok(())
}
