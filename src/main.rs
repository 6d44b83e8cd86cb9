//! Gatehouse service binary.
//!
//! ```text
//!     Client ──▶ listener ──▶ trace ─▶ origin ─▶ rate ─▶ access log ─▶ recovery
//!                                                                        │
//!                                      /health ◀─────────────────────────┤
//!                                      /api/*  ◀── auth ◀────────────────┘
//!                                        │
//!                                        ▼
//!                                 cache registry ──▶ backends
//! ```
//!
//! SIGINT/SIGTERM drains in-flight requests and closes cache pools
//! concurrently within the configured grace period.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use gatehouse::lifecycle::{signals, ConfigSource, Lifecycle};

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "HTTP service front end with a fixed policy pipeline", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Listen port; overrides the file when non-zero.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let lifecycle = Lifecycle::new();
    let source = ConfigSource::File {
        path: cli.config,
        port_override: cli.port,
    };

    match lifecycle.run(source, signals::termination()).await {
        Ok(report) => {
            tracing::info!(
                listener = ?report.listener,
                caches_closed = report.cache.closed.len(),
                caches_abandoned = report.cache.abandoned.len(),
                "gatehouse stopped"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("gatehouse: {e}");
            ExitCode::FAILURE
        }
    }
}
