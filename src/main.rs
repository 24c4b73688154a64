//! Telemetry service (v1)
//!
//! Runs the counter HTTP API and, optionally, a message-queue consumer in
//! one process, and shuts both down cleanly on SIGINT, SIGTERM or the first
//! fatal error.
//!
//! # Architecture Overview
//!
//! ```text
//!   config (file + flags)
//!          │
//!          ▼
//!   lifecycle::startup ──registers──▶ ShutdownRegistry (LIFO release)
//!          │                                 ▲
//!          ▼                                 │ drain once
//!   Orchestrator ── root CancellationToken ──┤
//!     ├── http-server    (axum, /api/v1/count, /status, /health, /metrics)
//!     ├── queue-consumer (MessageSource → ProductRecorder)
//!     └── SignalListener (SIGINT / SIGTERM) ─┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use telemetry_service::config::{resolve_config, Overrides};
use telemetry_service::lifecycle::startup;
use telemetry_service::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "telemetry-service", version, about = "Counter API with graceful lifecycle management")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind.
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Prefix placed before `/api/v1`.
    #[arg(long)]
    base_path: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let overrides = Overrides {
        host: args.host,
        port: args.port,
        base_path: args.base_path,
        log_level: args.log_level,
    };

    let config = match resolve_config(args.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("telemetry-service: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.server.bind_address(),
        consumer = config.consumer.enabled,
        metrics = config.observability.metrics_enabled,
        "telemetry-service starting"
    );

    match startup::run(config).await {
        Ok(exit) => {
            tracing::info!(exit = ?exit, "Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Service failed");
            ExitCode::FAILURE
        }
    }
}
