//! Binary entry point.
//!
//! ```text
//! main.rs   tracing + runtime
//!    ↓
//! cli.rs    config, pool discovery, sink, subscription, display
//! ```
//!
//! Logging is controlled through `RUST_LOG`, `LOG_JSON` and `LOG_FILE`.

use v3_pool_stream::{cli, observability};
use tracing::error;

#[tokio::main]
async fn main() {
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    // Flushes the file appender on exit.
    let guard = match observability::init_tracing(None, log_file, json_output) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        eprintln!("Error: {e}");
        drop(guard);
        std::process::exit(1);
    }
}
