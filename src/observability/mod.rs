//! Structured logging setup.
//!
//! Everything in the crate logs through `tracing`. The binary calls
//! [`init_tracing`] once at startup; library users bring their own subscriber.
//!
//! ```bash
//! # Per-target levels
//! RUST_LOG=v3_pool_stream=debug,tokio_tungstenite=warn v3-pool-stream watch
//!
//! # JSON lines on stdout for log shippers
//! LOG_JSON=true v3-pool-stream watch
//!
//! # Additionally write JSON logs to a daily-rotated file
//! LOG_FILE=./logs/stream.log v3-pool-stream watch
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{MonitorError, MonitorResult};

/// Filter used when neither `RUST_LOG` nor an explicit level is given.
pub const DEFAULT_FILTER: &str = "v3_pool_stream=info,warn";

/// Resolve the filter directive: `RUST_LOG`, then `log_level`, then
/// [`DEFAULT_FILTER`].
#[must_use]
pub fn filter_directive(rust_log: Option<String>, log_level: Option<String>) -> String {
    rust_log
        .filter(|s| !s.trim().is_empty())
        .or(log_level)
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Install the global subscriber.
///
/// * `log_level` - used when `RUST_LOG` is unset, e.g. `"debug"`
/// * `log_file` - also write JSON logs here, rotated daily
/// * `json_output` - JSON instead of pretty console output
///
/// The returned guard flushes the file writer on drop; keep it alive until
/// the process exits.
///
/// # Errors
///
/// Returns a configuration error if the filter does not parse, the log
/// directory cannot be created, or a subscriber is already installed.
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> MonitorResult<Option<WorkerGuard>> {
    let directive = filter_directive(std::env::var("RUST_LOG").ok(), log_level);
    let env_filter = EnvFilter::try_new(&directive).map_err(|e| {
        MonitorError::config(format!("invalid log filter '{directive}'"), Some(Box::new(e)))
    })?;

    let console_layer = if json_output {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(false)
            .with_thread_names(true)
            .boxed()
    };

    let mut guard = None;
    let file_layer = match log_file.as_deref() {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir).map_err(|e| {
                MonitorError::config(
                    format!("cannot create log directory {}", dir.display()),
                    Some(Box::new(e)),
                )
            })?;

            let appender = tracing_appender::rolling::daily(
                dir,
                path.file_name().unwrap_or_else(|| OsStr::new("v3-pool-stream.log")),
            );
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard = Some(worker);

            Some(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| MonitorError::config("tracing already initialized", Some(Box::new(e))))?;

    info!(
        filter = %directive,
        json_output,
        file_logging = log_file.is_some(),
        "Tracing initialized"
    );

    Ok(guard)
}

/// Route logs to the test harness; repeated calls are no-ops.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
