use std::fs::OpenOptions;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the log filter, e.g. `ark=debug`.
pub const LOG_FILTER_ENV: &str = "ARK_LOG";
/// Environment variable naming a file that receives a debug-level log.
pub const LOG_FILE_ENV: &str = "ARK_LOG_FILE";

pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Install the global subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init_tracing_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(filter);

    let registry = tracing_subscriber::registry().with(stderr_layer);

    let file_layer = std::env::var(LOG_FILE_ENV).ok().and_then(|log_path| {
        match OpenOptions::new().create(true).append(true).open(&log_path) {
            Ok(file) => Some(
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG),
            ),
            Err(e) => {
                eprintln!("Cannot open log file {log_path}: {e}");
                None
            }
        }
    });

    if registry.with(file_layer).try_init().is_ok() {
        if let Ok(log_path) = std::env::var(LOG_FILE_ENV) {
            tracing::info!(target: "ark", "file logging enabled: {log_path}");
        }
    }
}
