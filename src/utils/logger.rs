use std::io;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logging system
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when verbose.
pub fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // try_init: tests and embedding applications may have installed a subscriber already
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr) // Answers go to stdout, logs stay out of the way
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .compact(),
        )
        .try_init();
}

/// Log an info message with a tag prefix
pub fn log_info(tag: &str, message: impl std::fmt::Display) {
    info!("{} {}", tag, message);
}

/// Log a warning message with a tag prefix
pub fn log_warn(tag: &str, message: impl std::fmt::Display) {
    warn!("{} {}", tag, message);
}

/// Log an error message with a tag prefix
pub fn log_error(tag: &str, message: impl std::fmt::Display) {
    error!("{} {}", tag, message);
}

/// Log a debug message with a tag prefix
pub fn log_debug(tag: &str, message: impl std::fmt::Display) {
    debug!("{} {}", tag, message);
}
