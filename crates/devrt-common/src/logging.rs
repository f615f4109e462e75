use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "DEVRT_LOG";

/// Initialize structured logging with environment filter.
/// Set DEVRT_LOG=debug (or trace, info, warn, error) for verbosity control.
pub fn init_logging() {
    fmt()
        .with_env_filter(env_filter("info"))
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Like [`init_logging`], but tolerates an already installed subscriber.
/// Test binaries call this from every test.
pub fn try_init_logging() {
    let _ = fmt()
        .with_env_filter(env_filter("warn"))
        .with_target(true)
        .with_test_writer()
        .try_init();
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default))
}
