//! Tracing setup for the pillbox binary.
//!
//! Everything goes to stderr: `pillbox` prints JSON and CSV on stdout, and
//! that stream has to stay parseable. The filter comes from `PILLBOX_LOG`,
//! then `RUST_LOG`, then the default level.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable checked before `RUST_LOG`
pub const LOG_ENV: &str = "PILLBOX_LOG";

/// Initialize logging with the default `info` level
pub fn init() {
    init_with_level("info")
}

/// Initialize logging, falling back to `default_level` when neither
/// `PILLBOX_LOG` nor `RUST_LOG` holds a usable directive
pub fn init_with_level(default_level: &str) {
    let directives = std::env::var(LOG_ENV)
        .ok()
        .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok());

    tracing_subscriber::registry()
        .with(filter_for(directives.as_deref(), default_level))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

/// Build the filter; blank or malformed directives fall back to the default
fn filter_for(directives: Option<&str>, default_level: &str) -> EnvFilter {
    directives
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level))
}

/// Initialize logging for testing (captures logs for test output)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
