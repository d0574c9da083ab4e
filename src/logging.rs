//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "RECBENCH_LOG";

/// Install a fmt subscriber filtered by `RECBENCH_LOG`, `RUST_LOG`, or
/// `default_directive`, in that order.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_directive: &str) -> bool {
    let filter = std::env::var(LOG_ENV)
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
