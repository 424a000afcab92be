//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `default_directives`. Returns false if a
/// global subscriber was already installed.
pub fn init_tracing(default_directives: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
