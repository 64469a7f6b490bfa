//! Tracing subscriber setup for test binaries and tools.

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber filtered by `OPCHECK_LOG` (falling back to `RUST_LOG`, then `info`).
///
/// Safe to call from every test: only the first call installs a subscriber.
pub fn init() {
    let filter = std::env::var("OPCHECK_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(false)
        .try_init();
}
