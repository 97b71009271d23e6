//! Optional tracing bootstrap for binaries and tests.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the embedder's choice. `init` wires up a sensible default honoring
//! `RUST_LOG`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a global fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call any number of times; only the first call has an effect. Does
/// nothing if another subscriber was already installed by the embedder.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}
