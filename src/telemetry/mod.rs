//! Tracing bootstrap.

use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install a global `tracing` subscriber honoring `RUST_LOG`, defaulting to
/// `stepgraph=info`. Idempotent; safe to call from every test and example.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("stepgraph=info"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}
