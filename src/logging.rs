//! Tracing bootstrap for host applications and the demo binary.
//!
//! The library itself only emits `tracing` events; installing a subscriber is left
//! to whoever owns the process.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install a console subscriber filtered by `RUST_LOG`, or by `default_directive`
/// when the variable is unset or invalid.
///
/// Safe to call more than once. If another subscriber is already installed it is
/// left in place.
pub fn init_tracing(default_directive: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_directive))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init();
        if installed.is_err() {
            tracing::debug!("global tracing subscriber already set, keeping it");
        }
    });
}
