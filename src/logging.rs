//! Process-wide tracing setup.
//!
//! Logs go to stderr so stdout stays free for machine-readable output.
//! `RUST_LOG` wins over the configured level.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber. Later calls are no-ops, as is a call after
/// some other subscriber was installed first.
pub fn init(default_level: &str) {
    if INSTALLED.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(default_level));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr));

    if subscriber.try_init().is_ok() {
        let _ = INSTALLED.set(());
    }
}

/// `info` style levels apply to this crate; anything with a `=` or `,` is
/// taken as a full directive string.
fn filter_for(level: &str) -> EnvFilter {
    let level = level.trim();
    if level.is_empty() {
        return EnvFilter::new("info");
    }
    if level.contains('=') || level.contains(',') {
        return EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    }
    EnvFilter::try_new(format!("warn,design_bridge={level},tower_http={level}"))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
