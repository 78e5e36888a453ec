//! Logging setup for vipsbind hosts.
//!
//! The core crate only emits `tracing` events; hosts install a subscriber
//! once at startup with one of these functions.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with vipsbind defaults.
///
/// Sets up tracing-subscriber with:
/// - Environment filter (RUST_LOG)
/// - Compact format suitable for terminal output
pub fn init() {
    init_with_filter("info");
}

/// Initialize tracing with a custom default filter.
pub fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// Like [`init_with_filter`], but returns an error instead of panicking
/// when a global subscriber is already installed (e.g. in tests).
pub fn try_init_with_filter(
    default_filter: &str,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init()
}

/// Segment prefixes for bridge log lines.
pub mod prefix {
    /// Bridge startup prefix
    pub const OPEN: &str = "✿";
    /// Bridge shutdown prefix
    pub const CLOSE: &str = "❀";
    /// Deletion queue prefix
    pub const QUEUE: &str = "⊔";
}
