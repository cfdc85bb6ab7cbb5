//! Tracing initialization shared by both binaries.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the stderr fmt subscriber with an env filter.
/// `RUST_LOG` wins; otherwise `verbose` toggles debug-level output.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "jitterscope=debug"
    } else {
        "jitterscope=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_level(true);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "tracing initialized");
}
