//! Logging setup for the command-line tool.
//!
//! Library code only emits `tracing` events; the binary decides where they go.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Send compact log lines to stderr, keeping stdout for the report.
///
/// `RUST_LOG` overrides the default filter, which shows warnings, or debug
/// events from this crate when `verbose` is set.
pub fn init_cli_logger(verbose: bool) {
    let default_filter = if verbose {
        "socialname=debug,warn"
    } else {
        "socialname=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}
