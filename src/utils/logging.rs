//! Diagnostic logging setup

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter for a `-v` count: warnings, then debug, then trace.
pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "histsys=warn",
        1 => "histsys=debug",
        _ => "histsys=trace",
    }
}

/// Install the global fmt subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over the verbosity flag. Installing twice is
/// a no-op.
pub fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
