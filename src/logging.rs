//! Tracing subscriber setup for the `flicker` binary.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose { "flicker=debug" } else { "flicker=info" }
}

/// Install the global subscriber. Logs go to stderr so stdout stays free
/// for command output.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
