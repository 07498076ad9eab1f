//! `tracing` subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Filter for a `-v` count, or `None` to defer to `RUST_LOG`.
pub fn verbosity_filter(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("keel_rs=debug,keel_code=debug"),
        _ => Some("keel_rs=trace,keel_code=trace"),
    }
}

/// Install a stderr `fmt` subscriber. `-v` flags win over `RUST_LOG`; with
/// neither, lifecycle messages from keel crates are shown.
pub fn init_logging(verbose: u8) {
    let filter = match verbosity_filter(verbose) {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,keel_rs=info,keel_code=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
