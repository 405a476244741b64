//! Logging initialization (ambient stack; grounded in
//! `iepathos-prodigy/src/app/logging.rs`'s verbosity-tiered `tracing_subscriber` setup).

/// Initialize `tracing` for the binary. `verbose` follows the usual `-v`
/// repeat-count convention: 0 is warnings only via `RAYMOND_LOG`/`RUST_LOG`
/// defaults, 1 shows info, 2 adds module targets, 3 adds thread ids and line
/// numbers.
pub fn init(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = std::env::var("RAYMOND_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_filter.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_thread_ids(verbose >= 3)
        .with_line_number(verbose >= 3)
        .init();
}
