//! Ambient `tracing` subscriber construction. Embedders are free to set up their own
//! subscriber instead; this is just the default wiring so a standalone binary or test
//! harness gets structured logs without repeating the `EnvFilter` boilerplate.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a process-global subscriber reading its filter from `RUST_LOG`, falling back
/// to `info` when unset. Safe to call more than once per process: a second call is a
/// no-op rather than a panic, since tests across the workspace may each try to install one.
pub fn init_default() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
