//! Process-wide logging setup (`SPEC_FULL.md` ambient stack: `tracing-subscriber` `fmt` +
//! `EnvFilter`, initialized once here rather than scattered across call sites).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Initializes the global `tracing` subscriber. Honors `RUST_LOG`, falling back to `info` for
/// this crate's own modules and `warn` for dependencies.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,skipper=info,skipper_core=info,skipper_proxy=info"));
    fmt().with_env_filter(filter).with_target(true).init();
}
