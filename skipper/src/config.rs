//! Process configuration (`SPEC_FULL.md` ambient stack): a `clap` derive CLI with
//! `SKIPPER_`-prefixed environment variable fallbacks, following the teacher's own
//! `clap::Parser` binaries (`crates/agentgateway-app/src/main.rs`).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

fn parse_duration_secs(s: &str) -> Result<Duration, String> {
    s.parse::<f64>()
        .map(Duration::from_secs_f64)
        .map_err(|e| format!("not a number of seconds: {e}"))
}

#[derive(Parser, Debug)]
#[command(name = "skipper", about = "An HTTP reverse proxy driven by eskip route definitions")]
pub struct Args {
    /// Address the proxy listens on.
    #[arg(long, env = "SKIPPER_ADDRESS", default_value = "0.0.0.0:9090")]
    pub address: std::net::SocketAddr,

    /// Path to an eskip route definitions file, polled for changes.
    #[arg(long, env = "SKIPPER_ROUTES_FILE")]
    pub routes_file: PathBuf,

    /// How long the initial table build waits for at least one data client to answer
    /// (`spec.md` §4.5).
    #[arg(long, env = "SKIPPER_SOURCE_POLL_TIMEOUT", value_parser = parse_duration_secs, default_value = "10")]
    pub source_poll_timeout: Duration,

    /// How often the local-file data client re-reads `routes_file` for changes.
    #[arg(long, env = "SKIPPER_UPDATE_POLL_INTERVAL", value_parser = parse_duration_secs, default_value = "1")]
    pub update_poll_interval: Duration,

    /// Safety-net rebuild interval independent of any incoming update (`spec.md` §4.5 "Periodic").
    #[arg(long, env = "SKIPPER_PERIODIC_REBUILD", value_parser = parse_duration_secs, default_value = "60")]
    pub periodic_rebuild: Duration,

    /// Whether to snapshot the original request/response for filters that need it
    /// (`spec.md` §4.7).
    #[arg(long, env = "SKIPPER_PRESERVE_ORIGINAL", default_value_t = false)]
    pub preserve_original: bool,

    /// How long an endpoint may go unseen in a published table before its registry entry is
    /// garbage-collected (`spec.md` §3, §4.10).
    #[arg(long, env = "SKIPPER_LAST_SEEN_TIMEOUT", value_parser = parse_duration_secs, default_value = "60")]
    pub last_seen_timeout: Duration,
}
