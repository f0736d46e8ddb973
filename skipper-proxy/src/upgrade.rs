//! The upgrade (hijack) subsystem (`spec.md` §4.13): once a `101` response is proxied verbatim,
//! both connections are handed off to a bidirectional byte pump until either side closes.

use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};

/// Copies bytes in both directions between the client connection and the upstream connection
/// until either side closes or an I/O error occurs (`spec.md` §4.13 suspension point (d)).
/// Spawned as its own task so it never blocks the request-handling path; audited with a start and
/// an end log line per `spec.md` §4.13 "audit hooks for start/end events".
pub async fn pump(route_id: &str, client: Upgraded, upstream: Upgraded) {
    debug!(route_id, "upgrade: starting bidirectional byte pump");
    let mut client = TokioIo::new(client);
    let mut upstream = TokioIo::new(upstream);
    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((to_upstream, to_client)) => {
            debug!(route_id, to_upstream, to_client, "upgrade: byte pump finished");
        }
        Err(e) => {
            warn!(route_id, error = %e, "upgrade: byte pump ended with an error");
        }
    }
}
