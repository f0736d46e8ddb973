//! Error kinds for everything under the routing-table builder's control (`spec.md` §7).
//!
//! None of these surface directly to an HTTP client — they are recorded as per-route diagnostics
//! (carrying the offending route id where one is known) or, for `BuildAborted`, cause the builder
//! to keep serving the previous table. Runtime errors that *do* reach the client live in
//! `skipper-proxy::ProxyError`.

use eskip::Position;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("route {id}: syntax error at {pos}: {source}")]
    Syntax {
        id: String,
        pos: Position,
        #[source]
        source: eskip::Error,
    },

    #[error("route {id}: unknown predicate {name:?}")]
    UnknownPredicate { id: String, name: String },

    #[error("route {id}: unknown filter {name:?}")]
    UnknownFilter { id: String, name: String },

    #[error("route {id}: invalid arguments for {name:?}: {reason}")]
    InvalidArgs {
        id: String,
        name: String,
        reason: String,
    },

    #[error("route {id}: more than one path matcher predicate")]
    MultiplePathMatchers { id: String },

    #[error("build aborted: no data client produced any routes within the poll timeout")]
    BuildAborted,
}

pub type Result<T> = std::result::Result<T, Error>;
