//! Runtime errors that reach the client as HTTP status codes (`spec.md` §7).

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no route matched the request")]
    NoMatch,

    #[error("loopback limit exceeded")]
    LoopDetected,

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("upstream request timed out")]
    UpstreamTimeout,
}

impl ProxyError {
    /// Maps this error to the status code `spec.md` §6/§7 assign it. `ClientCancelled`
    /// (`spec.md` §7: "Surfaced to client? None; upstream aborted") has no entry here by
    /// design — a cancelled request has no client left to write a status to; see
    /// `pipeline::run_response_phase`'s `skip_for_cancel` parameter for the part of this
    /// behavior that is wired.
    pub fn status(&self) -> http::StatusCode {
        match self {
            ProxyError::NoMatch => http::StatusCode::NOT_FOUND,
            ProxyError::LoopDetected => http::StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::UpstreamTransport(_) => http::StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout => http::StatusCode::GATEWAY_TIMEOUT,
        }
    }
}
