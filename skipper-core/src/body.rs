//! The concrete request/response body type shared by the core and the proxy runtime.
//!
//! Filters, the dispatcher, and the upgrade subsystem all need to hand bodies across crate
//! boundaries without committing to one concrete body implementation (an incoming hyper body, a
//! filter-synthesized `Full<Bytes>`, a streamed upstream response, ...), so everything here is
//! boxed behind `http_body_util::combinators::BoxBody`, the standard hyper-ecosystem shape for
//! "some body, type-erased".

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

pub type BodyError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type Body = BoxBody<Bytes, BodyError>;

pub type Request = http::Request<Body>;
pub type Response = http::Response<Body>;

/// Boxes any concrete body into the shared `Body` type.
pub fn boxed<B>(body: B) -> Body
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    body.map_err(|e| Box::new(e) as BodyError).boxed()
}

pub fn empty() -> Body {
    boxed(Empty::new())
}

pub fn full(bytes: impl Into<Bytes>) -> Body {
    boxed(Full::new(bytes.into()))
}
