//! The per-request context handed to every filter (`spec.md` §4.7).

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use http::{HeaderMap, Method, Uri};

use crate::body::{Request, Response};
use crate::endpoint::EndpointRegistry;
use crate::route::Route;

/// The key `Dynamic` backends read from the state bag to learn which endpoint to dispatch to
/// (`spec.md` §4.9). A filter that wants to drive a `Dynamic`-backed route sets this key to a
/// full `scheme://host:port` string before returning from its `request` callback.
pub const DYNAMIC_BACKEND_KEY: &str = "skipper.dynamic_backend";

/// A request-marked hint that a transport failure on this specific request may be retried even
/// though its method is not itself idempotent (`spec.md` §4.9).
pub const RETRY_KEY: &str = "skipper.retry";

/// A request-marked hint that a response filter must still run even if the client disconnected
/// mid-flight (`spec.md` §5 cancellation policy).
pub const RUN_ON_CANCEL_KEY: &str = "skipper.run_on_cancel";

/// A read-only view of request metadata, used by predicates (`spec.md` §4.3) before a full
/// [`Context`] exists. Predicates never need the body.
pub struct RequestView<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub path_params: &'a HashMap<String, String>,
    pub peer_addr: Option<SocketAddr>,
}

impl<'a> RequestView<'a> {
    pub fn from_parts(
        parts: &'a http::request::Parts,
        path_params: &'a HashMap<String, String>,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        RequestView {
            method: &parts.method,
            uri: &parts.uri,
            headers: &parts.headers,
            path_params,
            peer_addr,
        }
    }
}

/// A string-keyed, type-checked-at-the-boundary map shared by all filters on one route
/// (`spec.md` §4.7, §9 Design Notes). Each filter that needs shared state agrees on a key name
/// and a concrete type out of band (typically a `pub const` in the filter's module).
#[derive(Default)]
pub struct StateBag(HashMap<String, Box<dyn Any + Send + Sync>>);

impl StateBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.0.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.0.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self, key: &str) -> Option<T> {
        self.0.remove(key).and_then(|v| v.downcast::<T>().ok()).map(|b| *b)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// An immutable snapshot of request metadata, taken before any filter runs, when
/// `preserve_original` is enabled (`spec.md` §4.7).
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestSnapshot {
    pub fn capture(req: &Request) -> Self {
        RequestSnapshot {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: http::StatusCode,
    pub headers: HeaderMap,
}

impl ResponseSnapshot {
    pub fn capture(resp: &Response) -> Self {
        ResponseSnapshot {
            status: resp.status(),
            headers: resp.headers().clone(),
        }
    }
}

/// Hard cap on `loopback_count` before the runtime fails the request with `LoopDetected`
/// (`spec.md` §4.9, §7).
pub const MAX_LOOPBACKS: u32 = 9;

/// Per-request state shared across the whole filter pipeline (`spec.md` §4.7).
pub struct Context {
    pub request: Request,
    pub response: Option<Response>,
    pub served: bool,
    pub path_params: HashMap<String, String>,
    pub state_bag: StateBag,
    pub original_request: Option<RequestSnapshot>,
    pub original_response: Option<ResponseSnapshot>,
    pub backend_url: Option<String>,
    pub route: Arc<Route>,
    pub loopback_count: u32,
    pub peer_addr: Option<SocketAddr>,
    pub preserve_original: bool,
    /// Lets filters such as `endpointCreated` override an endpoint's fade-in clock
    /// (`spec.md` §4.12).
    pub endpoint_registry: Option<EndpointRegistry>,
}

impl Context {
    pub fn new(
        request: Request,
        route: Arc<Route>,
        path_params: HashMap<String, String>,
        peer_addr: Option<SocketAddr>,
        preserve_original: bool,
        endpoint_registry: Option<EndpointRegistry>,
    ) -> Self {
        let original_request = preserve_original.then(|| RequestSnapshot::capture(&request));
        Context {
            request,
            response: None,
            served: false,
            path_params,
            state_bag: StateBag::new(),
            original_request,
            original_response: None,
            backend_url: None,
            route,
            loopback_count: 0,
            peer_addr,
            preserve_original,
            endpoint_registry,
        }
    }

    /// Called right before response filters run, capturing `original_response` if enabled
    /// (`spec.md` §4.7).
    pub fn snapshot_response(&mut self) {
        if self.preserve_original {
            if let Some(resp) = &self.response {
                self.original_response = Some(ResponseSnapshot::capture(resp));
            }
        }
    }

    pub fn request_view(&self) -> RequestView<'_> {
        RequestView {
            method: self.request.method(),
            uri: self.request.uri(),
            headers: self.request.headers(),
            path_params: &self.path_params,
            peer_addr: self.peer_addr,
        }
    }
}
