//! The backend dispatcher (`spec.md` §4.9): endpoint selection, hop-by-hop header handling, the
//! upstream roundtrip, and the retry policy. `Shunt`/`Loopback` are handled by the caller
//! (`lib.rs`); this module only ever sees backends that require an actual HTTP client call.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use http_body_util::BodyExt;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use skipper_core::algorithm::{self, SelectCtx};
use skipper_core::body::{self, Body};
use skipper_core::context::{Context, DYNAMIC_BACKEND_KEY, RETRY_KEY};
use skipper_core::endpoint::{EndpointMetrics, EndpointRegistry};
use skipper_core::route::Backend;
use tracing::warn;

use crate::error::ProxyError;

/// Hop-by-hop headers stripped in both directions (`spec.md` §4.9, §6).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "trailer",
];

const IDEMPOTENT_METHODS: &[Method] = &[Method::GET, Method::HEAD, Method::OPTIONS, Method::PUT, Method::DELETE];
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Shared connection pool, one per process (`spec.md` §4.9: "open or reuse a pooled connection").
pub type UpstreamClient = HyperClient<HttpConnector, Body>;

pub fn new_client() -> UpstreamClient {
    HyperClient::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// The result of a completed roundtrip: whether the response carries a protocol upgrade, handed
/// back so the caller can decide whether to start the byte pump (`spec.md` §4.13).
pub struct DispatchOutcome {
    pub response: http::Response<Body>,
    pub is_upgrade: bool,
    /// The upstream side of the protocol upgrade, present only when `is_upgrade` is set
    /// (`spec.md` §4.13).
    pub upstream_upgrade: Option<hyper::upgrade::OnUpgrade>,
}

pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

pub(crate) fn requested_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false)
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: Option<SocketAddr>) {
    let Some(peer) = peer else { return };
    let ip = peer.ip().to_string();
    let combined = match headers.get(X_FORWARDED_FOR) {
        Some(existing) => format!("{}, {}", existing.to_str().unwrap_or(""), ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&combined) {
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }
}

fn set_if_absent(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if !headers.contains_key(name) {
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), v);
        }
    }
}

/// Rewrites `req`'s scheme/authority to `endpoint_url` and applies the forwarding headers
/// (`spec.md` §4.9, §6). Path, query, and body are preserved untouched; generic over the body
/// type so it can run both before and after the retry path buffers the body into `Bytes`.
fn prepare_outgoing<B>(req: &mut http::Request<B>, endpoint_url: &str, peer: Option<SocketAddr>) -> Result<(), ProxyError> {
    let endpoint: Uri = endpoint_url
        .parse()
        .map_err(|e| ProxyError::UpstreamTransport(format!("invalid endpoint url {endpoint_url}: {e}")))?;
    let scheme = endpoint
        .scheme()
        .cloned()
        .ok_or_else(|| ProxyError::UpstreamTransport(format!("endpoint url missing scheme: {endpoint_url}")))?;
    let authority = endpoint
        .authority()
        .cloned()
        .ok_or_else(|| ProxyError::UpstreamTransport(format!("endpoint url missing authority: {endpoint_url}")))?;
    let path_and_query = req
        .uri()
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| http::uri::PathAndQuery::from_static("/"));

    let new_uri = Uri::builder()
        .scheme(scheme.clone())
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::UpstreamTransport(format!("failed to rebuild outgoing uri: {e}")))?;
    *req.uri_mut() = new_uri;

    let headers = req.headers_mut();
    strip_hop_by_hop(headers);
    append_forwarded_for(headers, peer);
    set_if_absent(headers, X_FORWARDED_PROTO, scheme.as_str());
    set_if_absent(headers, X_FORWARDED_HOST, authority.as_str());
    if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
        headers.insert(http::header::HOST, host);
    }
    Ok(())
}

/// Resolves a `Backend` to the one endpoint URL to dispatch this request to, running the LB
/// algorithm when needed (`spec.md` §4.9).
fn select_endpoint(ctx: &Context, registry: &EndpointRegistry) -> Result<Arc<str>, ProxyError> {
    match &ctx.route.backend {
        Backend::Network { url } => Ok(url.clone()),
        Backend::Dynamic => ctx
            .state_bag
            .get::<String>(DYNAMIC_BACKEND_KEY)
            .map(|s| Arc::from(s.as_str()))
            .ok_or_else(|| ProxyError::UpstreamTransport("Dynamic backend: no endpoint set in state bag".into())),
        Backend::Lb { algorithm, endpoints, .. } => {
            let urls: Vec<Arc<str>> = endpoints.iter().map(|e| e.url.clone()).collect();
            let client_key = algorithm::client_key(ctx.peer_addr, ctx.request.headers().get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()));
            let select_ctx = SelectCtx { endpoints: &urls, client_key: client_key.as_deref(), registry, exclude: None };
            let idx = algorithm
                .select(&select_ctx)
                .ok_or_else(|| ProxyError::UpstreamTransport("load-balanced route has no endpoints".into()))?;
            Ok(urls[idx].clone())
        }
        Backend::Shunt | Backend::Loopback => unreachable!("Shunt/Loopback never reach the dispatcher"),
    }
}

fn is_retryable_request(req: &http::Request<Body>, ctx: &Context) -> bool {
    IDEMPOTENT_METHODS.contains(req.method()) || ctx.state_bag.contains(RETRY_KEY)
}

/// Clones a buffered request for a retry attempt.
fn clone_request(req: &http::Request<Bytes>) -> http::Request<Bytes> {
    let mut builder = http::Request::builder().method(req.method().clone()).uri(req.uri().clone());
    *builder.headers_mut().expect("builder not yet consumed") = req.headers().clone();
    builder.body(req.body().clone()).expect("cloned request parts are always valid")
}

async fn buffer_body(req: http::Request<Body>) -> Result<http::Request<Bytes>, ProxyError> {
    let (parts, body) = req.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| ProxyError::UpstreamTransport(format!("failed reading request body: {e}")))?
        .to_bytes();
    Ok(http::Request::from_parts(parts, bytes))
}

fn empty_request() -> http::Request<Body> {
    http::Request::new(body::empty())
}

async fn roundtrip(
    client: &UpstreamClient,
    req: http::Request<Body>,
) -> Result<http::Response<hyper::body::Incoming>, hyper_util::client::legacy::Error> {
    client.request(req).await
}

fn finish(
    result: Result<http::Response<hyper::body::Incoming>, hyper_util::client::legacy::Error>,
    metrics: &Arc<EndpointMetrics>,
    wants_upgrade: bool,
) -> Result<DispatchOutcome, ProxyError> {
    match result {
        Ok(mut resp) => {
            let is_upgrade = wants_upgrade && resp.status() == http::StatusCode::SWITCHING_PROTOCOLS;
            let upstream_upgrade = is_upgrade.then(|| hyper::upgrade::on(&mut resp));
            if !is_upgrade {
                strip_hop_by_hop(resp.headers_mut());
            }
            Ok(DispatchOutcome { response: resp.map(body::boxed), is_upgrade, upstream_upgrade })
        }
        Err(e) => {
            metrics.mark_failed();
            if e.is_timeout() {
                Err(ProxyError::UpstreamTimeout)
            } else {
                Err(ProxyError::UpstreamTransport(e.to_string()))
            }
        }
    }
}

/// Performs the upstream roundtrip for `ctx`, applying the retry policy (`spec.md` §4.9): a
/// transport error on an LB route is retried at most once, on a different endpoint, only if the
/// request is idempotent by method or explicitly marked `Retry`.
pub async fn dispatch(ctx: &mut Context, client: &UpstreamClient, registry: &EndpointRegistry) -> Result<DispatchOutcome, ProxyError> {
    let is_lb = matches!(ctx.route.backend, Backend::Lb { .. });
    let retryable = is_lb && is_retryable_request(&ctx.request, ctx);

    let endpoint = select_endpoint(ctx, registry)?;
    ctx.backend_url = Some(endpoint.to_string());
    let metrics = registry.touch(&endpoint);
    let wants_upgrade = requested_upgrade(ctx.request.headers());
    let peer = ctx.peer_addr;

    if !retryable {
        let mut req = std::mem::replace(&mut ctx.request, empty_request());
        prepare_outgoing(&mut req, &endpoint, peer)?;
        metrics.inflight_inc();
        let result = roundtrip(client, req).await;
        metrics.inflight_dec();
        return finish(result, &metrics, wants_upgrade);
    }

    let buffered = buffer_body(std::mem::replace(&mut ctx.request, empty_request())).await?;

    let mut attempt = clone_request(&buffered);
    prepare_outgoing(&mut attempt, &endpoint, peer)?;
    metrics.inflight_inc();
    let first = roundtrip(client, attempt.map(body::full)).await;
    metrics.inflight_dec();

    let first_err = match first {
        Ok(resp) => return finish(Ok(resp), &metrics, wants_upgrade),
        Err(e) => e,
    };

    metrics.mark_failed();
    metrics.mark_dead(true);
    warn!(endpoint = %endpoint, error = %first_err, "upstream transport error, retrying on a different endpoint");

    let Backend::Lb { algorithm, endpoints, .. } = &ctx.route.backend else {
        unreachable!("retryable implies Lb")
    };
    let urls: Vec<Arc<str>> = endpoints.iter().map(|e| e.url.clone()).collect();
    let exclude = urls.iter().position(|u| u.as_ref() == endpoint.as_ref());
    let select_ctx = SelectCtx { endpoints: &urls, client_key: None, registry, exclude };
    let Some(idx) = algorithm.select(&select_ctx) else {
        return Err(ProxyError::UpstreamTransport("no alternate endpoint available for retry".into()));
    };
    let retry_endpoint = urls[idx].clone();
    ctx.backend_url = Some(retry_endpoint.to_string());
    let retry_metrics = registry.touch(&retry_endpoint);

    let mut retry_req = clone_request(&buffered);
    prepare_outgoing(&mut retry_req, &retry_endpoint, peer)?;
    retry_metrics.inflight_inc();
    let second = roundtrip(client, retry_req.map(body::full)).await;
    retry_metrics.inflight_dec();
    finish(second, &retry_metrics, wants_upgrade)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_every_listed_hop_by_hop_header() {
        let mut headers = HeaderMap::new();
        for name in HOP_BY_HOP {
            headers.insert(HeaderName::from_bytes(name.as_bytes()).unwrap(), HeaderValue::from_static("x"));
        }
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(http::header::CONTENT_TYPE));
    }

    #[test]
    fn appends_rather_than_replaces_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), HeaderValue::from_static("10.0.0.1"));
        append_forwarded_for(&mut headers, Some("127.0.0.1:9000".parse().unwrap()));
        assert_eq!(headers.get(X_FORWARDED_FOR).unwrap(), "10.0.0.1, 127.0.0.1");
    }

    #[test]
    fn sets_forwarded_proto_and_host_only_when_absent() {
        let mut headers = HeaderMap::new();
        set_if_absent(&mut headers, X_FORWARDED_PROTO, "https");
        set_if_absent(&mut headers, X_FORWARDED_PROTO, "http");
        assert_eq!(headers.get(X_FORWARDED_PROTO).unwrap(), "https");
    }

    #[test]
    fn detects_connection_upgrade_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONNECTION, HeaderValue::from_static("Keep-Alive, Upgrade"));
        assert!(requested_upgrade(&headers));
    }
}
