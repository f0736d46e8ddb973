//! The proxy entry handler (`spec.md` §4.11): the hyper-facing surface that ties the table,
//! filter pipeline, backend dispatcher, and upgrade subsystem together into one request/response
//! function.

pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod upgrade;

use std::net::SocketAddr;

use skipper_core::body::{self, Body};
use skipper_core::context::{Context, MAX_LOOPBACKS};
use skipper_core::endpoint::EndpointRegistry;
use skipper_core::route::Backend;
use skipper_core::table::TableHandle;
use tracing::{error, warn};

use dispatcher::UpstreamClient;
use error::ProxyError;

fn error_response(err: ProxyError) -> http::Response<Body> {
    error!(status = %err.status(), "{err}");
    http::Response::builder()
        .status(err.status())
        .body(body::empty())
        .expect("status + empty body always builds")
}

fn default_shunt_response() -> http::Response<Body> {
    http::Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(body::empty())
        .expect("status + empty body always builds")
}

/// Owns the live routing table, the shared upstream connection pool, and the process-wide
/// endpoint registry; `serve` is the per-request entry point a hyper `Service` calls into
/// (`spec.md` §4.11).
#[derive(Clone)]
pub struct Proxy {
    table: TableHandle,
    client: UpstreamClient,
    endpoints: EndpointRegistry,
    preserve_original: bool,
}

impl Proxy {
    pub fn new(table: TableHandle, endpoints: EndpointRegistry, preserve_original: bool) -> Self {
        Proxy {
            table,
            client: dispatcher::new_client(),
            endpoints,
            preserve_original,
        }
    }

    /// Handles one inbound request end to end: match, run the filter pipeline, dispatch to a
    /// backend (following loopbacks up to `MAX_LOOPBACKS`), run response filters, and hand off to
    /// the upgrade subsystem if the backend answered `101` (`spec.md` §4.2-4.9, §4.13).
    pub async fn serve(&self, mut raw_req: http::Request<hyper::body::Incoming>, peer: Option<SocketAddr>) -> http::Response<Body> {
        let wants_upgrade = dispatcher::requested_upgrade(raw_req.headers());
        let mut client_upgrade = wants_upgrade.then(|| hyper::upgrade::on(&mut raw_req));

        let mut current = raw_req.map(body::boxed);
        let mut loopback_count = 0u32;

        loop {
            let matched = {
                let table = self.table.load();
                match table.match_request(current.uri(), current.method(), current.headers(), peer) {
                    Some(m) => m,
                    None => return error_response(ProxyError::NoMatch),
                }
            };

            let route = matched.route;
            let mut ctx = Context::new(current, route.clone(), matched.path_params, peer, self.preserve_original, Some(self.endpoints.clone()));
            ctx.loopback_count = loopback_count;

            let request_phase = pipeline::run_request_phase(&mut ctx);
            let mut is_upgrade = false;
            let mut upstream_upgrade = None;

            if !ctx.served {
                match &ctx.route.backend {
                    Backend::Shunt => {
                        ctx.response = Some(ctx.response.take().unwrap_or_else(default_shunt_response));
                    }
                    Backend::Loopback => {
                        ctx.loopback_count += 1;
                        if ctx.loopback_count > MAX_LOOPBACKS {
                            return error_response(ProxyError::LoopDetected);
                        }
                        loopback_count = ctx.loopback_count;
                        current = ctx.request;
                        continue;
                    }
                    Backend::Dynamic | Backend::Network { .. } | Backend::Lb { .. } => {
                        match dispatcher::dispatch(&mut ctx, &self.client, &self.endpoints).await {
                            Ok(dispatched) => {
                                is_upgrade = dispatched.is_upgrade;
                                upstream_upgrade = dispatched.upstream_upgrade;
                                ctx.response = Some(dispatched.response);
                            }
                            Err(e) => return error_response(e),
                        }
                    }
                }
            }

            pipeline::run_response_phase(&mut ctx, request_phase.ran, false);

            if is_upgrade {
                if let (Some(client_upgrade), Some(upstream_upgrade)) = (client_upgrade.take(), upstream_upgrade) {
                    spawn_pump(route.id.to_string(), client_upgrade, upstream_upgrade);
                }
            }
            return finalize(ctx, is_upgrade);
        }
    }
}

fn finalize(mut ctx: Context, is_upgrade: bool) -> http::Response<Body> {
    let mut resp = ctx.response.take().unwrap_or_else(default_shunt_response);
    if !is_upgrade {
        dispatcher::strip_hop_by_hop(resp.headers_mut());
    }
    resp
}

fn spawn_pump(route_id: String, client_upgrade: hyper::upgrade::OnUpgrade, upstream_upgrade: hyper::upgrade::OnUpgrade) {
    tokio::spawn(async move {
        match (client_upgrade.await, upstream_upgrade.await) {
            (Ok(client), Ok(upstream)) => upgrade::pump(&route_id, client, upstream).await,
            (Err(e), _) => warn!(route_id = %route_id, error = %e, "upgrade: failed to hijack client connection"),
            (_, Err(e)) => warn!(route_id = %route_id, error = %e, "upgrade: failed to hijack upstream connection"),
        }
    });
}
