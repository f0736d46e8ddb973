//! Process wiring (`SPEC_FULL.md` ambient stack): builds the table, the proxy, the hyper server,
//! and ties them to the signal-driven shutdown pattern adapted from the teacher's
//! `crates/core/src/signal.rs`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ServerBuilder;
use skipper_core::builtin;
use skipper_core::data_client::Aggregator;
use skipper_core::endpoint::EndpointRegistry;
use skipper_core::readiness::Ready;
use skipper_core::table::{BuilderConfig, EndpointRegistryMaintainer, FadeInProcessor, PostProcessor, TableBuilder};
use skipper_proxy::Proxy;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Args;
use crate::localfile::LocalFileClient;
use crate::signal::Shutdown;

/// Runs the proxy until a shutdown signal (Ctrl+C / SIGTERM) arrives, then stops accepting new
/// connections and lets in-flight requests finish.
pub async fn run(args: Args) -> anyhow::Result<()> {
    let shutdown = Shutdown::new();
    let cancel = CancellationToken::new();
    let ready = Ready::new();

    let client = LocalFileClient::new(args.routes_file.clone(), args.update_poll_interval);
    let aggregator = Aggregator::new(vec![Arc::new(client)]);
    let endpoints = EndpointRegistry::new(args.last_seen_timeout);

    let post: Vec<Box<dyn PostProcessor>> = vec![Box::new(EndpointRegistryMaintainer), Box::new(FadeInProcessor)];

    let config = BuilderConfig {
        source_poll_timeout: args.source_poll_timeout,
        periodic_rebuild: Some(args.periodic_rebuild),
    };

    let table = TableBuilder::spawn(
        aggregator,
        builtin::predicate_registry(),
        builtin::filter_registry(),
        Vec::new(),
        post,
        endpoints.clone(),
        config,
        ready.clone(),
        cancel.clone(),
    )
    .await?;

    let proxy = Arc::new(Proxy::new(table, endpoints, args.preserve_original));

    let listener = TcpListener::bind(args.address).await?;
    info!(address = %args.address, "skipper listening");

    let accept_cancel = cancel.clone();
    let accept_loop = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = accept_cancel.cancelled() => return,
                accepted = listener.accept() => {
                    let Ok((stream, peer)) = accepted else { continue };
                    let proxy = proxy.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| {
                            let proxy = proxy.clone();
                            async move { Ok::<_, Infallible>(proxy.serve(req, Some(peer)).await) }
                        });
                        if let Err(e) = ServerBuilder::new(TokioExecutor::new()).serve_connection_with_upgrades(io, service).await {
                            error!(peer = %peer, error = %e, "connection closed with error");
                        }
                    });
                }
            }
        }
    });

    shutdown.wait().await;
    info!("shutdown signal received, draining connections");
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(10), accept_loop).await;
    Ok(())
}
