//! End-to-end scenarios driven through `Proxy::serve` against real loopback TCP backends, mirroring
//! the documented scenarios for exact-path shunting, round-robin load balancing, and the loopback
//! cap.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ServerBuilder;
use skipper_core::builtin;
use skipper_core::data_client::{Aggregator, ClientError, DataClient, RouteUpdate, Update};
use skipper_core::endpoint::EndpointRegistry;
use skipper_core::readiness::Ready;
use skipper_core::table::{BuilderConfig, TableBuilder};
use skipper_proxy::Proxy;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// A data client that serves one fixed eskip document and never produces incremental updates.
struct FixedDocument(String);

#[async_trait]
impl DataClient for FixedDocument {
    async fn load_all(&self) -> Result<Vec<RouteUpdate>, ClientError> {
        let doc = eskip::parse(&self.0);
        if let Some(err) = doc.errors().next() {
            return Err(ClientError::Other(format!("{err:?}")));
        }
        Ok(doc
            .oks()
            .map(|r| RouteUpdate {
                id: r.id.clone().unwrap_or_default(),
                ast: r.clone(),
            })
            .collect())
    }

    async fn load_update(&self, cancel: &CancellationToken) -> Result<Option<Update>, ClientError> {
        cancel.cancelled().await;
        Ok(None)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

async fn build_proxy(doc: &str) -> Proxy {
    let client: Arc<dyn DataClient> = Arc::new(FixedDocument(doc.to_string()));
    let aggregator = Aggregator::new(vec![client]);
    let endpoints = EndpointRegistry::default();
    let handle = TableBuilder::spawn(
        aggregator,
        builtin::predicate_registry(),
        builtin::filter_registry(),
        Vec::new(),
        Vec::new(),
        endpoints.clone(),
        BuilderConfig::default(),
        Ready::new(),
        CancellationToken::new(),
    )
    .await
    .expect("fixed document always produces a table");
    Proxy::new(handle, endpoints, false)
}

/// Spawns a trivial HTTP/1.1 server on an ephemeral loopback port that always answers with
/// `body` and returns its bound address.
async fn spawn_echo_backend(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let _ = ServerBuilder::new(TokioExecutor::new())
                    .serve_connection(
                        io,
                        service_fn(move |_req| async move {
                            Ok::<_, std::convert::Infallible>(
                                http::Response::builder().status(200).body(skipper_core::body::full(body)).unwrap(),
                            )
                        }),
                    )
                    .await;
            });
        }
    });
    addr
}

/// Runs one real loopback connection through a `hyper` client so the handler under test receives
/// a genuine `hyper::body::Incoming` request, matching how it is driven in production.
async fn round_trip(proxy: Arc<Proxy>, method: &str, path: &str, headers: &[(&str, &str)]) -> (http::StatusCode, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        let io = TokioIo::new(stream);
        let proxy = proxy.clone();
        let _ = ServerBuilder::new(TokioExecutor::new())
            .serve_connection_with_upgrades(
                io,
                service_fn(move |req| {
                    let proxy = proxy.clone();
                    async move { Ok::<_, std::convert::Infallible>(proxy.serve(req, Some(peer)).await) }
                }),
            )
            .await;
    });

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = http::Request::builder().method(method).uri(path);
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    let req = builder.body(http_body_util::Empty::<bytes::Bytes>::new()).unwrap();
    let resp = sender.send_request(req).await.unwrap();
    let status = resp.status();
    let body = http_body_util::BodyExt::collect(resp.into_body()).await.unwrap().to_bytes();
    let _ = server.await;
    (status, String::from_utf8_lossy(&body).to_string())
}

#[tokio::test]
async fn scenario_a_exact_path_shunt() {
    let doc = r#"r: Path("/hello") -> inlineContent("hi") -> status(200) -> <shunt>;"#;
    let proxy = Arc::new(build_proxy(doc).await);
    let (status, body) = round_trip(proxy, "GET", "/hello", &[]).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body, "hi");
}

#[tokio::test]
async fn unmatched_path_returns_404() {
    let doc = r#"r: Path("/hello") -> inlineContent("hi") -> <shunt>;"#;
    let proxy = Arc::new(build_proxy(doc).await);
    let (status, _) = round_trip(proxy, "GET", "/nope", &[]).await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scenario_d_loopback_cap_returns_500() {
    let doc = r#"r1: Path("/loop") -> setPath("/loop") -> <loopback>;"#;
    let proxy = Arc::new(build_proxy(doc).await);
    let (status, _) = round_trip(proxy, "GET", "/loop", &[]).await;
    assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn scenario_b_network_backend_proxies_request() {
    let addr = spawn_echo_backend("from upstream").await;
    let doc = format!(r#"r: Path("/api/:id") -> setRequestHeader("X-Id", "${{id}}") -> "http://{addr}";"#);
    let proxy = Arc::new(build_proxy(&doc).await);
    let (status, body) = round_trip(proxy, "GET", "/api/42", &[]).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body, "from upstream");
}

#[tokio::test]
async fn round_robin_alternates_between_two_endpoints() {
    let a = spawn_echo_backend("a").await;
    let b = spawn_echo_backend("b").await;
    let doc = format!(r#"r: Path("/lb") -> <roundRobin, "http://{a}", "http://{b}">;"#);
    let proxy = Arc::new(build_proxy(&doc).await);

    let mut seen = Vec::new();
    for _ in 0..4 {
        let (status, body) = round_trip(proxy.clone(), "GET", "/lb", &[]).await;
        assert_eq!(status, http::StatusCode::OK);
        seen.push(body);
    }
    assert_eq!(seen, vec!["a", "b", "a", "b"]);
}

#[tokio::test]
async fn hop_by_hop_headers_never_reach_the_client() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let _ = ServerBuilder::new(TokioExecutor::new())
                        .serve_connection(
                            io,
                            service_fn(move |_req| async move {
                                Ok::<_, std::convert::Infallible>(
                                    http::Response::builder()
                                        .status(200)
                                        .header("trailer", "X-Foo")
                                        .body(skipper_core::body::full("ok"))
                                        .unwrap(),
                                )
                            }),
                        )
                        .await;
                });
            }
        });
        addr
    };
    let doc = format!(r#"r: Path("/x") -> "http://{addr}";"#);
    let proxy = Arc::new(build_proxy(&doc).await);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        let io = TokioIo::new(stream);
        let _ = ServerBuilder::new(TokioExecutor::new())
            .serve_connection_with_upgrades(
                io,
                service_fn(move |req| {
                    let proxy = proxy.clone();
                    async move { Ok::<_, std::convert::Infallible>(proxy.serve(req, Some(peer)).await) }
                }),
            )
            .await;
    });

    let stream = tokio::net::TcpStream::connect(server_addr).await.unwrap();
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });
    let req = http::Request::builder()
        .method("GET")
        .uri("/x")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .unwrap();
    let resp = tokio::time::timeout(Duration::from_secs(5), sender.send_request(req)).await.unwrap().unwrap();
    assert!(!resp.headers().contains_key("trailer"));
}
