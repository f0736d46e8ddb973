//! The routing table and its builder (`spec.md` §4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, Guard};
use eskip::{Backend as AstBackend, Predicates, RouteAst};
use http::Method;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::RequestView;
use crate::data_client::{AggregatedSnapshot, Aggregator, RouteUpdate};
use crate::endpoint::EndpointRegistry;
use crate::error::{Error, Result};
use crate::fadein;
use crate::filter::FilterRegistry;
use crate::predicate::PredicateRegistry;
use crate::readiness::Ready;
use crate::route::{Backend, Endpoint, FadeIn, FilterInstance, PathMatcher, Route, ValidatorInstance};
use crate::trie::{self, PathTrie, PathTrieBuilder};
use crate::value::{self, Arg, RouteId};

/// A transform over the incoming AST batch, run before instantiation (`spec.md` §4.5 step 2).
pub trait PreProcessor: Send + Sync {
    fn process(&self, routes: Vec<RouteUpdate>) -> Vec<RouteUpdate>;
}

/// A transform over a built [`Table`], run after construction (`spec.md` §4.5 step 5). May
/// annotate routes (not modeled as mutation — post-processors here run *before* the table's
/// routes are frozen into their final `Arc`, via [`TableBuilder`]'s internal staging) or reject
/// the whole build by returning `Err`.
pub trait PostProcessor: Send + Sync {
    fn process(&self, routes: Vec<Route>, endpoints: &EndpointRegistry) -> Vec<Route>;
}

/// Touches every endpoint referenced by the new table so the registry's GC (`spec.md` §4.10)
/// sees them as live.
pub struct EndpointRegistryMaintainer;

impl PostProcessor for EndpointRegistryMaintainer {
    fn process(&self, routes: Vec<Route>, endpoints: &EndpointRegistry) -> Vec<Route> {
        for route in &routes {
            if let Backend::Lb { endpoints: eps, .. } = &route.backend {
                for ep in eps {
                    endpoints.touch(&ep.url);
                }
            }
        }
        routes
    }
}

/// Rewrites each fade-in LB route's endpoint list to bias traffic toward warm endpoints
/// (`spec.md` §4.12).
pub struct FadeInProcessor;

impl PostProcessor for FadeInProcessor {
    fn process(&self, mut routes: Vec<Route>, endpoints: &EndpointRegistry) -> Vec<Route> {
        for route in &mut routes {
            if let Backend::Lb {
                endpoints: eps,
                fade_in: Some(fade),
                ..
            } = &mut route.backend
            {
                let weighted = fadein::weighted_endpoints(eps, fade, endpoints);
                *eps = weighted.into_iter().map(|url| Endpoint { url }).collect();
            }
        }
        routes
    }
}

/// Immutable after publication (`spec.md` §3).
pub struct Table {
    trie: PathTrie,
    by_id: HashMap<RouteId, Arc<Route>>,
}

pub struct RouteMatch {
    pub route: Arc<Route>,
    pub path_params: HashMap<String, String>,
}

impl Table {
    /// Stage-one path lookup plus stage-two validator evaluation (`spec.md` §4.2, §4.3). Returns
    /// the first candidate, in tie-break order, whose non-path predicates all pass.
    pub fn match_request(
        &self,
        uri: &http::Uri,
        method: &Method,
        headers: &http::HeaderMap,
        peer_addr: Option<std::net::SocketAddr>,
    ) -> Option<RouteMatch> {
        let lookup = self.trie.lookup(uri.path(), method)?;
        let view = RequestView {
            method,
            uri,
            headers,
            path_params: &lookup.path_params,
            peer_addr,
        };
        for candidate in lookup.candidates {
            if candidate.matches_validators(&view) {
                return Some(RouteMatch {
                    route: candidate.clone(),
                    path_params: lookup.path_params.clone(),
                });
            }
        }
        None
    }

    pub fn get(&self, id: &RouteId) -> Option<&Arc<Route>> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &RouteId> {
        self.by_id.keys()
    }
}

/// The live table pointer: an atomic swap, never locked on the read path (`spec.md` §5).
#[derive(Clone)]
pub struct TableHandle(Arc<ArcSwap<Table>>);

impl TableHandle {
    pub fn load(&self) -> Guard<Arc<Table>> {
        self.0.load()
    }
}

fn is_path_name(name: &str) -> bool {
    name == "Path"
}

fn is_method_name(name: &str) -> bool {
    name == "Method"
}

fn is_fadein_name(name: &str) -> bool {
    name == "fadeIn"
}

fn parse_fade_in(args: &[Arg], id: &str) -> Result<FadeIn> {
    let [Arg::Number(duration), Arg::Number(exponent)] = args else {
        return Err(Error::InvalidArgs {
            id: id.to_string(),
            name: "fadeIn".to_string(),
            reason: "fadeIn(durationSeconds, exponent) takes two numeric arguments".to_string(),
        });
    };
    Ok(FadeIn {
        duration: Duration::from_secs_f64((*duration).max(0.0)),
        exponent: *exponent,
    })
}

/// Turns one parsed `RouteAst` into a fully resolved [`Route`] (`spec.md` §4.5 step 3).
fn build_route(
    id: &str,
    ast: &RouteAst,
    insertion_order: usize,
    predicates: &PredicateRegistry,
    filters: &FilterRegistry,
) -> Result<Route> {
    let mut path = PathMatcher::None;
    let mut method = None;
    let mut validators = Vec::new();
    let mut path_seen = false;

    match &ast.predicates {
        Predicates::Any => {}
        Predicates::All(preds) => {
            for p in preds {
                if is_path_name(&p.name) {
                    if path_seen {
                        return Err(Error::MultiplePathMatchers { id: id.to_string() });
                    }
                    path_seen = true;
                    let [eskip::Arg::Str(literal)] = p.args.as_slice() else {
                        return Err(Error::InvalidArgs {
                            id: id.to_string(),
                            name: "Path".to_string(),
                            reason: "Path(template) takes one string argument".to_string(),
                        });
                    };
                    path = trie::parse_path_template(literal).map_err(|reason| Error::InvalidArgs {
                        id: id.to_string(),
                        name: "Path".to_string(),
                        reason,
                    })?;
                } else if is_method_name(&p.name) {
                    let [eskip::Arg::Str(m)] = p.args.as_slice() else {
                        return Err(Error::InvalidArgs {
                            id: id.to_string(),
                            name: "Method".to_string(),
                            reason: "Method(verb) takes one string argument".to_string(),
                        });
                    };
                    method = Some(Method::from_bytes(m.as_bytes()).map_err(|_| Error::InvalidArgs {
                        id: id.to_string(),
                        name: "Method".to_string(),
                        reason: format!("not a valid HTTP method: {m}"),
                    })?);
                } else {
                    let spec = predicates.get(&p.name).ok_or_else(|| Error::UnknownPredicate {
                        id: id.to_string(),
                        name: p.name.clone(),
                    })?;
                    let args = value::args_from_ast(&p.args).map_err(|reason| Error::InvalidArgs {
                        id: id.to_string(),
                        name: p.name.clone(),
                        reason,
                    })?;
                    let instance = spec.create_instance(&args).map_err(|reason| Error::InvalidArgs {
                        id: id.to_string(),
                        name: p.name.clone(),
                        reason,
                    })?;
                    validators.push(ValidatorInstance {
                        name: Arc::from(p.name.as_str()),
                        instance,
                    });
                }
            }
        }
    }

    let mut fade_in = None;
    let mut filter_instances = Vec::new();
    for f in &ast.filters {
        if is_fadein_name(&f.name) {
            let args = value::args_from_ast(&f.args).map_err(|reason| Error::InvalidArgs {
                id: id.to_string(),
                name: "fadeIn".to_string(),
                reason,
            })?;
            fade_in = Some(parse_fade_in(&args, id)?);
            continue;
        }
        let spec = filters.get(&f.name).ok_or_else(|| Error::UnknownFilter {
            id: id.to_string(),
            name: f.name.clone(),
        })?;
        let args = value::args_from_ast(&f.args).map_err(|reason| Error::InvalidArgs {
            id: id.to_string(),
            name: f.name.clone(),
            reason,
        })?;
        let instance = spec.create_instance(&args).map_err(|reason| Error::InvalidArgs {
            id: id.to_string(),
            name: f.name.clone(),
            reason,
        })?;
        filter_instances.push(FilterInstance {
            name: Arc::from(f.name.as_str()),
            instance,
        });
    }

    let backend = match &ast.backend {
        AstBackend::Shunt => Backend::Shunt,
        AstBackend::Loopback => Backend::Loopback,
        AstBackend::Dynamic => Backend::Dynamic,
        AstBackend::Network(url) => Backend::Network { url: Arc::from(url.as_str()) },
        AstBackend::Lb { algorithm, endpoints } => {
            if endpoints.is_empty() {
                return Err(Error::InvalidArgs {
                    id: id.to_string(),
                    name: algorithm.clone(),
                    reason: "an LB backend needs at least one endpoint".to_string(),
                });
            }
            let algo = crate::algorithm::by_name(algorithm).ok_or_else(|| Error::InvalidArgs {
                id: id.to_string(),
                name: algorithm.clone(),
                reason: format!("unknown load-balancer algorithm {algorithm:?}"),
            })?;
            Backend::Lb {
                algorithm: algo,
                endpoints: endpoints.iter().map(|url| Endpoint { url: Arc::from(url.as_str()) }).collect(),
                fade_in,
            }
        }
    };

    let specificity = validators.len() + usize::from(method.is_some());

    Ok(Route {
        id: RouteId::from(id),
        path,
        method,
        validators,
        filters: filter_instances,
        backend,
        specificity,
        insertion_order,
    })
}

pub struct BuilderConfig {
    pub source_poll_timeout: Duration,
    pub periodic_rebuild: Option<Duration>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            source_poll_timeout: Duration::from_secs(10),
            periodic_rebuild: Some(Duration::from_secs(60)),
        }
    }
}

/// The three triggers that cause a rebuild (`spec.md` §4.5).
pub enum BuildTrigger {
    Initial,
    Incremental,
    Periodic,
}

/// Owns the background build loop. Construct with [`TableBuilder::spawn`]; the returned
/// [`TableHandle`] is cheap to clone and share with every request handler.
pub struct TableBuilder;

impl TableBuilder {
    /// Runs the full build pipeline once over `snapshot`, producing a new [`Table`] or an error
    /// (`spec.md` §4.5 steps 2-5). A build that resolves to zero routes after pre/post-processing
    /// is rejected by the caller, not here, so the caller can decide whether to keep the previous
    /// table.
    pub fn build_once(
        snapshot: &AggregatedSnapshot,
        predicates: &PredicateRegistry,
        filters: &FilterRegistry,
        pre: &[Box<dyn PreProcessor>],
        post: &[Box<dyn PostProcessor>],
        endpoints: &EndpointRegistry,
    ) -> Table {
        let mut updates = snapshot.routes.clone();
        for p in pre {
            updates = p.process(updates);
        }

        let mut routes = Vec::with_capacity(updates.len());
        for (i, update) in updates.iter().enumerate() {
            match build_route(&update.id, &update.ast, i, predicates, filters) {
                Ok(route) => routes.push(route),
                Err(e) => warn!(route_id = %update.id, error = %e, "dropping route"),
            }
        }

        for p in post {
            routes = p.process(routes, endpoints);
        }

        let mut builder = PathTrieBuilder::new();
        let mut by_id = HashMap::with_capacity(routes.len());
        for route in routes {
            let route = Arc::new(route);
            by_id.insert(route.id.clone(), route.clone());
            if let Err(e) = builder.insert(route.clone()) {
                warn!(route_id = %route.id, error = %e, "dropping route: trie insertion failed");
                by_id.remove(&route.id);
            }
        }
        let trie = builder.build();
        Table { trie, by_id }
    }

    /// Spawns the dedicated builder task and the per-client aggregator tasks, returning a handle
    /// to the live table and a `Ready` guard release tied to the first successful publish
    /// (`spec.md` §4.5).
    pub async fn spawn(
        aggregator: Aggregator,
        predicates: PredicateRegistry,
        filters: FilterRegistry,
        pre: Vec<Box<dyn PreProcessor>>,
        post: Vec<Box<dyn PostProcessor>>,
        endpoints: EndpointRegistry,
        config: BuilderConfig,
        ready: Ready,
        cancel: CancellationToken,
    ) -> Result<TableHandle> {
        let Ok(initial) = aggregator.initial_snapshot(config.source_poll_timeout).await else {
            return Err(Error::BuildAborted);
        };

        let table = Self::build_once(&initial, &predicates, &filters, &pre, &post, &endpoints);
        endpoints.gc();
        let handle = TableHandle(Arc::new(ArcSwap::new(Arc::new(table))));

        let block_ready = ready.register_task("routing-table-builder");
        let (tx, mut rx) = mpsc::channel::<AggregatedSnapshot>(8);
        aggregator.run(tx, cancel.clone());

        let task_handle = handle.clone();
        tokio::spawn(async move {
            let mut block_ready = Some(block_ready);
            let mut last_snapshot = initial;
            let mut periodic = match config.periodic_rebuild {
                Some(d) => tokio::time::interval(d),
                None => tokio::time::interval(Duration::from_secs(u64::MAX)),
            };
            periodic.tick().await; // consume the immediate first tick

            loop {
                let trigger = tokio::select! {
                    _ = cancel.cancelled() => break,
                    snap = rx.recv() => match snap {
                        Some(s) => {
                            last_snapshot = s;
                            BuildTrigger::Incremental
                        }
                        None => break,
                    },
                    _ = periodic.tick() => BuildTrigger::Periodic,
                };

                // Drain any additional queued snapshots so a burst of updates collapses into one
                // rebuild; keep only the most recent.
                while let Ok(snap) = rx.try_recv() {
                    last_snapshot = snap;
                }

                let new_table = Self::build_once(&last_snapshot, &predicates, &filters, &pre, &post, &endpoints);
                if new_table.is_empty() {
                    error!(trigger = ?matches!(trigger, BuildTrigger::Periodic), "build produced zero routes, keeping previous table");
                    continue;
                }
                endpoints.gc();
                info!(routes = new_table.len(), "publishing new routing table");
                task_handle.0.store(Arc::new(new_table));
                if let Some(guard) = block_ready.take() {
                    drop(guard);
                }
            }
            debug!("routing table builder stopped");
        });

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    struct StaticClient {
        name: String,
        routes: Vec<RouteUpdate>,
        updates: AsyncMutex<std::vec::IntoIter<crate::data_client::Update>>,
    }

    #[async_trait]
    impl crate::data_client::DataClient for StaticClient {
        async fn load_all(&self) -> Result<Vec<RouteUpdate>, crate::data_client::ClientError> {
            Ok(self.routes.clone())
        }

        async fn load_update(
            &self,
            cancel: &CancellationToken,
        ) -> Result<Option<crate::data_client::Update>, crate::data_client::ClientError> {
            let mut updates = self.updates.lock().await;
            match updates.next() {
                Some(u) => Ok(Some(u)),
                None => {
                    cancel.cancelled().await;
                    Ok(None)
                }
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn make_update(id: &str, eskip_src: &str) -> RouteUpdate {
        let doc = eskip::parse(eskip_src);
        let ast = doc.routes[0].result.as_ref().unwrap().clone();
        RouteUpdate { id: id.to_string(), ast }
    }

    fn registries() -> (PredicateRegistry, FilterRegistry) {
        (crate::builtin::predicate_registry(), crate::builtin::filter_registry())
    }

    #[test]
    fn empty_snapshot_does_not_produce_a_table_with_routes() {
        let (preds, filts) = registries();
        let snapshot = AggregatedSnapshot::default();
        let endpoints = EndpointRegistry::default();
        let table = TableBuilder::build_once(&snapshot, &preds, &filts, &[], &[], &endpoints);
        assert!(table.is_empty());
    }

    #[test]
    fn deterministic_matching_for_fixed_table_and_request() {
        let (preds, filts) = registries();
        let snapshot = AggregatedSnapshot {
            routes: vec![make_update("r", r#"r: Path("/hello") -> <shunt>;"#)],
        };
        let endpoints = EndpointRegistry::default();
        let table = TableBuilder::build_once(&snapshot, &preds, &filts, &[], &[], &endpoints);
        let uri: http::Uri = "/hello".parse().unwrap();
        let headers = http::HeaderMap::new();
        for _ in 0..50 {
            let m = table.match_request(&uri, &http::Method::GET, &headers, None);
            assert_eq!(m.unwrap().route.id.as_str(), "r");
        }
    }

    #[test]
    fn multiple_path_predicates_are_rejected() {
        let (preds, filts) = registries();
        let update = make_update("r", r#"r: Path("/a") && Path("/b") -> <shunt>;"#);
        let err = build_route("r", &update.ast, 0, &preds, &filts).unwrap_err();
        assert!(matches!(err, Error::MultiplePathMatchers { .. }));
    }

    #[test]
    fn unknown_predicate_drops_only_that_route() {
        let (preds, filts) = registries();
        let snapshot = AggregatedSnapshot {
            routes: vec![
                make_update("bad", r#"bad: Bogus("x") -> <shunt>;"#),
                make_update("good", r#"good: Path("/ok") -> <shunt>;"#),
            ],
        };
        let endpoints = EndpointRegistry::default();
        let table = TableBuilder::build_once(&snapshot, &preds, &filts, &[], &[], &endpoints);
        assert_eq!(table.len(), 1);
        assert!(table.get(&RouteId::from("good")).is_some());
        assert!(table.get(&RouteId::from("bad")).is_none());
    }

    #[tokio::test]
    async fn atomic_publish_never_exposes_a_half_built_table() {
        let (preds, filts) = registries();
        let client: Arc<dyn crate::data_client::DataClient> = Arc::new(StaticClient {
            name: "static".into(),
            routes: vec![make_update("r1", r#"r1: Path("/one") -> <shunt>;"#)],
            updates: AsyncMutex::new(
                vec![crate::data_client::Update {
                    upsert: vec![make_update("r2", r#"r2: Path("/two") -> <shunt>;"#)],
                    delete: vec![],
                }]
                .into_iter(),
            ),
        });
        let aggregator = Aggregator::new(vec![client]);
        let cancel = CancellationToken::new();
        let handle = TableBuilder::spawn(
            aggregator,
            preds,
            filts,
            Vec::new(),
            Vec::new(),
            EndpointRegistry::default(),
            BuilderConfig {
                periodic_rebuild: None,
                ..BuilderConfig::default()
            },
            Ready::new(),
            cancel.clone(),
        )
        .await
        .unwrap();

        let first = handle.load();
        assert!(first.get(&RouteId::from("r1")).is_some());

        // Allow the incremental update to publish, then confirm the reader sees a fully-formed
        // table (never a mix of old and new ids) on the next load.
        for _ in 0..100 {
            let g = handle.load();
            if g.get(&RouteId::from("r2")).is_some() {
                assert!(g.get(&RouteId::from("r1")).is_some());
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
    }
}
