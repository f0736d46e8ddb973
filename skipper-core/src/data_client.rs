//! Data-client contract and the fan-in aggregator (`spec.md` §4.6).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eskip::RouteAst;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A named route as carried between a data client and the aggregator: the parsed AST plus the
/// stable id under which it is tracked (`RouteAst::id` may be `None` in the eskip grammar, but a
/// data client contributing to a live table must assign one).
#[derive(Debug, Clone)]
pub struct RouteUpdate {
    pub id: String,
    pub ast: RouteAst,
}

/// One incremental batch from a data client: upserts plus deletions by id (`spec.md` §4.6).
#[derive(Debug, Clone, Default)]
pub struct Update {
    pub upsert: Vec<RouteUpdate>,
    pub delete: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("data client error: {0}")]
    Other(String),
}

/// Any source of route definitions (`spec.md` §4.6, §GLOSSARY). Implementations live outside
/// this crate (filesystem, Kubernetes, etcd, ...); `skipper::localfile` is the one concrete
/// adapter this workspace ships, to keep the binary runnable.
#[async_trait]
pub trait DataClient: Send + Sync {
    /// A full snapshot of every route this client currently knows about.
    async fn load_all(&self) -> Result<Vec<RouteUpdate>, ClientError>;

    /// Blocks until the next incremental batch is available or `cancel` fires.
    async fn load_update(&self, cancel: &CancellationToken) -> Result<Option<Update>, ClientError>;

    fn name(&self) -> &str;
}

/// A snapshot the aggregator hands to the builder: the union of every client's last known state.
#[derive(Debug, Clone, Default)]
pub struct AggregatedSnapshot {
    pub routes: Vec<RouteUpdate>,
}

/// Fan-in of multiple data clients into one stream of snapshots for the builder (`spec.md`
/// §4.5, §4.6). Runs each client's `load_update` loop on its own task with exponential backoff
/// on error, merges by id into a per-client state map, and emits a new [`AggregatedSnapshot`] on
/// every successful merge.
pub struct Aggregator {
    clients: Vec<std::sync::Arc<dyn DataClient>>,
    /// Per-client `id -> route` state, seeded by [`Self::initial_snapshot`] from each client's
    /// `load_all()` and kept current by [`Self::run`]'s `load_update` loop. Shared between the
    /// two so an incremental update from one client never drops routes another client only ever
    /// contributed via its initial full load.
    state: std::sync::Arc<tokio::sync::Mutex<HashMap<String, HashMap<String, RouteUpdate>>>>,
}

impl Aggregator {
    pub fn new(clients: Vec<std::sync::Arc<dyn DataClient>>) -> Self {
        Aggregator {
            clients,
            state: std::sync::Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Performs the initial full load across all clients, per §4.5 step 1. A client that fails
    /// its initial load is retried in the background via `run`; initial snapshot merges whatever
    /// succeeded within `source_poll_timeout`. Returns `Err` only if *no* client produced
    /// anything before the timeout (`spec.md` §4.5 `BuildAborted`).
    pub async fn initial_snapshot(&self, source_poll_timeout: Duration) -> Result<AggregatedSnapshot, ()> {
        let mut any = false;
        let deadline = tokio::time::Instant::now() + source_poll_timeout;
        let mut state = self.state.lock().await;
        for client in &self.clients {
            let entry = state.entry(client.name().to_string()).or_default();
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, client.load_all()).await {
                Ok(Ok(routes)) => {
                    any = true;
                    for r in routes {
                        entry.insert(r.id.clone(), r);
                    }
                }
                Ok(Err(e)) => warn!(client = client.name(), error = %e, "initial load_all failed"),
                Err(_) => warn!(client = client.name(), "initial load_all timed out"),
            }
        }
        if !any {
            return Err(());
        }
        let merged: HashMap<String, RouteUpdate> =
            state.values().flat_map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone()))).collect();
        Ok(AggregatedSnapshot {
            routes: merged.into_values().collect(),
        })
    }

    /// Spawns one task per client that repeatedly calls `load_update`, merging results into a
    /// shared state map and pushing a fresh [`AggregatedSnapshot`] down `tx` on every batch.
    /// Errors preempt partial updates: per `spec.md` §9's Open Question resolution, when a
    /// client's `load_update` call errors the partial batch (if any was already decoded) is
    /// discarded rather than partially merged.
    pub fn run(self, tx: mpsc::Sender<AggregatedSnapshot>, cancel: CancellationToken) {
        let clients = self.clients;
        let state = self.state;
        for client in clients {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let state = state.clone();
            tokio::spawn(async move {
                state.lock().await.entry(client.name().to_string()).or_insert_with(HashMap::new);
                let mut backoff = Duration::from_millis(200);
                const MAX_BACKOFF: Duration = Duration::from_secs(30);
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    match client.load_update(&cancel).await {
                        Ok(Some(update)) => {
                            backoff = Duration::from_millis(200);
                            let mut guard = state.lock().await;
                            let entry = guard.entry(client.name().to_string()).or_default();
                            for r in update.upsert {
                                entry.insert(r.id.clone(), r);
                            }
                            for id in update.delete {
                                entry.remove(&id);
                            }
                            let merged: HashMap<String, RouteUpdate> =
                                guard.values().flat_map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone()))).collect();
                            drop(guard);
                            let snapshot = AggregatedSnapshot {
                                routes: merged.into_values().collect(),
                            };
                            if tx.send(snapshot).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(client = client.name(), error = %e, backoff = ?backoff, "load_update failed, retrying");
                            tokio::select! {
                                _ = tokio::time::sleep(backoff) => {}
                                _ = cancel.cancelled() => return,
                            }
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                    }
                }
            });
        }
    }
}
