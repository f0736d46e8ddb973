//! The one concrete [`DataClient`] this workspace ships: a poll-based reader of a single eskip
//! file (`SPEC_FULL.md` §2, `spec.md` §4.6 "concrete data-source adapters live outside this
//! crate"). Kept in the binary, not `skipper-core`, so the core stays data-source agnostic.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use skipper_core::data_client::{ClientError, DataClient, RouteUpdate, Update};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct LocalFileClient {
    path: PathBuf,
    poll_interval: Duration,
    last_contents: Mutex<Option<String>>,
    /// Ids seen on the last successful parse, so a route dropped from the file on the next
    /// read can be reported as an explicit deletion rather than silently lingering forever
    /// (`spec.md` §4.6: incremental updates carry upserts *and* deletions by id).
    last_ids: Mutex<HashSet<String>>,
}

impl LocalFileClient {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        LocalFileClient {
            path,
            poll_interval,
            last_contents: Mutex::new(None),
            last_ids: Mutex::new(HashSet::new()),
        }
    }

    fn parse_contents(&self, contents: &str) -> Vec<RouteUpdate> {
        let doc = eskip::parse(contents);
        for err in doc.errors() {
            warn!(path = %self.path.display(), error = %err, "dropping unparseable route");
        }
        doc.oks()
            .enumerate()
            .map(|(i, route)| RouteUpdate {
                id: route.id.clone().unwrap_or_else(|| format!("route_{i}")),
                ast: route.clone(),
            })
            .collect()
    }

    async fn read_file(&self) -> Result<String, ClientError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ClientError::Other(format!("reading {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl DataClient for LocalFileClient {
    async fn load_all(&self) -> Result<Vec<RouteUpdate>, ClientError> {
        let contents = self.read_file().await?;
        let routes = self.parse_contents(&contents);
        *self.last_contents.lock().await = Some(contents);
        *self.last_ids.lock().await = routes.iter().map(|r| r.id.clone()).collect();
        Ok(routes)
    }

    /// Polls the file on a fixed interval and emits an `Update` whenever its raw contents change
    /// since the last tick. There is no cheaper change-detection signal (no inotify dependency
    /// in the teacher's stack), so every tick still re-reads the whole file, but a rebuild is
    /// only triggered when that read disagrees with what was last seen. Ids present before but
    /// absent from the new parse are reported as deletions, not merely omitted, so a route
    /// removed from the file actually leaves the live table.
    async fn load_update(&self, cancel: &CancellationToken) -> Result<Option<Update>, ClientError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            let contents = self.read_file().await?;
            let mut last = self.last_contents.lock().await;
            if last.as_deref() == Some(contents.as_str()) {
                continue;
            }
            let routes = self.parse_contents(&contents);
            let mut last_ids = self.last_ids.lock().await;
            let new_ids: HashSet<String> = routes.iter().map(|r| r.id.clone()).collect();
            let delete: Vec<String> = last_ids.difference(&new_ids).cloned().collect();
            *last_ids = new_ids;
            drop(last_ids);
            *last = Some(contents);
            drop(last);
            return Ok(Some(Update { upsert: routes, delete }));
        }
    }

    fn name(&self) -> &str {
        "localfile"
    }
}
