//! Process readiness tracking, adapted near-verbatim from the teacher's own `core::readiness`.
//!
//! The builder's `first_load` signal (`spec.md` §4.5) is one registered task among potentially
//! several (data clients, admin listeners, ...); the process is "ready" once every registered
//! task has dropped its guard.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::info;

/// Tracks whether the process is ready: true once every task registered via
/// [`Ready::register_task`] has dropped its [`BlockReady`] guard.
#[derive(Clone, Debug)]
pub struct Ready {
    pending: Arc<Mutex<HashSet<String>>>,
    started_at: Instant,
}

impl Default for Ready {
    fn default() -> Self {
        Self::new()
    }
}

impl Ready {
    pub fn new() -> Ready {
        Ready {
            pending: Default::default(),
            started_at: Instant::now(),
        }
    }

    /// Registers a dependency that must complete before the process is ready.
    pub fn register_task(&self, name: &str) -> BlockReady {
        self.pending.lock().unwrap().insert(name.to_string());
        BlockReady {
            parent: self.clone(),
            name: name.to_string(),
        }
    }

    pub fn pending(&self) -> HashSet<String> {
        self.pending.lock().unwrap().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }
}

/// Blocks readiness until dropped.
pub struct BlockReady {
    parent: Ready,
    name: String,
}

impl BlockReady {
    pub fn subtask(&self, name: &str) -> BlockReady {
        self.parent.register_task(name)
    }
}

impl Drop for BlockReady {
    fn drop(&mut self) {
        let mut pending = self.parent.pending.lock().unwrap();
        pending.remove(&self.name);
        let left = pending.len();
        let dur = self.parent.started_at.elapsed();
        if left == 0 {
            info!("task '{}' complete ({dur:?}), marking server ready", self.name);
        } else {
            info!("task '{}' complete ({dur:?}), still awaiting {left} tasks", self.name);
        }
    }
}
