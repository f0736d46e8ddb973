//! Process-global endpoint registry (`spec.md` §4.10).
//!
//! Keyed by `scheme://host:port`, grounded on the teacher's lock-free `flurry::HashMap` use for
//! its own per-key connection metadata (`crates/hbone/src/pool.rs`). Every field the hot dispatch
//! path touches is a plain atomic so endpoint bookkeeping never takes a lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Entries older than this, with no publish touching them, are garbage-collected at the end of
/// each table build (`spec.md` §3, §4.10).
pub const DEFAULT_LAST_SEEN_TIMEOUT: Duration = Duration::from_secs(60);

fn monotonic_now_millis() -> i64 {
    // Instant has no epoch, so metrics are stored relative to process start; GC and fade-in only
    // ever compare two of these values against each other or against an elapsed Duration.
    static START: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);
    START.elapsed().as_millis() as i64
}

fn wall_clock_now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Live metrics for one endpoint, created on first sight and updated on every table build
/// (`spec.md` §3, §4.10). All fields are concurrent-safe for atomic read/write.
#[derive(Debug)]
pub struct EndpointMetrics {
    detected_at_millis: AtomicI64,
    last_seen_millis: AtomicI64,
    inflight_requests: AtomicI64,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    fail_probability_bits: AtomicU64,
    dead: std::sync::atomic::AtomicBool,
}

impl EndpointMetrics {
    fn new_now() -> Self {
        let now = monotonic_now_millis();
        EndpointMetrics {
            detected_at_millis: AtomicI64::new(now),
            last_seen_millis: AtomicI64::new(now),
            inflight_requests: AtomicI64::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            fail_probability_bits: AtomicU64::new(0.0f64.to_bits()),
            dead: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Elapsed time since this endpoint was first detected, for fade-in weighting
    /// (`spec.md` §4.12).
    pub fn detected_elapsed(&self) -> Duration {
        let detected = self.detected_at_millis.load(Ordering::Relaxed);
        let now = monotonic_now_millis();
        Duration::from_millis(now.saturating_sub(detected).max(0) as u64)
    }

    /// Lets `endpoint_created` filters override the detected time with a caller-supplied wall
    /// clock timestamp, so fade-in survives a restart (`spec.md` §4.12).
    pub fn set_detected_at(&self, wall_clock_millis: i64) {
        let elapsed_wall = wall_clock_now_millis().saturating_sub(wall_clock_millis).max(0);
        let adjusted = monotonic_now_millis().saturating_sub(elapsed_wall);
        self.detected_at_millis.store(adjusted, Ordering::Relaxed);
    }

    pub fn touch_seen(&self) {
        self.last_seen_millis.store(monotonic_now_millis(), Ordering::Relaxed);
    }

    fn seen_elapsed(&self) -> Duration {
        let seen = self.last_seen_millis.load(Ordering::Relaxed);
        let now = monotonic_now_millis();
        Duration::from_millis(now.saturating_sub(seen).max(0) as u64)
    }

    pub fn inflight_inc(&self) {
        self.inflight_requests.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inflight_dec(&self) {
        self.inflight_requests.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn mark_failed(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inflight(&self) -> i64 {
        self.inflight_requests.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub fn fail_probability(&self) -> f64 {
        f64::from_bits(self.fail_probability_bits.load(Ordering::Relaxed))
    }

    pub fn set_fail_probability(&self, p: f64) {
        self.fail_probability_bits.store(p.to_bits(), Ordering::Relaxed);
    }

    pub fn reset_counters(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
    }

    pub fn mark_dead(&self, dead: bool) {
        self.dead.store(dead, Ordering::Relaxed);
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Relaxed)
    }
}

/// Process-wide metrics keyed by `host:port` (`spec.md` §4.10, §GLOSSARY).
#[derive(Clone)]
pub struct EndpointRegistry {
    inner: Arc<flurry::HashMap<Arc<str>, Arc<EndpointMetrics>>>,
    last_seen_timeout: Duration,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LAST_SEEN_TIMEOUT)
    }
}

impl EndpointRegistry {
    pub fn new(last_seen_timeout: Duration) -> Self {
        EndpointRegistry {
            inner: Arc::new(flurry::HashMap::new()),
            last_seen_timeout,
        }
    }

    /// Called once per table build for every endpoint present in the new table: creates the
    /// entry on first sight, otherwise just touches `last_seen` (`spec.md` §3).
    pub fn touch(&self, endpoint: &Arc<str>) -> Arc<EndpointMetrics> {
        let guard = self.inner.guard();
        if let Some(existing) = self.inner.get(endpoint, &guard) {
            existing.touch_seen();
            return existing.clone();
        }
        let metrics = Arc::new(EndpointMetrics::new_now());
        match self.inner.try_insert(endpoint.clone(), metrics.clone(), &guard) {
            Ok(_) => metrics,
            Err(e) => {
                e.current.touch_seen();
                e.current.clone()
            }
        }
    }

    pub fn get(&self, endpoint: &str) -> Option<Arc<EndpointMetrics>> {
        let guard = self.inner.guard();
        self.inner.get(endpoint, &guard).cloned()
    }

    pub fn inflight(&self, endpoint: &str) -> i64 {
        self.get(endpoint).map(|m| m.inflight()).unwrap_or(0)
    }

    pub fn is_dead(&self, endpoint: &str) -> bool {
        self.get(endpoint).map(|m| m.is_dead()).unwrap_or(false)
    }

    /// Removes entries absent from the latest publish for longer than `last_seen_timeout`
    /// (`spec.md` §3, §4.10). Run at the end of each table build.
    pub fn gc(&self) {
        let guard = self.inner.guard();
        let stale: Vec<Arc<str>> = self
            .inner
            .iter(&guard)
            .filter(|(_, m)| m.seen_elapsed() >= self.last_seen_timeout)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            self.inner.remove(&key, &guard);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_creates_then_refreshes() {
        let reg = EndpointRegistry::default();
        let ep: Arc<str> = Arc::from("http://a:80");
        let m1 = reg.touch(&ep);
        let m2 = reg.touch(&ep);
        assert!(Arc::ptr_eq(&m1, &m2));
    }

    #[test]
    fn gc_removes_stale_entries() {
        let reg = EndpointRegistry::new(Duration::from_millis(0));
        let ep: Arc<str> = Arc::from("http://a:80");
        reg.touch(&ep);
        std::thread::sleep(Duration::from_millis(5));
        reg.gc();
        assert!(reg.get("http://a:80").is_none());
    }

    #[test]
    fn inflight_tracks_dispatch() {
        let reg = EndpointRegistry::default();
        let ep: Arc<str> = Arc::from("http://a:80");
        let m = reg.touch(&ep);
        m.inflight_inc();
        assert_eq!(reg.inflight("http://a:80"), 1);
        m.inflight_dec();
        assert_eq!(reg.inflight("http://a:80"), 0);
    }
}
