//! Load-balancer algorithms (`spec.md` §4.9).
//!
//! Each algorithm is a per-route, stateful instance assigned by the routing table builder's
//! algorithm-binding post-processor (`spec.md` §4.5, §4.9). Selection never blocks and never
//! takes a lock shared across routes — state is either a single atomic counter (`round_robin`)
//! or entirely derived from the call's arguments (`random`, `consistent_hash`,
//! `power_of_n_choices`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::endpoint::EndpointRegistry;
use crate::value::Arg;

/// The inputs an algorithm needs to pick one endpoint out of a route's live list.
pub struct SelectCtx<'a> {
    pub endpoints: &'a [Arc<str>],
    pub client_key: Option<&'a str>,
    pub registry: &'a EndpointRegistry,
    pub exclude: Option<usize>,
}

pub trait Algorithm: Send + Sync + std::fmt::Debug {
    /// Returns the index into `ctx.endpoints` chosen for this request, or `None` if the endpoint
    /// list is empty.
    fn select(&self, ctx: &SelectCtx<'_>) -> Option<usize>;
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl Algorithm for RoundRobin {
    fn select(&self, ctx: &SelectCtx<'_>) -> Option<usize> {
        let n = ctx.endpoints.len();
        if n == 0 || (n == 1 && ctx.exclude == Some(0)) {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % n;
        if Some(i) == ctx.exclude { Some((i + 1) % n) } else { Some(i) }
    }
}

#[derive(Debug, Default)]
pub struct Random;

impl Algorithm for Random {
    fn select(&self, ctx: &SelectCtx<'_>) -> Option<usize> {
        let n = ctx.endpoints.len();
        if n == 0 || (n == 1 && ctx.exclude == Some(0)) {
            return None;
        }
        let mut i = rand::rng().random_range(0..n);
        if Some(i) == ctx.exclude {
            i = (i + 1) % n;
        }
        Some(i)
    }
}

/// Jump-consistent-hash style selection over a client key (`spec.md` §4.9). Falls back to the
/// next endpoint, in index order, if the chosen one is marked dead in the endpoint registry.
#[derive(Debug, Default)]
pub struct ConsistentHash;

impl ConsistentHash {
    fn jump_hash(key: u64, buckets: usize) -> usize {
        let mut key = key;
        let (mut b, mut j): (i64, i64) = (-1, 0);
        while j < buckets as i64 {
            b = j;
            key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
            j = ((b + 1) as f64 * ((1i64 << 31) as f64 / (((key >> 33) + 1) as f64))) as i64;
        }
        b as usize
    }
}

impl Algorithm for ConsistentHash {
    fn select(&self, ctx: &SelectCtx<'_>) -> Option<usize> {
        let n = ctx.endpoints.len();
        if n == 0 {
            return None;
        }
        if n == 1 {
            return (ctx.exclude != Some(0)).then_some(0);
        }
        let key = ctx.client_key.unwrap_or("");
        let hash = fnv1a(key.as_bytes());
        let mut idx = Self::jump_hash(hash, n);
        for _ in 0..n {
            if Some(idx) != ctx.exclude && !ctx.registry.is_dead(&ctx.endpoints[idx]) {
                return Some(idx);
            }
            idx = (idx + 1) % n;
        }
        None
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Samples two endpoints, picks the one with fewer in-flight requests (`spec.md` §4.9).
#[derive(Debug, Default)]
pub struct PowerOfNChoices;

impl Algorithm for PowerOfNChoices {
    fn select(&self, ctx: &SelectCtx<'_>) -> Option<usize> {
        let n = ctx.endpoints.len();
        if n == 0 || (n == 1 && ctx.exclude == Some(0)) {
            return None;
        }
        if n == 1 {
            return Some(0);
        }
        let candidates: Vec<usize> = (0..n).filter(|i| Some(*i) != ctx.exclude).collect();
        if candidates.len() == 1 {
            return Some(candidates[0]);
        }
        let mut rng = rand::rng();
        let a = candidates[rng.random_range(0..candidates.len())];
        let mut b = candidates[rng.random_range(0..candidates.len())];
        while b == a {
            b = candidates[rng.random_range(0..candidates.len())];
        }
        let inflight_a = ctx.registry.inflight(&ctx.endpoints[a]);
        let inflight_b = ctx.registry.inflight(&ctx.endpoints[b]);
        Some(if inflight_a <= inflight_b { a } else { b })
    }
}

/// Resolves an eskip LB-backend algorithm name to a fresh stateful instance.
pub fn by_name(name: &str) -> Option<Box<dyn Algorithm>> {
    match name {
        "roundRobin" | "round_robin" => Some(Box::new(RoundRobin::default())),
        "random" => Some(Box::new(Random)),
        "consistentHash" | "consistent_hash" => Some(Box::new(ConsistentHash)),
        "powerOfNChoices" | "power_of_n_choices" => Some(Box::new(PowerOfNChoices)),
        _ => None,
    }
}

/// Derives the consistent-hash client key from a peer address and the request's
/// `X-Forwarded-For` chain (first entry if present, else the direct peer).
pub fn client_key(peer: Option<SocketAddr>, forwarded_for: Option<&str>) -> Option<String> {
    if let Some(xff) = forwarded_for {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    peer.map(|a| a.ip().to_string())
}

/// Used by the builder's algorithm-binding post-processor; kept here so the binder does not need
/// to know about `Arg` internals beyond "this LB backend carried no extra args".
pub fn validate_no_args(args: &[Arg]) -> Result<(), String> {
    if args.is_empty() {
        Ok(())
    } else {
        Err("load-balancer algorithms take no arguments; configure endpoints instead".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(n: usize) -> Vec<Arc<str>> {
        (0..n).map(|i| Arc::from(format!("http://h{i}:80").as_str())).collect()
    }

    #[test]
    fn round_robin_never_repeats_excluded_endpoint() {
        let registry = EndpointRegistry::default();
        let eps = endpoints(2);
        let rr = RoundRobin::default();
        for _ in 0..10 {
            let ctx = SelectCtx { endpoints: &eps, client_key: None, registry: &registry, exclude: Some(0) };
            assert_eq!(rr.select(&ctx), Some(1));
        }
    }

    #[test]
    fn round_robin_with_single_excluded_endpoint_returns_none() {
        let registry = EndpointRegistry::default();
        let eps = endpoints(1);
        let rr = RoundRobin::default();
        let ctx = SelectCtx { endpoints: &eps, client_key: None, registry: &registry, exclude: Some(0) };
        assert_eq!(rr.select(&ctx), None);
    }

    #[test]
    fn random_never_returns_excluded_endpoint() {
        let registry = EndpointRegistry::default();
        let eps = endpoints(2);
        let random = Random;
        for _ in 0..20 {
            let ctx = SelectCtx { endpoints: &eps, client_key: None, registry: &registry, exclude: Some(0) };
            assert_eq!(random.select(&ctx), Some(1));
        }
    }

    #[test]
    fn consistent_hash_skips_excluded_and_dead_endpoints() {
        let registry = EndpointRegistry::default();
        let eps = endpoints(3);
        for ep in &eps {
            registry.touch(ep);
        }
        registry.get(&eps[1]).unwrap().mark_dead(true);
        let hash = ConsistentHash;
        let ctx = SelectCtx { endpoints: &eps, client_key: Some("client-a"), registry: &registry, exclude: Some(0) };
        let picked = hash.select(&ctx).expect("some endpoint available");
        assert_eq!(picked, 2);
    }

    #[test]
    fn power_of_n_choices_never_returns_excluded_endpoint() {
        let registry = EndpointRegistry::default();
        let eps = endpoints(2);
        let p2c = PowerOfNChoices;
        for _ in 0..20 {
            let ctx = SelectCtx { endpoints: &eps, client_key: None, registry: &registry, exclude: Some(0) };
            assert_eq!(p2c.select(&ctx), Some(1));
        }
    }
}
