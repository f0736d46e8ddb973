//! The resolved `Route` (`spec.md` §3): an AST route with every predicate/filter name replaced
//! by a live instance and its backend resolved to something the dispatcher can act on directly.

use std::sync::Arc;

use crate::algorithm::Algorithm;
use crate::filter::Filter;
use crate::predicate::Predicate;
use crate::value::RouteId;

/// The path matcher lifted out of a route's predicate chain (`spec.md` §4.2, §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatcher {
    /// `Path("/exact")`, no template segments.
    Exact(String),
    /// `Path("/u/:id/*rest")`: literal segments interleaved with `:name` and an optional
    /// trailing `*rest`.
    Template(Vec<PathSegment>),
    /// `PathSubtree`/`PathRegexp` is intentionally *not* modeled here: only the template/exact
    /// forms are lifted into the trie; a bare `PathRegexp` predicate is an ordinary validator.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

/// `fade_in.duration > 0` implies the algorithm is fade-in-aware (`spec.md` §3 invariants).
#[derive(Debug, Clone, Copy)]
pub struct FadeIn {
    pub duration: std::time::Duration,
    pub exponent: f64,
}

/// One endpoint in an LB route's live list, paired with its registry key for §4.10 lookups.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: Arc<str>,
}

/// The resolved backend (`spec.md` §3).
pub enum Backend {
    Shunt,
    Loopback,
    Dynamic,
    Network { url: Arc<str> },
    Lb {
        algorithm: Box<dyn Algorithm>,
        /// The endpoint list the algorithm samples from. When `fade_in` is set, this is the
        /// *already weighted* list produced by the fade-in post-processor at build time (warm
        /// endpoints repeated relative to cold ones) rather than the literal eskip endpoint list
        /// (`spec.md` §4.12).
        endpoints: Vec<Endpoint>,
        fade_in: Option<FadeIn>,
    },
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Shunt => write!(f, "Shunt"),
            Backend::Loopback => write!(f, "Loopback"),
            Backend::Dynamic => write!(f, "Dynamic"),
            Backend::Network { url } => write!(f, "Network({url})"),
            Backend::Lb { endpoints, fade_in, .. } => {
                write!(f, "Lb({} endpoints, fade_in={:?})", endpoints.len(), fade_in)
            }
        }
    }
}

/// A non-path predicate instance plus its source name, kept for diagnostics.
pub struct ValidatorInstance {
    pub name: Arc<str>,
    pub instance: Arc<dyn Predicate>,
}

pub struct FilterInstance {
    pub name: Arc<str>,
    pub instance: Arc<dyn Filter>,
}

/// A fully resolved, ready-to-serve route (`spec.md` §3).
pub struct Route {
    pub id: RouteId,
    pub path: PathMatcher,
    pub method: Option<http::Method>,
    pub validators: Vec<ValidatorInstance>,
    pub filters: Vec<FilterInstance>,
    pub backend: Backend,
    /// Count of non-path predicates, used for the trie's tie-breaking rule (`spec.md` §4.2).
    pub specificity: usize,
    /// Stable insertion order, the tie-breaking fallback.
    pub insertion_order: usize,
}

impl Route {
    pub fn matches_validators(&self, req: &crate::context::RequestView<'_>) -> bool {
        self.validators.iter().all(|v| v.instance.matches(req))
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("backend", &self.backend)
            .field("specificity", &self.specificity)
            .finish()
    }
}
