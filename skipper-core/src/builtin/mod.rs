//! The minimal literal predicate/filter set `spec.md`'s own scenarios reference (§8). A reverse
//! proxy with *no* usable filters cannot route a single documented scenario; concrete
//! auth/ratelimit/tracing/circuit-breaker filters remain out of scope and are left to a
//! downstream consumer registering its own [`crate::filter::FilterSpec`]s and
//! [`crate::predicate::PredicateSpec`]s alongside these.

pub mod filters;
pub mod predicates;

use crate::filter::FilterRegistry;
use crate::predicate::PredicateRegistry;

pub fn predicate_registry() -> PredicateRegistry {
    predicates::register(PredicateRegistry::builder()).build()
}

pub fn filter_registry() -> FilterRegistry {
    filters::register(FilterRegistry::builder()).build()
}
