//! Predicate specs/instances and the name-keyed registry (`spec.md` §4.3, §4.4).
//!
//! A `Predicate` instance is produced once, when a route is admitted to a table, and evaluated
//! against every request matching the route's path. Two well-known predicates — the path matcher
//! and `Method` — are lifted out of this generic mechanism by the trie (`crate::trie`); every
//! other named predicate, including the builtins in `crate::builtin`, goes through here.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::RequestView;
use crate::value::Arg;

/// A live, per-route predicate instance. Evaluated against request metadata only — predicates
/// never need the body, so the matching path never has to buffer or peek it.
pub trait Predicate: Send + Sync + std::fmt::Debug {
    fn matches(&self, req: &RequestView<'_>) -> bool;
}

/// Produces predicate instances for one name, given literal args.
pub trait PredicateSpec: Send + Sync {
    fn name(&self) -> &str;
    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Predicate>, String>;
}

/// A frozen, `Arc`-shared `name -> spec` map, populated at startup (`spec.md` §4.4).
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    specs: Arc<HashMap<String, Arc<dyn PredicateSpec>>>,
}

impl PredicateRegistry {
    pub fn builder() -> PredicateRegistryBuilder {
        PredicateRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PredicateSpec>> {
        self.specs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(|s| s.as_str())
    }
}

#[derive(Default)]
pub struct PredicateRegistryBuilder {
    specs: HashMap<String, Arc<dyn PredicateSpec>>,
}

impl PredicateRegistryBuilder {
    pub fn register(mut self, spec: impl PredicateSpec + 'static) -> Self {
        self.specs.insert(spec.name().to_string(), Arc::new(spec));
        self
    }

    pub fn build(self) -> PredicateRegistry {
        PredicateRegistry {
            specs: Arc::new(self.specs),
        }
    }
}
