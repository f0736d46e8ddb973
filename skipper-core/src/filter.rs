//! Filter specs/instances and the name-keyed registry (`spec.md` §4.4, §4.8).

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::Context;
use crate::value::Arg;

/// A live, per-route filter instance. `request`/`response` are invoked by the pipeline runtime
/// (`skipper-proxy::pipeline`) under a panic barrier, so implementations are free to panic on
/// truly unexpected input without taking down the whole proxy.
pub trait Filter: Send + Sync + std::fmt::Debug {
    /// Runs before the backend dispatch. May mutate `ctx.request`, set `ctx.served`, or write
    /// `ctx.response` directly to shunt.
    fn request(&self, ctx: &mut Context) {
        let _ = ctx;
    }

    /// Runs after the backend responds (or after `request` shunted). May mutate `ctx.response`.
    fn response(&self, ctx: &mut Context) {
        let _ = ctx;
    }
}

/// Produces filter instances for one name, given literal args.
pub trait FilterSpec: Send + Sync {
    fn name(&self) -> &str;
    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Filter>, String>;
}

/// A frozen, `Arc`-shared `name -> spec` map, populated at startup.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    specs: Arc<HashMap<String, Arc<dyn FilterSpec>>>,
}

impl FilterRegistry {
    pub fn builder() -> FilterRegistryBuilder {
        FilterRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn FilterSpec>> {
        self.specs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(|s| s.as_str())
    }
}

#[derive(Default)]
pub struct FilterRegistryBuilder {
    specs: HashMap<String, Arc<dyn FilterSpec>>,
}

impl FilterRegistryBuilder {
    pub fn register(mut self, spec: impl FilterSpec + 'static) -> Self {
        self.specs.insert(spec.name().to_string(), Arc::new(spec));
        self
    }

    pub fn build(self) -> FilterRegistry {
        FilterRegistry {
            specs: Arc::new(self.specs),
        }
    }
}
