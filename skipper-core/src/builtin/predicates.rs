//! The built-in validator predicates referenced by `spec.md`'s own scenarios (§4.3, §8). `Path`
//! and `Method` are lifted into the trie (`crate::trie`) and never reach this registry; every
//! name here is an ordinary post-lookup validator.

use std::sync::Arc;

use rand::Rng;

use crate::context::RequestView;
use crate::predicate::{Predicate, PredicateSpec};
use crate::value::Arg;

#[derive(Debug)]
struct HostPredicate {
    regex: Arc<regex::Regex>,
}

impl Predicate for HostPredicate {
    fn matches(&self, req: &RequestView<'_>) -> bool {
        let host = req
            .headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| req.uri.host());
        host.is_some_and(|h| self.regex.is_match(h))
    }
}

pub struct HostSpec;

impl PredicateSpec for HostSpec {
    fn name(&self) -> &str {
        "Host"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Predicate>, String> {
        let [Arg::Regex(regex)] = args else {
            return Err("Host(regex) takes exactly one regex argument".to_string());
        };
        Ok(Arc::new(HostPredicate { regex: regex.clone() }))
    }
}

#[derive(Debug)]
struct PathRegexpPredicate {
    regex: Arc<regex::Regex>,
}

impl Predicate for PathRegexpPredicate {
    fn matches(&self, req: &RequestView<'_>) -> bool {
        self.regex.is_match(req.uri.path())
    }
}

pub struct PathRegexpSpec;

impl PredicateSpec for PathRegexpSpec {
    fn name(&self) -> &str {
        "PathRegexp"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Predicate>, String> {
        let [Arg::Regex(regex)] = args else {
            return Err("PathRegexp(regex) takes exactly one regex argument".to_string());
        };
        Ok(Arc::new(PathRegexpPredicate { regex: regex.clone() }))
    }
}

#[derive(Debug)]
struct WeightPredicate {
    weight: f64,
}

impl Predicate for WeightPredicate {
    fn matches(&self, _req: &RequestView<'_>) -> bool {
        // A relative ordering hint only; as a boolean validator it always admits the route and
        // leaves tie-breaking to the trie's specificity/insertion-order rule. Concrete weighted
        // admission policies are a filter/post-processor concern, out of this predicate's scope.
        let _ = self.weight;
        true
    }
}

pub struct WeightSpec;

impl PredicateSpec for WeightSpec {
    fn name(&self) -> &str {
        "Weight"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Predicate>, String> {
        let [Arg::Number(weight)] = args else {
            return Err("Weight(n) takes exactly one numeric argument".to_string());
        };
        Ok(Arc::new(WeightPredicate { weight: *weight }))
    }
}

#[derive(Debug)]
struct TruePredicate;

impl Predicate for TruePredicate {
    fn matches(&self, _req: &RequestView<'_>) -> bool {
        true
    }
}

pub struct TrueSpec;

impl PredicateSpec for TrueSpec {
    fn name(&self) -> &str {
        "True"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Predicate>, String> {
        if !args.is_empty() {
            return Err("True() takes no arguments".to_string());
        }
        Ok(Arc::new(TruePredicate))
    }
}

#[derive(Debug)]
struct FalsePredicate;

impl Predicate for FalsePredicate {
    fn matches(&self, _req: &RequestView<'_>) -> bool {
        false
    }
}

pub struct FalseSpec;

impl PredicateSpec for FalseSpec {
    fn name(&self) -> &str {
        "False"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Predicate>, String> {
        if !args.is_empty() {
            return Err("False() takes no arguments".to_string());
        }
        Ok(Arc::new(FalsePredicate))
    }
}

/// `Traffic(p, k, v)`: stochastic bucketing (`spec.md` §4.3). `p` is the admission probability
/// in `[0, 1]`; `k`/`v` name a cookie/header key-value pair that, if present on the request,
/// pins the decision (so repeat requests from the same bucketed client stay on one route).
#[derive(Debug)]
struct TrafficPredicate {
    probability: f64,
    cookie: Option<(String, String)>,
}

impl Predicate for TrafficPredicate {
    fn matches(&self, req: &RequestView<'_>) -> bool {
        if let Some((key, value)) = &self.cookie {
            if let Some(cookie_header) = req.headers.get(http::header::COOKIE).and_then(|v| v.to_str().ok()) {
                for pair in cookie_header.split(';') {
                    if let Some((k, v)) = pair.trim().split_once('=') {
                        if k == key {
                            return v == value;
                        }
                    }
                }
            }
        }
        rand::rng().random_bool(self.probability.clamp(0.0, 1.0))
    }
}

pub struct TrafficSpec;

impl PredicateSpec for TrafficSpec {
    fn name(&self) -> &str {
        "Traffic"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Predicate>, String> {
        match args {
            [Arg::Number(p)] => Ok(Arc::new(TrafficPredicate {
                probability: *p,
                cookie: None,
            })),
            [Arg::Number(p), Arg::Str(k), Arg::Str(v)] => Ok(Arc::new(TrafficPredicate {
                probability: *p,
                cookie: Some((k.to_string(), v.to_string())),
            })),
            _ => Err("Traffic(p) or Traffic(p, cookieKey, cookieValue)".to_string()),
        }
    }
}

pub fn register(registry: crate::predicate::PredicateRegistryBuilder) -> crate::predicate::PredicateRegistryBuilder {
    registry
        .register(HostSpec)
        .register(PathRegexpSpec)
        .register(WeightSpec)
        .register(TrueSpec)
        .register(FalseSpec)
        .register(TrafficSpec)
}
