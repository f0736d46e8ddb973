//! Shared newtypes and the resolved argument value that backs predicate/filter instantiation.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

/// A route's stable identifier. Cheap to clone and hash; shared across the route, its trie
/// leaves, and any diagnostic referencing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(pub Arc<str>);

impl RouteId {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        RouteId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RouteId {
    fn from(s: &str) -> Self {
        RouteId(Arc::from(s))
    }
}

impl From<String> for RouteId {
    fn from(s: String) -> Self {
        RouteId(Arc::from(s.as_str()))
    }
}

/// A name by which a predicate or filter spec is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterName(pub Arc<str>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredicateName(pub Arc<str>);

impl From<&str> for FilterName {
    fn from(s: &str) -> Self {
        FilterName(Arc::from(s))
    }
}

impl From<&str> for PredicateName {
    fn from(s: &str) -> Self {
        PredicateName(Arc::from(s))
    }
}

impl fmt::Display for FilterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PredicateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The resolved form of `eskip::Arg`: regex literals are compiled once, at route-instantiation
/// time, rather than re-parsed on every match (`spec.md` §9 Design Notes).
#[derive(Debug, Clone)]
pub enum Arg {
    Number(f64),
    Str(Box<str>),
    Regex(Arc<Regex>),
}

impl Arg {
    pub fn from_ast(arg: &eskip::Arg) -> Result<Self, String> {
        Ok(match arg {
            eskip::Arg::Number(n) => Arg::Number(*n),
            eskip::Arg::Str(s) => Arg::Str(s.as_str().into()),
            eskip::Arg::Regex(r) => {
                Arg::Regex(Arc::new(Regex::new(r).map_err(|e| format!("invalid regex /{r}/: {e}"))?))
            }
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Arg::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_regex(&self) -> Option<&Regex> {
        match self {
            Arg::Regex(r) => Some(r),
            _ => None,
        }
    }
}

/// Converts a whole AST argument list, failing on the first unparseable regex.
pub fn args_from_ast(args: &[eskip::Arg]) -> Result<Vec<Arg>, String> {
    args.iter().map(Arg::from_ast).collect()
}
