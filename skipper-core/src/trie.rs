//! The path trie (`spec.md` §4.2): first-stage matching by path template.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;

use crate::route::{PathMatcher, PathSegment, Route};

/// Splits a URL path into percent-decoded segments, ignoring a leading/trailing slash.
pub fn split_path(path: &str) -> Vec<String> {
    let decoded = percent_encoding::percent_decode_str(path)
        .decode_utf8()
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| path.to_string());
    decoded
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Parses a `Path(...)` predicate's literal into a [`PathMatcher`]. `:name` segments become
/// parameters; a trailing `*rest` becomes the wildcard; a `*rest` anywhere else is rejected.
pub fn parse_path_template(literal: &str) -> Result<PathMatcher, String> {
    let segments = split_path(literal);
    if segments.is_empty() {
        return Ok(PathMatcher::Exact("/".to_string()));
    }
    if segments.iter().all(|s| !s.starts_with(':') && !s.starts_with('*')) {
        return Ok(PathMatcher::Exact(format!("/{}", segments.join("/"))));
    }
    let mut out = Vec::with_capacity(segments.len());
    for (i, seg) in segments.iter().enumerate() {
        if let Some(name) = seg.strip_prefix('*') {
            if i != segments.len() - 1 {
                return Err("`*rest` must be the last path segment".to_string());
            }
            out.push(PathSegment::Wildcard(name.to_string()));
        } else if let Some(name) = seg.strip_prefix(':') {
            out.push(PathSegment::Param(name.to_string()));
        } else {
            out.push(PathSegment::Literal(seg.clone()));
        }
    }
    Ok(PathMatcher::Template(out))
}

#[derive(Default)]
struct Leaf {
    /// All routes terminating at this node, sorted once at build time by
    /// `(non_path_predicate_count desc, insertion_order asc)` (`spec.md` §4.2 tie-breaking).
    routes: Vec<Arc<Route>>,
    /// Pre-filtered `routes` for requests whose method has no explicit `Method(...)` match at
    /// this leaf: only routes with no method predicate, same relative order as `routes`.
    any_method: Vec<Arc<Route>>,
    /// Pre-filtered `routes` per explicit method value observed here, merging that method's
    /// routes with the method-less ones, so lookup never scans a sibling method's routes
    /// (`spec.md` §4.3).
    by_method: HashMap<Method, Vec<Arc<Route>>>,
}

impl Leaf {
    fn push(&mut self, route: Arc<Route>) {
        self.routes.push(route);
    }

    fn finalize(&mut self) {
        self.routes.sort_by(|a, b| {
            b.specificity
                .cmp(&a.specificity)
                .then(a.insertion_order.cmp(&b.insertion_order))
        });
        self.any_method = self.routes.iter().filter(|r| r.method.is_none()).cloned().collect();
        let mut methods: Vec<Method> = self.routes.iter().filter_map(|r| r.method.clone()).collect();
        methods.sort_by_key(|m| m.to_string());
        methods.dedup();
        for m in methods {
            let filtered: Vec<Arc<Route>> = self
                .routes
                .iter()
                .filter(|r| r.method.is_none() || r.method.as_ref() == Some(&m))
                .cloned()
                .collect();
            self.by_method.insert(m, filtered);
        }
    }

    fn candidates(&self, method: &Method) -> &[Arc<Route>] {
        self.by_method.get(method).map(|v| v.as_slice()).unwrap_or(&self.any_method)
    }
}

#[derive(Default)]
struct Node {
    literal: HashMap<String, Node>,
    param: Option<(String, Box<Node>)>,
    wildcard: Option<(String, Leaf)>,
    leaf: Option<Leaf>,
}

impl Node {
    fn insert(&mut self, segments: &[PathSegment], route: Arc<Route>) -> Result<(), String> {
        match segments.first() {
            None => {
                self.leaf.get_or_insert_with(Leaf::default).push(route);
                Ok(())
            }
            Some(PathSegment::Literal(lit)) => {
                self.literal.entry(lit.clone()).or_default().insert(&segments[1..], route)
            }
            Some(PathSegment::Param(name)) => {
                if let Some((existing, _)) = &self.param {
                    if existing != name {
                        return Err(format!(
                            "conflicting path parameter names at the same position: {existing:?} vs {name:?}"
                        ));
                    }
                }
                let (_, node) = self.param.get_or_insert_with(|| (name.clone(), Box::new(Node::default())));
                node.insert(&segments[1..], route)
            }
            Some(PathSegment::Wildcard(name)) => {
                if let Some((existing, _)) = &self.wildcard {
                    if existing != name {
                        return Err(format!(
                            "conflicting wildcard names at the same position: {existing:?} vs {name:?}"
                        ));
                    }
                }
                let (_, leaf) = self.wildcard.get_or_insert_with(|| (name.clone(), Leaf::default()));
                leaf.push(route);
                Ok(())
            }
        }
    }

    fn finalize(&mut self) {
        if let Some(leaf) = &mut self.leaf {
            leaf.finalize();
        }
        if let Some((_, leaf)) = &mut self.wildcard {
            leaf.finalize();
        }
        if let Some((_, node)) = &mut self.param {
            node.finalize();
        }
        for node in self.literal.values_mut() {
            node.finalize();
        }
    }
}

/// A match result from the trie: the candidate route list (already tie-break sorted) and the
/// path parameters bound while walking to it.
pub struct Lookup<'a> {
    pub candidates: &'a [Arc<Route>],
    pub path_params: HashMap<String, String>,
}

/// The exact-path fast lane plus the templated radix trie (`spec.md` §4.2).
#[derive(Default)]
pub struct PathTrie {
    exact: HashMap<String, Leaf>,
    root: Node,
    /// No-`Path` routes (the `*`/`Any()` catch-all, or any route relying only on non-path
    /// predicates): matched against every request path, independent of segment structure.
    catch_all: Leaf,
}

pub struct PathTrieBuilder {
    exact: HashMap<String, Leaf>,
    root: Node,
    catch_all: Leaf,
}

impl PathTrieBuilder {
    pub fn new() -> Self {
        PathTrieBuilder {
            exact: HashMap::new(),
            root: Node::default(),
            catch_all: Leaf::default(),
        }
    }

    pub fn insert(&mut self, route: Arc<Route>) -> Result<(), String> {
        match &route.path {
            PathMatcher::Exact(p) => {
                self.exact.entry(p.clone()).or_default().push(route);
                Ok(())
            }
            PathMatcher::Template(segments) => self.root.insert(segments, route),
            PathMatcher::None => {
                // A route with no path matcher is a catch-all `*`/`Any()`: it must match every
                // path, so it lives outside the segment trie entirely rather than at the
                // zero-segments leaf (which only ever matches the bare root path).
                self.catch_all.push(route);
                Ok(())
            }
        }
    }

    pub fn build(mut self) -> PathTrie {
        for leaf in self.exact.values_mut() {
            leaf.finalize();
        }
        self.root.finalize();
        self.catch_all.finalize();
        PathTrie {
            exact: self.exact,
            root: self.root,
            catch_all: self.catch_all,
        }
    }
}

impl Default for PathTrieBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTrie {
    /// Stage-one lookup (`spec.md` §4.2): walk literals greedily, fall back to a `:name` child,
    /// then to `*rest`. Returns the leaf's tie-break-sorted candidate list restricted to routes
    /// whose (possibly absent) `Method` predicate is compatible with `method`.
    pub fn lookup<'a>(&'a self, path: &str, method: &Method) -> Option<Lookup<'a>> {
        if let Some(leaf) = self.exact.get(path) {
            let candidates = leaf.candidates(method);
            if !candidates.is_empty() {
                return Some(Lookup {
                    candidates,
                    path_params: HashMap::new(),
                });
            }
        }
        let segments = split_path(path);
        if let Some(found) = self.walk(&self.root, &segments, method, HashMap::new()) {
            return Some(found);
        }
        let candidates = self.catch_all.candidates(method);
        if candidates.is_empty() {
            return None;
        }
        Some(Lookup {
            candidates,
            path_params: HashMap::new(),
        })
    }

    fn walk<'a>(
        &'a self,
        node: &'a Node,
        segments: &[String],
        method: &Method,
        params: HashMap<String, String>,
    ) -> Option<Lookup<'a>> {
        if segments.is_empty() {
            if let Some(leaf) = &node.leaf {
                let candidates = leaf.candidates(method);
                if !candidates.is_empty() {
                    return Some(Lookup {
                        candidates,
                        path_params: params,
                    });
                }
            }
            return self.try_wildcard(node, method, &params);
        }
        let (head, rest) = (&segments[0], &segments[1..]);
        if let Some(child) = node.literal.get(head) {
            if let Some(found) = self.walk(child, rest, method, params.clone()) {
                return Some(found);
            }
        }
        if let Some((name, child)) = &node.param {
            let mut p2 = params.clone();
            p2.insert(name.clone(), head.clone());
            if let Some(found) = self.walk(child, rest, method, p2) {
                return Some(found);
            }
        }
        self.try_wildcard_with_rest(node, segments, method, &params)
    }

    fn try_wildcard<'a>(&'a self, node: &'a Node, method: &Method, params: &HashMap<String, String>) -> Option<Lookup<'a>> {
        let (name, leaf) = node.wildcard.as_ref()?;
        let candidates = leaf.candidates(method);
        if candidates.is_empty() {
            return None;
        }
        let mut p = params.clone();
        p.insert(name.clone(), String::new());
        Some(Lookup {
            candidates,
            path_params: p,
        })
    }

    fn try_wildcard_with_rest<'a>(
        &'a self,
        node: &'a Node,
        segments: &[String],
        method: &Method,
        params: &HashMap<String, String>,
    ) -> Option<Lookup<'a>> {
        let (name, leaf) = node.wildcard.as_ref()?;
        let candidates = leaf.candidates(method);
        if candidates.is_empty() {
            return None;
        }
        let mut p = params.clone();
        p.insert(name.clone(), segments.join("/"));
        Some(Lookup {
            candidates,
            path_params: p,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{Backend, Route};
    use crate::value::RouteId;

    fn route(id: &str, path: &str, method: Option<Method>, specificity: usize, order: usize) -> Arc<Route> {
        let path = parse_path_template(path).unwrap();
        Arc::new(Route {
            id: RouteId::from(id),
            path,
            method,
            validators: Vec::new(),
            filters: Vec::new(),
            backend: Backend::Shunt,
            specificity,
            insertion_order: order,
        })
    }

    #[test]
    fn exact_path_matches() {
        let mut b = PathTrieBuilder::new();
        b.insert(route("r1", "/hello", None, 0, 0)).unwrap();
        let trie = b.build();
        let found = trie.lookup("/hello", &Method::GET).unwrap();
        assert_eq!(found.candidates.len(), 1);
        assert_eq!(found.candidates[0].id.as_str(), "r1");
    }

    #[test]
    fn template_param_binds() {
        let mut b = PathTrieBuilder::new();
        b.insert(route("r1", "/u/:id", None, 0, 0)).unwrap();
        let trie = b.build();
        let found = trie.lookup("/u/42", &Method::GET).unwrap();
        assert_eq!(found.path_params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn literal_beats_param_beats_wildcard() {
        let mut b = PathTrieBuilder::new();
        b.insert(route("literal", "/u/me", None, 0, 0)).unwrap();
        b.insert(route("param", "/u/:id", None, 0, 1)).unwrap();
        b.insert(route("wild", "/u/*rest", None, 0, 2)).unwrap();
        let trie = b.build();
        assert_eq!(trie.lookup("/u/me", &Method::GET).unwrap().candidates[0].id.as_str(), "literal");
        assert_eq!(trie.lookup("/u/other", &Method::GET).unwrap().candidates[0].id.as_str(), "param");
        assert_eq!(trie.lookup("/u/a/b/c", &Method::GET).unwrap().candidates[0].id.as_str(), "wild");
    }

    #[test]
    fn tie_break_by_specificity_then_insertion_order() {
        let mut b = PathTrieBuilder::new();
        b.insert(route("less_specific", "/x", None, 0, 0)).unwrap();
        b.insert(route("more_specific", "/x", None, 2, 1)).unwrap();
        let trie = b.build();
        let found = trie.lookup("/x", &Method::GET).unwrap();
        assert_eq!(found.candidates[0].id.as_str(), "more_specific");
        assert_eq!(found.candidates[1].id.as_str(), "less_specific");
    }

    #[test]
    fn method_lifting_isolates_sibling_methods() {
        let mut b = PathTrieBuilder::new();
        b.insert(route("get_route", "/x", Some(Method::GET), 1, 0)).unwrap();
        b.insert(route("post_route", "/x", Some(Method::POST), 1, 1)).unwrap();
        let trie = b.build();
        let found = trie.lookup("/x", &Method::GET).unwrap();
        assert_eq!(found.candidates.len(), 1);
        assert_eq!(found.candidates[0].id.as_str(), "get_route");
    }

    #[test]
    fn no_match_returns_none() {
        let b = PathTrieBuilder::new();
        let trie = b.build();
        assert!(trie.lookup("/nope", &Method::GET).is_none());
    }

    #[test]
    fn rejects_wildcard_not_last() {
        let err = parse_path_template("/a/*rest/b").unwrap_err();
        assert!(err.contains("last"));
    }

    #[test]
    fn no_path_route_matches_every_path() {
        let mut b = PathTrieBuilder::new();
        b.insert(Arc::new(Route {
            id: RouteId::from("catch_all"),
            path: PathMatcher::None,
            method: None,
            validators: Vec::new(),
            filters: Vec::new(),
            backend: Backend::Shunt,
            specificity: 0,
            insertion_order: 0,
        }))
        .unwrap();
        let trie = b.build();
        for path in ["/", "/foo", "/foo/bar/baz"] {
            let found = trie.lookup(path, &Method::GET).unwrap();
            assert_eq!(found.candidates[0].id.as_str(), "catch_all");
        }
    }

    #[test]
    fn more_specific_path_beats_no_path_catch_all() {
        let mut b = PathTrieBuilder::new();
        b.insert(Arc::new(Route {
            id: RouteId::from("catch_all"),
            path: PathMatcher::None,
            method: None,
            validators: Vec::new(),
            filters: Vec::new(),
            backend: Backend::Shunt,
            specificity: 0,
            insertion_order: 0,
        }))
        .unwrap();
        b.insert(route("specific", "/foo", None, 1, 1)).unwrap();
        let trie = b.build();
        assert_eq!(trie.lookup("/foo", &Method::GET).unwrap().candidates[0].id.as_str(), "specific");
        assert_eq!(trie.lookup("/bar", &Method::GET).unwrap().candidates[0].id.as_str(), "catch_all");
    }
}
