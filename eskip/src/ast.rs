//! The parsed representation of an eskip document, before any predicate/filter is instantiated.

/// A literal argument to a predicate or filter call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Number(f64),
    Str(String),
    /// The raw pattern text of a `/regex/` literal. Compiling it is left to the consumer so that
    /// `eskip` itself does not need to depend on a particular regex engine's AST.
    Regex(String),
}

impl std::fmt::Display for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Number(n) => write!(f, "{n}"),
            Arg::Str(s) => write!(f, "\"{}\"", escape_str(s)),
            Arg::Regex(r) => write!(f, "/{}/", r.replace('/', "\\/")),
        }
    }
}

fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// A single `name(args...)` call, used for both predicates and filters.
#[derive(Debug, Clone, PartialEq)]
pub struct NameArgs {
    pub name: String,
    pub args: Vec<Arg>,
}

impl std::fmt::Display for NameArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{a}")?;
        }
        write!(f, ")")
    }
}

/// The predicate chain of a route: either the catch-all (`*` / `Any()`) or a non-empty
/// conjunction of named predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicates {
    Any,
    All(Vec<NameArgs>),
}

impl Predicates {
    pub fn as_slice(&self) -> &[NameArgs] {
        match self {
            Predicates::Any => &[],
            Predicates::All(v) => v,
        }
    }
}

/// The backend of a route, as written in the document (unresolved).
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Shunt,
    Loopback,
    Dynamic,
    Network(String),
    Lb { algorithm: String, endpoints: Vec<String> },
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Shunt => write!(f, "<shunt>"),
            Backend::Loopback => write!(f, "<loopback>"),
            Backend::Dynamic => write!(f, "<dynamic>"),
            Backend::Network(url) => write!(f, "\"{url}\""),
            Backend::Lb { algorithm, endpoints } => {
                write!(f, "<{algorithm}")?;
                for e in endpoints {
                    write!(f, ", \"{e}\"")?;
                }
                write!(f, ">")
            }
        }
    }
}

/// A fully-parsed route definition.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteAst {
    pub id: Option<String>,
    pub predicates: Predicates,
    pub filters: Vec<NameArgs>,
    pub backend: Backend,
}

impl std::fmt::Display for RouteAst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(id) = &self.id {
            write!(f, "{id}: ")?;
        }
        match &self.predicates {
            Predicates::Any => write!(f, "*")?,
            Predicates::All(preds) => {
                for (i, p) in preds.iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    write!(f, "{p}")?;
                }
            }
        }
        write!(f, " -> ")?;
        for filter in &self.filters {
            write!(f, "{filter} -> ")?;
        }
        write!(f, "{}", self.backend)
    }
}

/// One route definition from a document, paired with its parse outcome so that a single
/// malformed route never invalidates the rest of the document (`spec.md` §4.1).
#[derive(Debug)]
pub struct ParsedRoute {
    /// The verbatim source text of this route definition, for diagnostics.
    pub source: String,
    pub result: Result<RouteAst, crate::error::Error>,
}

/// The result of parsing a whole eskip document: zero or more route definitions, each with its
/// own independent parse outcome.
#[derive(Debug, Default)]
pub struct Document {
    pub routes: Vec<ParsedRoute>,
}

impl Document {
    pub fn oks(&self) -> impl Iterator<Item = &RouteAst> {
        self.routes.iter().filter_map(|r| r.result.as_ref().ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &crate::error::Error> {
        self.routes.iter().filter_map(|r| r.result.as_ref().err())
    }
}
