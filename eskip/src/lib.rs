//! `eskip`: the lexer, parser, AST, and serializer for Skipper's route definition language.
//!
//! A document is zero or more `;`-separated route definitions of the form
//! `[id ":"] predicates "->" { filter "->" } backend`. See `spec.md` §6 for the full grammar.
//! This crate only produces an AST (`RouteAst`) and never instantiates predicates or filters —
//! that is the job of `skipper-core`'s registries, which turn a `NameArgs` plus literal `Arg`
//! values into a live instance.

pub mod ast;
pub mod error;
mod lexer;
mod parser;

pub use ast::{Arg, Backend, Document, NameArgs, ParsedRoute, Predicates, RouteAst};
pub use error::{Error, Position, Result};
pub use parser::parse;

/// Serializes a single route back into eskip syntax, equivalent to `route.to_string()`.
pub fn serialize(route: &RouteAst) -> String {
    route.to_string()
}

/// Serializes a whole document, one route per line, skipping any route that failed to parse.
pub fn serialize_document(doc: &Document) -> String {
    doc.oks().map(|r| format!("{r};")).collect::<Vec<_>>().join("\n")
}
