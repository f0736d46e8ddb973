//! `skipper-core`: the data model, path trie, predicate evaluator, registries, routing table,
//! table builder, data-client aggregator, request/response context, and endpoint registry behind
//! Skipper's routing engine (`spec.md` §2 components 1-7, 10, 12).
//!
//! The backend dispatcher, filter pipeline runtime, proxy entry handler, connection pooling, and
//! the upgrade subsystem (`spec.md` §2 components 8, 9, 11, 13) live in `skipper-proxy`, which
//! depends on this crate for the [`table::Table`] it reads and the [`context::Context`] it drives
//! filters with.

pub mod algorithm;
pub mod body;
pub mod builtin;
pub mod context;
pub mod data_client;
pub mod endpoint;
pub mod error;
pub mod fadein;
pub mod filter;
pub mod predicate;
pub mod readiness;
pub mod route;
pub mod table;
pub mod trie;
pub mod value;

pub use error::Error;
