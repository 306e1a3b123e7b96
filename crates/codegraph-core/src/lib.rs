//! Codegraph core library: an incrementally maintained property graph of a
//! Python repository's structure and call relationships, with optional
//! semantic enrichment and vector search.
//!
//! The crate is organised around a few layers:
//! `indexer` turns source files into entities and reconciles them with what
//! is stored, `store` persists the graph in SQLite, `enrichment` and
//! `embedding` annotate entities through external services, `query` answers
//! retrieval questions, and `pipeline` orchestrates runs and jobs.

pub mod config;
pub mod embedding;
pub mod enrichment;
pub mod errors;
pub mod indexer;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::IndexerConfig;
pub use errors::{GraphError, GraphResult};
pub use pipeline::{Orchestrator, RunOptions, RunSummary};
pub use query::QueryEngine;
pub use store::GraphStore;
