//! Retrieval over the stored graph.
//!
//! [`QueryEngine`] is split across submodules by operation family; each adds
//! its own `impl QueryEngine` block.

pub mod adhoc;
pub mod entities;
pub mod guards;
pub mod subgraph;
pub mod traversal;
pub mod vector;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::QueryConfig;
use crate::embedding::EmbeddingService;
use crate::errors::GraphError;
use crate::models::NodeKind;
use crate::store::{GraphStore, NodeRecord};

/// Kinds an entity lookup considers when the caller names none.
pub const ENTITY_KINDS: [NodeKind; 3] = [NodeKind::Function, NodeKind::Class, NodeKind::Module];

pub struct QueryEngine {
    store: Arc<GraphStore>,
    embedder: Option<Arc<dyn EmbeddingService>>,
    settings: QueryConfig,
}

impl QueryEngine {
    pub fn new(store: Arc<GraphStore>, settings: QueryConfig) -> Self {
        Self {
            store,
            embedder: None,
            settings,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingService>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn settings(&self) -> &QueryConfig {
        &self.settings
    }
}

/// Compact view of one entity returned by most operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: i64,
    pub kind: NodeKind,
    pub name: String,
    pub qualified_name: String,
    pub file_path: Option<String>,
    pub lineno_start: Option<i64>,
    pub lineno_end: Option<i64>,
    pub purpose: Option<String>,
    pub docstring: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl EntitySummary {
    pub fn from_node(node: &NodeRecord, include_source: bool) -> Self {
        Self {
            id: node.id,
            kind: node.kind,
            name: node.name.clone(),
            qualified_name: node.display_name().to_string(),
            file_path: node.file_path.clone(),
            lineno_start: node.lineno_start,
            lineno_end: node.lineno_end,
            purpose: node.purpose.clone(),
            docstring: node.docstring.clone(),
            source: if include_source { node.source.clone() } else { None },
        }
    }
}

/// Walk direction for operations that may look both ways.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl FromStr for TraceDirection {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outgoing" | "out" => Ok(TraceDirection::Outgoing),
            "incoming" | "in" => Ok(TraceDirection::Incoming),
            "both" => Ok(TraceDirection::Both),
            other => Err(GraphError::Query(format!("unknown direction: {other}"))),
        }
    }
}

impl fmt::Display for TraceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TraceDirection::Outgoing => "outgoing",
            TraceDirection::Incoming => "incoming",
            TraceDirection::Both => "both",
        })
    }
}
