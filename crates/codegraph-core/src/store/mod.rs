//! Persistent property graph: schema, the concrete [`GraphStore`], and the
//! operation groups it implements.

pub mod database;
pub mod edges;
pub mod enrichment;
pub mod nodes;
pub mod queries;
pub mod schema;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

pub use database::GraphStore;
pub use edges::EdgeOps;
pub use enrichment::EnrichmentOps;
pub use nodes::NodeOps;
pub use queries::QueryOps;

use crate::models::{NodeKind, RelKind};

// ---------------------------------------------------------------------------
// Row types shared by the op groups
// ---------------------------------------------------------------------------

/// One node as read back from the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: i64,
    pub kind: NodeKind,
    pub name: String,
    pub qualified_name: Option<String>,
    pub file_path: Option<String>,
    pub module_name: Option<String>,
    pub content_hash: Option<String>,
    pub lineno_start: Option<i64>,
    pub lineno_end: Option<i64>,
    pub docstring: Option<String>,
    pub purpose: Option<String>,
    pub summary: Option<String>,
    pub source: Option<String>,
    pub is_unresolved: bool,
    pub enrichment_hash: Option<String>,
}

impl NodeRecord {
    /// Qualified name when there is one, else the plain name.
    pub fn display_name(&self) -> &str {
        self.qualified_name.as_deref().unwrap_or(&self.name)
    }
}

pub(crate) const NODE_COLUMNS: &str = "n.id, n.kind, n.name, n.qualified_name, n.file_path, \
     n.module_name, n.content_hash, n.lineno_start, n.lineno_end, n.docstring, n.purpose, \
     n.summary, n.source, n.is_unresolved, n.enrichment_hash";

pub(crate) fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRecord> {
    Ok(NodeRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        qualified_name: row.get(3)?,
        file_path: row.get(4)?,
        module_name: row.get(5)?,
        content_hash: row.get(6)?,
        lineno_start: row.get(7)?,
        lineno_end: row.get(8)?,
        docstring: row.get(9)?,
        purpose: row.get(10)?,
        summary: row.get(11)?,
        source: row.get(12)?,
        is_unresolved: row.get::<_, i64>(13)? != 0,
        enrichment_hash: row.get(14)?,
    })
}

/// One edge as read back from the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source_id: i64,
    pub target_id: i64,
    pub relationship: RelKind,
    pub properties: Option<serde_json::Value>,
}

/// A Class or Function owned by one file, as the diff engine sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEntity {
    pub kind: NodeKind,
    pub qualified_name: String,
    pub content_hash: String,
}

/// Traversal direction relative to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

// ---------------------------------------------------------------------------
// SQL conversions
// ---------------------------------------------------------------------------

impl ToSql for NodeKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for NodeKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: crate::errors::GraphError| FromSqlError::Other(e.to_string().into()))
    }
}

impl ToSql for RelKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RelKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        RelKind::parse(raw).ok_or_else(|| {
            FromSqlError::Other(format!("unknown relationship: {raw}").into())
        })
    }
}
