//! Shared typed models used across indexing, storage, and query layers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{GraphError, GraphResult};

// ---------------------------------------------------------------------------
// 1. NodeKind
// ---------------------------------------------------------------------------

/// Every node kind stored in the property graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Module,
    Class,
    Function,
    Parameter,
    ClassAttribute,
    Decorator,
    DesignPattern,
    DomainConcept,
}

impl NodeKind {
    pub const ALL: [NodeKind; 9] = [
        NodeKind::File,
        NodeKind::Module,
        NodeKind::Class,
        NodeKind::Function,
        NodeKind::Parameter,
        NodeKind::ClassAttribute,
        NodeKind::Decorator,
        NodeKind::DesignPattern,
        NodeKind::DomainConcept,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::File => "File",
            NodeKind::Module => "Module",
            NodeKind::Class => "Class",
            NodeKind::Function => "Function",
            NodeKind::Parameter => "Parameter",
            NodeKind::ClassAttribute => "ClassAttribute",
            NodeKind::Decorator => "Decorator",
            NodeKind::DesignPattern => "DesignPattern",
            NodeKind::DomainConcept => "DomainConcept",
        }
    }

    /// Kinds that carry a source span, a content hash, and enrichment.
    pub fn is_code_entity(self) -> bool {
        matches!(self, NodeKind::Class | NodeKind::Function)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GraphError::Query(format!("unknown node kind: {s}")))
    }
}

// ---------------------------------------------------------------------------
// 2. RelKind
// ---------------------------------------------------------------------------

/// Relationship types. This set doubles as the whitelist for anything that
/// splices a relationship token into SQL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelKind {
    Calls,
    Contains,
    InheritsFrom,
    Imports,
    DecoratedBy,
    HasParameter,
    HasAttribute,
    DefinesModule,
    ImplementsPattern,
    RelatesToConcept,
    CollaboratesWith,
    DataFlowsTo,
}

impl RelKind {
    pub const ALL: [RelKind; 12] = [
        RelKind::Calls,
        RelKind::Contains,
        RelKind::InheritsFrom,
        RelKind::Imports,
        RelKind::DecoratedBy,
        RelKind::HasParameter,
        RelKind::HasAttribute,
        RelKind::DefinesModule,
        RelKind::ImplementsPattern,
        RelKind::RelatesToConcept,
        RelKind::CollaboratesWith,
        RelKind::DataFlowsTo,
    ];

    /// Edges derived from enrichment; wiped and recreated on every re-annotation.
    pub const SEMANTIC: [RelKind; 4] = [
        RelKind::ImplementsPattern,
        RelKind::RelatesToConcept,
        RelKind::CollaboratesWith,
        RelKind::DataFlowsTo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelKind::Calls => "CALLS",
            RelKind::Contains => "CONTAINS",
            RelKind::InheritsFrom => "INHERITS_FROM",
            RelKind::Imports => "IMPORTS",
            RelKind::DecoratedBy => "DECORATED_BY",
            RelKind::HasParameter => "HAS_PARAMETER",
            RelKind::HasAttribute => "HAS_ATTRIBUTE",
            RelKind::DefinesModule => "DEFINES_MODULE",
            RelKind::ImplementsPattern => "IMPLEMENTS_PATTERN",
            RelKind::RelatesToConcept => "RELATES_TO_CONCEPT",
            RelKind::CollaboratesWith => "COLLABORATES_WITH",
            RelKind::DataFlowsTo => "DATA_FLOWS_TO",
        }
    }

    pub fn parse(token: &str) -> Option<RelKind> {
        let upper = token.trim().to_ascii_uppercase();
        RelKind::ALL.iter().copied().find(|r| r.as_str() == upper)
    }

    /// Parse a comma-separated filter. Empty input selects nothing (the
    /// caller decides what "no filter" means); any unknown token fails the
    /// whole filter with every bad token listed.
    pub fn parse_filter(raw: &str) -> GraphResult<Vec<RelKind>> {
        let mut selected = Vec::new();
        let mut invalid = Vec::new();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match RelKind::parse(token) {
                Some(rel) if !selected.contains(&rel) => selected.push(rel),
                Some(_) => {}
                None => invalid.push(token.to_string()),
            }
        }
        if !invalid.is_empty() {
            return Err(GraphError::InvalidRelationship(invalid));
        }
        Ok(selected)
    }

    /// Render a relationship set as a SQL `IN (...)` list. Only whitelisted
    /// variants can reach this point, so splicing is safe.
    pub fn sql_in_list(rels: &[RelKind]) -> String {
        let quoted: Vec<String> = rels.iter().map(|r| format!("'{}'", r.as_str())).collect();
        format!("({})", quoted.join(", "))
    }
}

impl fmt::Display for RelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 3. ParameterKind
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    PositionalOnly,
    PositionalOrKeyword,
    VarPositional,
    KeywordOnly,
    VarKeyword,
}

impl ParameterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterKind::PositionalOnly => "positional_only",
            ParameterKind::PositionalOrKeyword => "positional_or_keyword",
            ParameterKind::VarPositional => "var_positional",
            ParameterKind::KeywordOnly => "keyword_only",
            ParameterKind::VarKeyword => "var_keyword",
        }
    }

    pub fn parse(raw: &str) -> ParameterKind {
        match raw {
            "positional_only" => ParameterKind::PositionalOnly,
            "var_positional" => ParameterKind::VarPositional,
            "keyword_only" => ParameterKind::KeywordOnly,
            "var_keyword" => ParameterKind::VarKeyword,
            _ => ParameterKind::PositionalOrKeyword,
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Import edge properties
// ---------------------------------------------------------------------------

/// Properties carried by an IMPORTS edge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportProps {
    pub names: Vec<String>,
    pub aliases: std::collections::BTreeMap<String, String>,
    pub is_relative: bool,
    pub is_type_checking: bool,
    pub is_conditional: bool,
    pub condition: Option<String>,
    pub is_try_except: bool,
    pub is_fallback: bool,
}

// ---------------------------------------------------------------------------
// 5. CallResolution
// ---------------------------------------------------------------------------

/// Which resolution pass produced a CALLS edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallResolution {
    SameFile,
    Import,
    UniqueName,
}

impl CallResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            CallResolution::SameFile => "same_file",
            CallResolution::Import => "import",
            CallResolution::UniqueName => "unique_name",
        }
    }
}

// ---------------------------------------------------------------------------
// 6. IndexState
// ---------------------------------------------------------------------------

/// Singleton metadata describing the most recent run against the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexState {
    pub source: Option<String>,
    pub files_indexed: usize,
    pub status: String,
    pub last_run_id: Option<String>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

// ---------------------------------------------------------------------------
// 7. ChangeSet
// ---------------------------------------------------------------------------

/// File-level changes fed into an incremental run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// `(old_path, new_path)` pairs.
    pub renamed: Vec<(String, String)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }

    /// Paths whose current content must be (re-)extracted.
    pub fn paths_to_index(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .added
            .iter()
            .chain(self.modified.iter())
            .cloned()
            .collect();
        out.extend(self.renamed.iter().map(|(_, new)| new.clone()));
        out
    }

    /// Paths whose stored subgraph must be removed.
    pub fn paths_to_remove(&self) -> Vec<String> {
        let mut out = self.deleted.clone();
        out.extend(self.renamed.iter().map(|(old, _)| old.clone()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rel_filter_is_case_insensitive_and_trimmed() {
        let rels = RelKind::parse_filter(" calls , Inherits_From,CALLS").unwrap();
        assert_eq!(rels, vec![RelKind::Calls, RelKind::InheritsFrom]);
    }

    #[test]
    fn test_rel_filter_rejects_unknown_tokens() {
        let err = RelKind::parse_filter("CALLS, DROP TABLE nodes, BOGUS").unwrap_err();
        match err {
            GraphError::InvalidRelationship(bad) => {
                assert_eq!(bad, vec!["DROP TABLE nodes".to_string(), "BOGUS".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rel_filter_empty_selects_nothing() {
        assert!(RelKind::parse_filter("  ").unwrap().is_empty());
    }

    #[test]
    fn test_sql_in_list() {
        let sql = RelKind::sql_in_list(&[RelKind::Calls, RelKind::Imports]);
        assert_eq!(sql, "('CALLS', 'IMPORTS')");
    }

    #[test]
    fn test_node_kind_round_trip_from_str() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        assert_eq!("function".parse::<NodeKind>().unwrap(), NodeKind::Function);
        assert!("Widget".parse::<NodeKind>().is_err());
    }

    #[test]
    fn test_change_set_paths() {
        let cs = ChangeSet {
            added: vec!["a.py".into()],
            modified: vec!["b.py".into()],
            deleted: vec!["c.py".into()],
            renamed: vec![("d.py".into(), "e.py".into())],
        };
        assert_eq!(cs.paths_to_index(), vec!["a.py", "b.py", "e.py"]);
        assert_eq!(cs.paths_to_remove(), vec!["c.py", "d.py"]);
        assert!(!cs.is_empty());
        assert!(ChangeSet::default().is_empty());
    }
}
