//! Shared guardrails for query payload bounds and traversal limits.

use crate::errors::GraphResult;
use crate::models::{NodeKind, RelKind};

pub const MAX_QUERY_LENGTH: usize = 8192;
pub const MAX_SEARCH_LIMIT: usize = 100;
pub const MAX_TRAVERSAL_DEPTH: u32 = 3;
pub const MAX_IMPORT_DEPTH: u32 = 5;
pub const MAX_SUBGRAPH_HOPS: u32 = 3;
pub const MAX_SUBGRAPH_NODES: usize = 500;
pub const DEFAULT_SUBGRAPH_NODES: usize = 50;
pub const DEFAULT_RELATED_LIMIT: usize = 25;
pub const DEFAULT_FIND_LIMIT: usize = 10;
pub const MAX_GRAPH_VISITED: usize = 2000;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

pub fn clamp_depth(value: u32, maximum: u32) -> u32 {
    value.clamp(1, maximum.max(1))
}

pub fn clamp_limit(value: usize, maximum: usize) -> usize {
    value.clamp(1, maximum.max(1))
}

/// Trim and cut to [`MAX_QUERY_LENGTH`] bytes on a char boundary.
pub fn truncate_query(query: &str) -> &str {
    let stripped = query.trim();
    if stripped.len() <= MAX_QUERY_LENGTH {
        return stripped;
    }
    let mut end = MAX_QUERY_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    &stripped[..end]
}

/// Parse a caller relationship filter. `None` or blank means "no filter"
/// and yields an empty list.
pub fn relationship_filter(raw: Option<&str>) -> GraphResult<Vec<RelKind>> {
    match raw {
        Some(r) if !r.trim().is_empty() => RelKind::parse_filter(r),
        _ => Ok(Vec::new()),
    }
}

/// Relationships walked when the caller gave no filter.
pub fn default_relationships(kind: NodeKind) -> Vec<RelKind> {
    match kind {
        NodeKind::Function => vec![RelKind::Calls, RelKind::DataFlowsTo],
        NodeKind::Class => vec![
            RelKind::InheritsFrom,
            RelKind::CollaboratesWith,
            RelKind::DataFlowsTo,
        ],
        NodeKind::Module => vec![RelKind::Imports],
        _ => RelKind::ALL.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GraphError;

    #[test]
    fn test_clamps() {
        assert_eq!(clamp_depth(0, MAX_TRAVERSAL_DEPTH), 1);
        assert_eq!(clamp_depth(9, MAX_TRAVERSAL_DEPTH), 3);
        assert_eq!(clamp_limit(500, MAX_SEARCH_LIMIT), 100);
        assert_eq!(clamp_int(-4, 0, 10), 0);
    }

    #[test]
    fn test_truncate_query_respects_char_boundaries() {
        let long = "é".repeat(MAX_QUERY_LENGTH);
        let cut = truncate_query(&long);
        assert!(cut.len() <= MAX_QUERY_LENGTH);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(truncate_query("  SELECT 1  "), "SELECT 1");
    }

    #[test]
    fn test_relationship_filter() {
        assert!(relationship_filter(None).unwrap().is_empty());
        assert!(relationship_filter(Some("  ")).unwrap().is_empty());
        assert_eq!(relationship_filter(Some("calls")).unwrap(), vec![RelKind::Calls]);
        assert!(matches!(
            relationship_filter(Some("CALLS]->() DETACH DELETE n //")),
            Err(GraphError::InvalidRelationship(_))
        ));
    }

    #[test]
    fn test_default_relationships_by_kind() {
        assert_eq!(default_relationships(NodeKind::Module), vec![RelKind::Imports]);
        assert!(default_relationships(NodeKind::Class).contains(&RelKind::InheritsFrom));
        assert_eq!(default_relationships(NodeKind::File).len(), RelKind::ALL.len());
    }
}
