//! tree-sitter wrapper used by extraction passes.

use tree_sitter::{Node, Parser, Tree};

use crate::errors::{GraphError, GraphResult};

/// Parse Python source into a syntax tree.
///
/// A tree that parses but contains error or missing nodes is returned as a
/// `Parse` error naming the first offending position.
pub fn parse_python(source: &str) -> GraphResult<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| GraphError::Parse(format!("Failed to set language: {e}")))?;

    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| GraphError::Parse("parser returned no tree".to_string()))?;

    let root = tree.root_node();
    if root.has_error() {
        let message = match first_error_node(root) {
            Some(node) => {
                let pos = node.start_position();
                if node.is_missing() {
                    format!(
                        "invalid syntax: missing '{}' at line {}, column {}",
                        node.kind(),
                        pos.row + 1,
                        pos.column + 1
                    )
                } else {
                    format!("invalid syntax at line {}, column {}", pos.row + 1, pos.column + 1)
                }
            }
            None => "invalid syntax".to_string(),
        };
        return Err(GraphError::Parse(message));
    }
    Ok(tree)
}

/// Depth-first search for the first ERROR or MISSING node in source order.
fn first_error_node(root: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if !node.has_error() {
            continue;
        }
        let kids = children(node);
        stack.extend(kids.into_iter().rev());
    }
    None
}

// ---------------------------------------------------------------------------
// Node helpers
// ---------------------------------------------------------------------------

/// All children of `node`, in source order.
pub fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

/// Named children of `node`, in source order.
pub fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Children of `node` stored under `field`.
pub fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

/// Source text of `node`; empty on invalid UTF-8 boundaries.
pub fn text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// 1-based first line of `node`.
pub fn start_line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

/// 1-based last line of `node`.
pub fn end_line(node: Node<'_>) -> usize {
    let end = node.end_position();
    // A node ending at column 0 stops on the previous line.
    if end.column == 0 && end.row > node.start_position().row {
        end.row
    } else {
        end.row + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_source() {
        let tree = parse_python("def f(x):\n    return x\n").unwrap();
        let root = tree.root_node();
        assert_eq!(root.kind(), "module");
        assert_eq!(named_children(root)[0].kind(), "function_definition");
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = parse_python("def ok():\n    pass\n\ndef broken(:\n    pass\n").unwrap_err();
        match err {
            GraphError::Parse(msg) => assert!(msg.contains("line 4"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_line_helpers() {
        let src = "x = 1\n\ndef f():\n    pass\n";
        let tree = parse_python(src).unwrap();
        let func = named_children(tree.root_node())[1];
        assert_eq!(start_line(func), 3);
        assert_eq!(end_line(func), 4);
        assert_eq!(text(func.child_by_field_name("name").unwrap(), src), "f");
    }
}
