//! Entity extraction: one Python file in, a [`FileExtraction`] arena out.
//!
//! Only module-level classes and functions, their direct methods, and
//! functions nested directly in a function body are extracted. Call names
//! are collected per scope: the walk never crosses into a nested
//! definition, so each nested function owns an independent call list.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;
use tree_sitter::Node;

use crate::errors::GraphError;
use crate::indexer::entities::{
    ClassDetails, EntityDetails, ExtractedAttribute, ExtractedDecorator, ExtractedEntity,
    ExtractedParameter, FileExtraction, FunctionDetails,
};
use crate::indexer::filesystem::{content_hash, dedent, is_package_init, path_to_module};
use crate::indexer::imports::collect_imports;
use crate::indexer::parser::{children, end_line, named_children, parse_python, start_line, text};
use crate::models::ParameterKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    Module,
    Class,
    Function,
}

/// A definition waiting to be turned into an entity.
struct Pending<'t> {
    node: Node<'t>,
    parent: Option<usize>,
    parent_qname: String,
    scope: Scope,
}

/// Extract every entity and import from one file.
///
/// Never fails: a syntax error produces a record with `parse_error` set, the
/// file hash filled in, and no entities.
pub fn extract_file(file_path: &str, source: &str) -> FileExtraction {
    let module_name = path_to_module(file_path);
    let mut extraction = FileExtraction {
        file_path: file_path.to_string(),
        module_name: module_name.clone(),
        is_package: is_package_init(file_path),
        file_hash: content_hash(source),
        ..FileExtraction::default()
    };

    let tree = match parse_python(source) {
        Ok(tree) => tree,
        Err(GraphError::Parse(msg)) => {
            debug!(file = file_path, error = %msg, "parse failure");
            extraction.parse_error = Some(msg);
            return extraction;
        }
        Err(other) => {
            extraction.parse_error = Some(other.to_string());
            return extraction;
        }
    };

    let root = tree.root_node();
    let lines: Vec<&str> = source.lines().collect();
    let entities = collect_entities(root, source, &lines, &module_name);
    extraction.entities = drop_shadowed(entities);
    extraction.imports = collect_imports(root, source, &module_name, extraction.is_package);
    extraction
}

// ---------------------------------------------------------------------------
// Entity walk
// ---------------------------------------------------------------------------

fn collect_entities(root: Node<'_>, source: &str, lines: &[&str], module_name: &str) -> Vec<ExtractedEntity> {
    let mut entities: Vec<ExtractedEntity> = Vec::new();
    let mut stack: Vec<Pending<'_>> = definitions_in(root)
        .into_iter()
        .rev()
        .map(|node| Pending {
            node,
            parent: None,
            parent_qname: module_name.to_string(),
            scope: Scope::Module,
        })
        .collect();

    while let Some(pending) = stack.pop() {
        let (def, decorator_nodes) = unwrap_decorated(pending.node);
        let Some(name_node) = def.child_by_field_name("name") else {
            continue;
        };
        let name = text(name_node, source).to_string();
        let qualified_name = join_qualified(&pending.parent_qname, &name);

        let span_start = start_line(pending.node);
        let span_end = end_line(def);
        let span = lines
            .get(span_start.saturating_sub(1)..span_end.min(lines.len()))
            .map(|l| l.join("\n"))
            .unwrap_or_default();
        let body = def.child_by_field_name("body");
        let decorators = decorator_nodes
            .iter()
            .filter_map(|d| parse_decorator(*d, source))
            .collect();

        let (details, child_scope) = match def.kind() {
            // Classes are only extracted at module level.
            "class_definition" if pending.scope == Scope::Module => (
                EntityDetails::Class(ClassDetails {
                    bases: class_bases(def, source),
                    attributes: body.map(|b| class_attributes(b, source)).unwrap_or_default(),
                }),
                Scope::Class,
            ),
            "function_definition" => (
                EntityDetails::Function(FunctionDetails {
                    is_async: children(def).iter().any(|c| c.kind() == "async"),
                    is_method: pending.scope == Scope::Class,
                    is_nested: pending.scope == Scope::Function,
                    parameters: def
                        .child_by_field_name("parameters")
                        .map(|p| parameters(p, source))
                        .unwrap_or_default(),
                    return_annotation: def
                        .child_by_field_name("return_type")
                        .map(|r| text(r, source).to_string()),
                    calls: collect_calls(def, &decorator_nodes, source),
                }),
                Scope::Function,
            ),
            _ => continue,
        };

        let index = entities.len();
        entities.push(ExtractedEntity {
            name,
            qualified_name: qualified_name.clone(),
            parent: pending.parent,
            lineno_start: start_line(def),
            lineno_end: span_end,
            source: dedent(&span),
            content_hash: content_hash(&span),
            docstring: body.and_then(|b| docstring(b, source)),
            decorators,
            details,
        });

        if let Some(body) = body {
            let nested: Vec<Node<'_>> = definitions_in(body)
                .into_iter()
                .filter(|n| unwrap_decorated(*n).0.kind() == "function_definition")
                .collect();
            stack.extend(nested.into_iter().rev().map(|node| Pending {
                node,
                parent: Some(index),
                parent_qname: qualified_name.clone(),
                scope: child_scope,
            }));
        }
    }

    entities
}

fn join_qualified(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

/// Direct definition statements of a module or block.
fn definitions_in(block: Node<'_>) -> Vec<Node<'_>> {
    named_children(block)
        .into_iter()
        .filter(|n| {
            matches!(
                n.kind(),
                "function_definition" | "class_definition" | "decorated_definition"
            )
        })
        .collect()
}

/// Split a `decorated_definition` into its definition and decorators.
fn unwrap_decorated(node: Node<'_>) -> (Node<'_>, Vec<Node<'_>>) {
    if node.kind() != "decorated_definition" {
        return (node, Vec::new());
    }
    let decorators = named_children(node)
        .into_iter()
        .filter(|c| c.kind() == "decorator")
        .collect();
    let def = node.child_by_field_name("definition").unwrap_or(node);
    (def, decorators)
}

/// Later definitions of the same qualified name win; earlier ones are
/// dropped together with their subtrees.
fn drop_shadowed(entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    let mut last: HashMap<&str, usize> = HashMap::new();
    for (i, e) in entities.iter().enumerate() {
        last.insert(e.qualified_name.as_str(), i);
    }

    let mut removed = vec![false; entities.len()];
    for (i, e) in entities.iter().enumerate() {
        let shadowed = last.get(e.qualified_name.as_str()) != Some(&i);
        let parent_removed = e.parent.is_some_and(|p| removed[p]);
        removed[i] = shadowed || parent_removed;
    }
    if !removed.iter().any(|r| *r) {
        return entities;
    }

    let mut remap: Vec<Option<usize>> = vec![None; entities.len()];
    let mut kept = Vec::with_capacity(entities.len());
    for (i, mut e) in entities.into_iter().enumerate() {
        if removed[i] {
            continue;
        }
        e.parent = e.parent.and_then(|p| remap[p]);
        remap[i] = Some(kept.len());
        kept.push(e);
    }
    kept
}

// ---------------------------------------------------------------------------
// Docstrings
// ---------------------------------------------------------------------------

fn docstring(body: Node<'_>, source: &str) -> Option<String> {
    let first = named_children(body).into_iter().next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = named_children(first).into_iter().next()?;
    if expr.kind() != "string" {
        return None;
    }
    let cleaned = clean_docstring(text(expr, source));
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Strip prefix and quotes, then remove the common indentation of every
/// line after the first.
pub fn clean_docstring(raw: &str) -> String {
    let unprefixed = raw.trim_start_matches(|c: char| "rRuUbBfF".contains(c));
    let inner = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| {
            unprefixed
                .strip_prefix(q)
                .and_then(|s| s.strip_suffix(q))
        })
        .unwrap_or(unprefixed);

    let expanded = inner.replace('\t', "        ");
    let lines: Vec<&str> = expanded.lines().collect();
    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            out.push(line.trim_start());
        } else {
            out.push(line.get(margin..).unwrap_or("").trim_end());
        }
    }
    out.join("\n").trim().to_string()
}

// ---------------------------------------------------------------------------
// Decorators
// ---------------------------------------------------------------------------

fn parse_decorator(decorator: Node<'_>, source: &str) -> Option<ExtractedDecorator> {
    let expr = named_children(decorator).into_iter().next()?;
    if expr.kind() == "call" {
        let name = expr
            .child_by_field_name("function")
            .map(|f| squash_whitespace(text(f, source)))?;
        let arguments = expr.child_by_field_name("arguments").and_then(|args| {
            let raw = text(args, source);
            let inner = raw
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))
                .unwrap_or(raw);
            let squashed = squash_whitespace(inner);
            let squashed = squashed.trim_end_matches(',').trim().to_string();
            (!squashed.is_empty()).then_some(squashed)
        });
        return Some(ExtractedDecorator { name, arguments });
    }
    Some(ExtractedDecorator {
        name: squash_whitespace(text(expr, source)),
        arguments: None,
    })
}

fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Parameters in declaration order (positional-only, positional-or-keyword,
/// `*args`, keyword-only, `**kwargs`). `self` and `cls` are skipped.
fn parameters(params: Node<'_>, source: &str) -> Vec<ExtractedParameter> {
    let mut out: Vec<ExtractedParameter> = Vec::new();
    let mut after_star = false;

    for param in named_children(params) {
        let (name, type_annotation, default_value, kind) = match param.kind() {
            "identifier" => (text(param, source).to_string(), None, None, None),
            "default_parameter" | "typed_default_parameter" => (
                param
                    .child_by_field_name("name")
                    .map(|n| text(n, source).to_string())
                    .unwrap_or_default(),
                param.child_by_field_name("type").map(|t| text(t, source).to_string()),
                param.child_by_field_name("value").map(|v| text(v, source).to_string()),
                None,
            ),
            "typed_parameter" => {
                let inner = named_children(param).into_iter().next();
                let type_annotation = param.child_by_field_name("type").map(|t| text(t, source).to_string());
                match inner {
                    Some(n) if n.kind() == "list_splat_pattern" => (
                        format!("*{}", splat_name(n, source)),
                        type_annotation,
                        None,
                        Some(ParameterKind::VarPositional),
                    ),
                    Some(n) if n.kind() == "dictionary_splat_pattern" => (
                        format!("**{}", splat_name(n, source)),
                        type_annotation,
                        None,
                        Some(ParameterKind::VarKeyword),
                    ),
                    Some(n) => (text(n, source).to_string(), type_annotation, None, None),
                    None => continue,
                }
            }
            "list_splat_pattern" => (
                format!("*{}", splat_name(param, source)),
                None,
                None,
                Some(ParameterKind::VarPositional),
            ),
            "dictionary_splat_pattern" => (
                format!("**{}", splat_name(param, source)),
                None,
                None,
                Some(ParameterKind::VarKeyword),
            ),
            "keyword_separator" => {
                after_star = true;
                continue;
            }
            "positional_separator" => {
                for p in out.iter_mut() {
                    if p.kind == ParameterKind::PositionalOrKeyword {
                        p.kind = ParameterKind::PositionalOnly;
                    }
                }
                continue;
            }
            _ => continue,
        };

        let kind = match kind {
            Some(k) => k,
            None if after_star => ParameterKind::KeywordOnly,
            None => ParameterKind::PositionalOrKeyword,
        };
        if kind == ParameterKind::VarPositional {
            after_star = true;
        }
        if name.is_empty() {
            continue;
        }
        let is_receiver = matches!(name.as_str(), "self" | "cls")
            && matches!(kind, ParameterKind::PositionalOrKeyword | ParameterKind::PositionalOnly);
        if is_receiver {
            continue;
        }

        out.push(ExtractedParameter {
            name,
            type_annotation,
            default_value,
            kind,
            position: 0,
        });
    }

    for (position, p) in out.iter_mut().enumerate() {
        p.position = position;
    }
    out
}

fn splat_name(node: Node<'_>, source: &str) -> String {
    named_children(node)
        .into_iter()
        .next()
        .map(|n| text(n, source).to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

/// Bare base names; keyword arguments (`metaclass=...`) are skipped.
fn class_bases(class: Node<'_>, source: &str) -> Vec<String> {
    let Some(args) = class.child_by_field_name("superclasses") else {
        return Vec::new();
    };
    let mut bases = Vec::new();
    for arg in named_children(args) {
        if let Some(name) = bare_name(arg, source) {
            if !bases.contains(&name) {
                bases.push(name);
            }
        }
    }
    bases
}

/// Last identifier segment of a name-like expression; subscripts are
/// unwrapped (`typing.Generic[T]` -> `Generic`).
fn bare_name(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(text(node, source).to_string()),
        "attribute" => node
            .child_by_field_name("attribute")
            .map(|a| text(a, source).to_string()),
        "subscript" => node
            .child_by_field_name("value")
            .and_then(|v| bare_name(v, source)),
        _ => None,
    }
}

fn class_attributes(body: Node<'_>, source: &str) -> Vec<ExtractedAttribute> {
    let mut attributes = Vec::new();
    for stmt in named_children(body) {
        if stmt.kind() != "expression_statement" {
            continue;
        }
        let Some(assignment) = named_children(stmt).into_iter().next() else {
            continue;
        };
        if assignment.kind() != "assignment" {
            continue;
        }

        // `a = b = 1` nests as assignment(left=a, right=assignment(left=b, right=1)).
        let mut targets: Vec<(String, Option<String>)> = Vec::new();
        let mut current = assignment;
        let default_value = loop {
            if let Some(left) = current.child_by_field_name("left") {
                if left.kind() == "identifier" {
                    let annotation = current
                        .child_by_field_name("type")
                        .map(|t| text(t, source).to_string());
                    targets.push((text(left, source).to_string(), annotation));
                }
            }
            match current.child_by_field_name("right") {
                Some(right) if right.kind() == "assignment" => current = right,
                Some(right) => break Some(text(right, source).to_string()),
                None => break None,
            }
        };

        for (name, type_annotation) in targets {
            attributes.push(ExtractedAttribute {
                name,
                type_annotation,
                default_value: default_value.clone(),
                lineno: start_line(stmt),
            });
        }
    }
    attributes
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// Bare callee names for one function scope. Covers the function's own
/// decorators, parameter defaults, return annotation and body; stops at
/// nested definitions.
fn collect_calls(def: Node<'_>, decorators: &[Node<'_>], source: &str) -> Vec<String> {
    let mut calls = BTreeSet::new();
    let mut work: Vec<Node<'_>> = decorators.to_vec();
    for field in ["parameters", "return_type", "body"] {
        if let Some(n) = def.child_by_field_name(field) {
            work.push(n);
        }
    }

    while let Some(node) = work.pop() {
        if node.kind() == "call" {
            if let Some(name) = node.child_by_field_name("function").and_then(|f| callee_name(f, source)) {
                calls.insert(name);
            }
        }
        if matches!(
            node.kind(),
            "function_definition" | "class_definition" | "decorated_definition"
        ) {
            continue;
        }
        work.extend(named_children(node));
    }

    calls.into_iter().collect()
}

/// `helper()` -> `helper`, `self.a.save()` -> `save`; anything else
/// (subscripts, calls of calls) has no usable name.
fn callee_name(func: Node<'_>, source: &str) -> Option<String> {
    match func.kind() {
        "identifier" => Some(text(func, source).to_string()),
        "attribute" => func
            .child_by_field_name("attribute")
            .map(|a| text(a, source).to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeKind;

    fn entity<'a>(x: &'a FileExtraction, qname: &str) -> &'a ExtractedEntity {
        let idx = x.find(qname).unwrap_or_else(|| panic!("missing {qname}"));
        &x.entities[idx]
    }

    #[test]
    fn test_nested_scopes_own_their_calls() {
        let src = "def outer():\n    def inner():\n        helper()\n";
        let x = extract_file("pkg/mod.py", src);
        let outer = entity(&x, "pkg.mod.outer");
        let inner = entity(&x, "pkg.mod.outer.inner");
        assert!(outer.as_function().unwrap().calls.is_empty());
        assert_eq!(inner.as_function().unwrap().calls, vec!["helper"]);
        assert!(inner.as_function().unwrap().is_nested);
        assert_eq!(inner.parent, x.find("pkg.mod.outer"));
    }

    #[test]
    fn test_call_names_are_bare_and_sorted() {
        let src = "\
@cache(make_key())
def run(x=default_factory()):
    self.store.save(x)
    utils.helper()
    get_app().start()
    handlers[0]()
    helper()
";
        let x = extract_file("m.py", src);
        let calls = &entity(&x, "m.run").as_function().unwrap().calls;
        assert_eq!(
            calls,
            &vec!["cache", "default_factory", "get_app", "helper", "make_key", "save", "start"]
        );
    }

    #[test]
    fn test_decorator_argument_change_changes_hash() {
        let a = extract_file("m.py", "@retry(times=3)\ndef f():\n    pass\n");
        let b = extract_file("m.py", "@retry(times=4)\ndef f():\n    pass\n");
        let ea = entity(&a, "m.f");
        let eb = entity(&b, "m.f");
        assert_ne!(ea.content_hash, eb.content_hash);
        assert_eq!(ea.decorators[0].name, "retry");
        assert_eq!(ea.decorators[0].arguments.as_deref(), Some("times=3"));
        assert!(ea.source.starts_with("@retry"));
        assert_eq!(ea.lineno_start, 2);
    }

    #[test]
    fn test_identical_text_hashes_identically_in_any_context() {
        let top = extract_file("a.py", "def save(self, x):\n    return x\n");
        let method = extract_file(
            "b.py",
            "class Repo:\n    def save(self, x):\n        return x   \n",
        );
        assert_eq!(
            entity(&top, "a.save").content_hash,
            entity(&method, "b.Repo.save").content_hash
        );
    }

    #[test]
    fn test_parameter_kinds_and_defaults() {
        let src = "def f(self, a, b=1, /, c: int = 2, *args, d, e: str = 'x', **kw) -> bool:\n    pass\n";
        let x = extract_file("m.py", src);
        let f = entity(&x, "m.f").as_function().unwrap();
        let summary: Vec<(&str, ParameterKind, Option<&str>, usize)> = f
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.kind, p.default_value.as_deref(), p.position))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", ParameterKind::PositionalOnly, None, 0),
                ("b", ParameterKind::PositionalOnly, Some("1"), 1),
                ("c", ParameterKind::PositionalOrKeyword, Some("2"), 2),
                ("*args", ParameterKind::VarPositional, None, 3),
                ("d", ParameterKind::KeywordOnly, None, 4),
                ("e", ParameterKind::KeywordOnly, Some("'x'"), 5),
                ("**kw", ParameterKind::VarKeyword, None, 6),
            ]
        );
        assert_eq!(f.parameters[2].type_annotation.as_deref(), Some("int"));
        assert_eq!(f.return_annotation.as_deref(), Some("bool"));
    }

    #[test]
    fn test_bare_star_makes_keyword_only() {
        let x = extract_file("m.py", "def f(a, *, b=3):\n    pass\n");
        let f = entity(&x, "m.f").as_function().unwrap();
        assert_eq!(f.parameters[0].kind, ParameterKind::PositionalOrKeyword);
        assert_eq!(f.parameters[1].kind, ParameterKind::KeywordOnly);
        assert_eq!(f.parameters[1].default_value.as_deref(), Some("3"));
    }

    #[test]
    fn test_class_extraction() {
        let src = r#"
@dataclass
class Order(base.Model, Generic[T], metaclass=Meta):
    """An order.

    Details here.
        Indented detail.
    """
    table: str = "orders"
    a = b = 0

    async def total(self) -> int:
        return sum_items(self.items)

    class Inner:
        def hidden(self):
            pass
"#;
        let x = extract_file("shop/models.py", src);
        let order = entity(&x, "shop.models.Order");
        assert_eq!(order.kind(), NodeKind::Class);
        let details = order.as_class().unwrap();
        assert_eq!(details.bases, vec!["Model", "Generic"]);
        assert_eq!(order.docstring.as_deref(), Some("An order.\n\nDetails here.\n    Indented detail."));
        assert_eq!(order.decorators[0].name, "dataclass");
        let attrs: Vec<(&str, Option<&str>, Option<&str>)> = details
            .attributes
            .iter()
            .map(|a| (a.name.as_str(), a.type_annotation.as_deref(), a.default_value.as_deref()))
            .collect();
        assert_eq!(
            attrs,
            vec![
                ("table", Some("str"), Some("\"orders\"")),
                ("a", None, Some("0")),
                ("b", None, Some("0")),
            ]
        );

        let total = entity(&x, "shop.models.Order.total").as_function().unwrap();
        assert!(total.is_method && total.is_async && !total.is_nested);
        assert!(total.parameters.is_empty());
        assert_eq!(total.calls, vec!["sum_items"]);
        // Classes nested in classes are out of scope.
        assert!(x.find("shop.models.Order.Inner").is_none());
        assert!(x.find("shop.models.Order.Inner.hidden").is_none());
    }

    #[test]
    fn test_arena_is_pre_order() {
        let src = "class A:\n    def m1(self):\n        def deep():\n            pass\n    def m2(self):\n        pass\ndef g():\n    pass\n";
        let x = extract_file("m.py", src);
        let names: Vec<&str> = x.entities.iter().map(|e| e.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["m.A", "m.A.m1", "m.A.m1.deep", "m.A.m2", "m.g"]);
        for (i, e) in x.entities.iter().enumerate() {
            if let Some(p) = e.parent {
                assert!(p < i);
            }
        }
        assert_eq!(x.subtree(0), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_later_definition_shadows_earlier() {
        let src = "def f():\n    def g():\n        pass\n    one()\n\ndef f():\n    two()\n";
        let x = extract_file("m.py", src);
        assert_eq!(x.entities.len(), 1);
        assert_eq!(x.entities[0].as_function().unwrap().calls, vec!["two"]);
    }

    #[test]
    fn test_parse_failure_keeps_file_hash() {
        let x = extract_file("bad.py", "def broken(:\n    pass\n");
        assert!(x.parse_error.is_some());
        assert!(x.entities.is_empty());
        assert!(x.imports.is_empty());
        assert_eq!(x.file_hash.len(), 16);
        assert_eq!(x.module_name, "bad");
    }

    #[test]
    fn test_clean_docstring() {
        assert_eq!(clean_docstring("'''Short.'''"), "Short.");
        assert_eq!(clean_docstring("r\"\"\"\n    Line one.\n      Two.\n    \"\"\""), "Line one.\n  Two.");
    }
}
