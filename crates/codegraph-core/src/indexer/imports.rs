//! Module-level import extraction and relative-import resolution.

use std::collections::BTreeMap;

use tree_sitter::Node;

use crate::indexer::entities::ExtractedImport;
use crate::indexer::parser::{field_children, named_children, start_line, text};
use crate::models::ImportProps;

/// Flags inherited from the block an import statement sits in.
#[derive(Clone, Debug, Default)]
struct Guard {
    type_checking: bool,
    conditional: bool,
    condition: Option<String>,
    try_except: bool,
    fallback: bool,
}

impl Guard {
    fn apply(&self, props: &mut ImportProps) {
        props.is_type_checking = self.type_checking;
        props.is_conditional = self.conditional;
        props.condition = self.condition.clone();
        props.is_try_except = self.try_except;
        props.is_fallback = self.fallback;
    }
}

/// Collect imports from the top level of a module, including those nested
/// one level inside `if` (TYPE_CHECKING or any other condition) and `try`
/// blocks.
pub fn collect_imports(root: Node<'_>, source: &str, module_name: &str, is_package: bool) -> Vec<ExtractedImport> {
    let mut imports = Vec::new();

    for stmt in named_children(root) {
        match stmt.kind() {
            "import_statement" | "import_from_statement" => {
                parse_import(stmt, source, module_name, is_package, &Guard::default(), &mut imports);
            }
            "if_statement" => {
                let condition = stmt
                    .child_by_field_name("condition")
                    .map(|c| text(c, source).to_string())
                    .unwrap_or_default();
                if is_type_checking(&condition) {
                    let guard = Guard {
                        type_checking: true,
                        ..Guard::default()
                    };
                    scan_block(stmt.child_by_field_name("consequence"), source, module_name, is_package, &guard, &mut imports);
                    continue;
                }

                let guard = Guard {
                    conditional: true,
                    condition: Some(condition.clone()),
                    ..Guard::default()
                };
                scan_block(stmt.child_by_field_name("consequence"), source, module_name, is_package, &guard, &mut imports);

                for alt in field_children(stmt, "alternative") {
                    let (alt_condition, body) = match alt.kind() {
                        "elif_clause" => (
                            alt.child_by_field_name("condition")
                                .map(|c| text(c, source).to_string())
                                .unwrap_or_default(),
                            alt.child_by_field_name("consequence"),
                        ),
                        _ => (format!("not ({condition})"), alt.child_by_field_name("body")),
                    };
                    let guard = Guard {
                        conditional: true,
                        condition: Some(alt_condition),
                        ..Guard::default()
                    };
                    scan_block(body, source, module_name, is_package, &guard, &mut imports);
                }
            }
            "try_statement" => {
                let guard = Guard {
                    try_except: true,
                    ..Guard::default()
                };
                scan_block(stmt.child_by_field_name("body"), source, module_name, is_package, &guard, &mut imports);

                let fallback = Guard {
                    try_except: true,
                    fallback: true,
                    ..Guard::default()
                };
                for handler in named_children(stmt) {
                    if handler.kind() != "except_clause" {
                        continue;
                    }
                    let body = named_children(handler).into_iter().find(|c| c.kind() == "block");
                    scan_block(body, source, module_name, is_package, &fallback, &mut imports);
                }
            }
            _ => {}
        }
    }

    imports
}

fn scan_block(
    block: Option<Node<'_>>,
    source: &str,
    module_name: &str,
    is_package: bool,
    guard: &Guard,
    out: &mut Vec<ExtractedImport>,
) {
    let Some(block) = block else {
        return;
    };
    for stmt in named_children(block) {
        if matches!(stmt.kind(), "import_statement" | "import_from_statement") {
            parse_import(stmt, source, module_name, is_package, guard, out);
        }
    }
}

fn is_type_checking(condition: &str) -> bool {
    let condition = condition.trim();
    condition == "TYPE_CHECKING" || condition.ends_with(".TYPE_CHECKING")
}

/// `import a, b as c` yields one record per module. `from x import a, b`
/// yields one record; `from . import a, b` yields one record per name,
/// each targeting the sibling module.
fn parse_import(
    stmt: Node<'_>,
    source: &str,
    module_name: &str,
    is_package: bool,
    guard: &Guard,
    out: &mut Vec<ExtractedImport>,
) {
    let lineno = start_line(stmt);

    if stmt.kind() == "import_statement" {
        for name_node in field_children(stmt, "name") {
            let (module, alias) = split_alias(name_node, source);
            if module.is_empty() {
                continue;
            }
            let mut props = ImportProps {
                names: vec![module.clone()],
                ..ImportProps::default()
            };
            if let Some(alias) = alias {
                props.aliases.insert(module.clone(), alias);
            }
            guard.apply(&mut props);
            out.push(ExtractedImport { module, lineno, props });
        }
        return;
    }

    let Some(module_node) = stmt.child_by_field_name("module_name") else {
        return;
    };
    let (level, target) = if module_node.kind() == "relative_import" {
        let mut level = 0;
        let mut target = String::new();
        for part in named_children(module_node) {
            match part.kind() {
                "import_prefix" => level = text(part, source).chars().filter(|c| *c == '.').count(),
                "dotted_name" => target = text(part, source).to_string(),
                _ => {}
            }
        }
        (level, target)
    } else {
        (0, text(module_node, source).to_string())
    };

    let mut names = Vec::new();
    let mut aliases = BTreeMap::new();
    let is_wildcard = named_children(stmt).iter().any(|c| c.kind() == "wildcard_import");
    if is_wildcard {
        names.push("*".to_string());
    }
    for name_node in field_children(stmt, "name") {
        let (name, alias) = split_alias(name_node, source);
        if name.is_empty() {
            continue;
        }
        if let Some(alias) = alias {
            aliases.insert(name.clone(), alias);
        }
        names.push(name);
    }

    let is_relative = level > 0;
    if is_relative && target.is_empty() && !is_wildcard {
        // `from . import sibling`: each name is a module of the base package.
        for name in names {
            let module = resolve_relative_import(module_name, &name, level, is_package);
            let mut props = ImportProps {
                names: vec![name.clone()],
                is_relative: true,
                ..ImportProps::default()
            };
            if let Some(alias) = aliases.get(&name) {
                props.aliases.insert(name.clone(), alias.clone());
            }
            guard.apply(&mut props);
            out.push(ExtractedImport { module, lineno, props });
        }
        return;
    }

    let module = if is_relative {
        resolve_relative_import(module_name, &target, level, is_package)
    } else {
        target
    };
    if module.is_empty() {
        return;
    }
    let mut props = ImportProps {
        names,
        aliases,
        is_relative,
        ..ImportProps::default()
    };
    guard.apply(&mut props);
    out.push(ExtractedImport { module, lineno, props });
}

/// `(name, alias)` for a `dotted_name` or `aliased_import` node.
fn split_alias(node: Node<'_>, source: &str) -> (String, Option<String>) {
    if node.kind() == "aliased_import" {
        let name = node
            .child_by_field_name("name")
            .map(|n| text(n, source).to_string())
            .unwrap_or_default();
        let alias = node
            .child_by_field_name("alias")
            .map(|n| text(n, source).to_string());
        (name, alias)
    } else {
        (text(node, source).to_string(), None)
    }
}

/// Resolve a level-`level` relative import against the importing module.
///
/// A package initializer *is* its package, so it strips `level - 1`
/// components; any other file strips `level`. Climbing past the root
/// yields the bare target.
pub fn resolve_relative_import(current_module: &str, target: &str, level: usize, is_package: bool) -> String {
    let parts: Vec<&str> = current_module.split('.').filter(|p| !p.is_empty()).collect();
    let strip = if is_package { level.saturating_sub(1) } else { level };

    if strip > 0 && strip >= parts.len() {
        return target.to_string();
    }

    let mut base: Vec<&str> = parts[..parts.len() - strip].to_vec();
    if !target.is_empty() {
        base.push(target);
    }
    base.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::parse_python;

    fn imports_of(source: &str, module: &str, is_package: bool) -> Vec<ExtractedImport> {
        let tree = parse_python(source).unwrap();
        collect_imports(tree.root_node(), source, module, is_package)
    }

    #[test]
    fn test_resolve_relative_import_for_package_init() {
        assert_eq!(resolve_relative_import("P", "sibling", 1, true), "P.sibling");
        assert_eq!(resolve_relative_import("a.b", "", 1, true), "a.b");
        assert_eq!(resolve_relative_import("a.b", "c", 2, true), "a.c");
    }

    #[test]
    fn test_resolve_relative_import_for_module() {
        assert_eq!(resolve_relative_import("P.sub.mod", "other", 2, false), "P.other");
        assert_eq!(resolve_relative_import("P.sub.mod", "x", 1, false), "P.sub.x");
        assert_eq!(resolve_relative_import("mod", "x", 3, false), "x");
    }

    #[test]
    fn test_from_dot_import_in_package_init() {
        let imports = imports_of("from . import sibling\n", "P", true);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].module, "P.sibling");
        assert!(imports[0].props.is_relative);
    }

    #[test]
    fn test_from_dot_dot_import_in_module() {
        let imports = imports_of("from .. import other, more as m\n", "P.sub.mod", false);
        let modules: Vec<&str> = imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(modules, vec!["P.other", "P.more"]);
        assert_eq!(imports[1].props.aliases.get("more").map(String::as_str), Some("m"));
    }

    #[test]
    fn test_plain_and_from_imports() {
        let src = "import os, numpy as np\nfrom pkg.util import helper, Thing as T\nfrom .models import *\n";
        let imports = imports_of(src, "pkg.app", false);
        assert_eq!(imports.len(), 4);
        assert_eq!(imports[0].module, "os");
        assert_eq!(imports[1].module, "numpy");
        assert_eq!(imports[1].props.aliases.get("numpy").map(String::as_str), Some("np"));
        assert_eq!(imports[2].module, "pkg.util");
        assert_eq!(imports[2].props.names, vec!["helper", "Thing"]);
        assert_eq!(imports[3].module, "pkg.models");
        assert_eq!(imports[3].props.names, vec!["*"]);
        assert_eq!(imports[2].lineno, 2);
    }

    #[test]
    fn test_guarded_imports_carry_flags() {
        let src = "\
from typing import TYPE_CHECKING
if TYPE_CHECKING:
    from pkg.types import Model
if sys.version_info >= (3, 11):
    import tomllib
else:
    import tomli
try:
    import ujson
except ImportError:
    import json
";
        let imports = imports_of(src, "pkg.app", false);
        let by_module = |m: &str| imports.iter().find(|i| i.module == m).unwrap();

        assert!(by_module("pkg.types").props.is_type_checking);
        let tomllib = &by_module("tomllib").props;
        assert!(tomllib.is_conditional);
        assert_eq!(tomllib.condition.as_deref(), Some("sys.version_info >= (3, 11)"));
        assert_eq!(
            by_module("tomli").props.condition.as_deref(),
            Some("not (sys.version_info >= (3, 11))")
        );
        assert!(by_module("ujson").props.is_try_except);
        assert!(!by_module("ujson").props.is_fallback);
        assert!(by_module("json").props.is_fallback);
    }

    #[test]
    fn test_function_level_imports_are_ignored() {
        let imports = imports_of("def f():\n    import os\n", "m", false);
        assert!(imports.is_empty());
    }
}
