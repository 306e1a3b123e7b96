//! Edge writes: generic upserts, import rebuilds, and base-class linking
//! with unresolved placeholders.

use indexmap::IndexMap;
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::debug;

use crate::errors::GraphResult;
use crate::indexer::entities::ExtractedImport;
use crate::models::{ImportProps, NodeKind, RelKind};
use crate::store::database::optional_row;
use crate::store::nodes::upsert_module_row;
use crate::store::GraphStore;

/// Outcome of one placeholder reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaceholderReport {
    pub relinked: usize,
    pub removed: usize,
}

pub trait EdgeOps {
    /// Create an edge, overwriting properties if it already exists.
    fn add_edge(
        &self,
        source_id: i64,
        target_id: i64,
        rel: RelKind,
        props: Option<&Value>,
    ) -> GraphResult<()>;

    fn delete_edges_from(&self, source_id: i64, rels: &[RelKind]) -> GraphResult<usize>;

    fn delete_edges_of_type(&self, rel: RelKind) -> GraphResult<usize>;

    /// Drop every IMPORTS edge leaving `module_name` and recreate them from
    /// `imports`. Several statements importing the same target collapse into
    /// one edge. Returns the number of edges written.
    fn replace_module_imports(
        &self,
        module_name: &str,
        imports: &[ExtractedImport],
    ) -> GraphResult<usize>;

    /// Rebuild INHERITS_FROM edges of one class. Each base links to a real
    /// class in the same file, else the only real class with that name, else
    /// an unresolved placeholder.
    fn link_base_classes(&self, class_id: i64, file_path: &str, bases: &[String]) -> GraphResult<()>;

    /// Re-point edges aimed at placeholders that now have a real definition
    /// and delete placeholders nothing refers to.
    fn resolve_base_placeholders(&self) -> GraphResult<PlaceholderReport>;
}

pub(crate) fn insert_edge(
    conn: &Connection,
    source_id: i64,
    target_id: i64,
    rel: RelKind,
    props: Option<&Value>,
) -> GraphResult<()> {
    let props = props.map(Value::to_string);
    conn.execute(
        "INSERT INTO edges(source_id, target_id, relationship, properties) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(source_id, target_id, relationship) DO UPDATE SET properties = excluded.properties;",
        params![source_id, target_id, rel, props],
    )?;
    Ok(())
}

/// Real (non-placeholder) class a base name should point at, seen from
/// `file_path`.
fn resolve_base_target(
    conn: &Connection,
    name: &str,
    file_path: Option<&str>,
    exclude_id: i64,
) -> GraphResult<Option<i64>> {
    if let Some(path) = file_path {
        let local: Option<i64> = optional_row(conn.query_row(
            "SELECT id FROM nodes \
             WHERE kind = 'Class' AND is_unresolved = 0 AND name = ?1 AND file_path = ?2 AND id <> ?3 \
             ORDER BY lineno_start LIMIT 1;",
            params![name, path, exclude_id],
            |row| row.get(0),
        ))?;
        if local.is_some() {
            return Ok(local);
        }
    }
    let mut stmt = conn.prepare_cached(
        "SELECT id FROM nodes WHERE kind = 'Class' AND is_unresolved = 0 AND name = ?1 AND id <> ?2 LIMIT 2;",
    )?;
    let ids = stmt
        .query_map(params![name, exclude_id], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(match ids.as_slice() {
        [only] => Some(*only),
        _ => None,
    })
}

pub(crate) fn upsert_placeholder(conn: &Connection, name: &str) -> GraphResult<i64> {
    let id = conn.query_row(
        "INSERT INTO nodes(kind, node_key, name, is_unresolved) VALUES ('Class', ?1, ?1, 1) \
         ON CONFLICT(kind, node_key) DO UPDATE SET name = excluded.name \
         RETURNING id;",
        params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Fold a second import of the same target into an existing record. The
/// "only under a guard" flags survive only when every statement has them.
fn merge_import(into: &mut ImportProps, other: &ImportProps) {
    for name in &other.names {
        if !into.names.contains(name) {
            into.names.push(name.clone());
        }
    }
    for (k, v) in &other.aliases {
        into.aliases.entry(k.clone()).or_insert_with(|| v.clone());
    }
    into.is_relative |= other.is_relative;
    into.is_type_checking &= other.is_type_checking;
    into.is_conditional &= other.is_conditional;
    into.is_try_except &= other.is_try_except;
    into.is_fallback &= other.is_fallback;
    if !into.is_conditional {
        into.condition = None;
    }
}

impl EdgeOps for GraphStore {
    fn add_edge(
        &self,
        source_id: i64,
        target_id: i64,
        rel: RelKind,
        props: Option<&Value>,
    ) -> GraphResult<()> {
        self.with_conn(|conn| insert_edge(conn, source_id, target_id, rel, props))
    }

    fn delete_edges_from(&self, source_id: i64, rels: &[RelKind]) -> GraphResult<usize> {
        if rels.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM edges WHERE source_id = ?1 AND relationship IN {};",
                RelKind::sql_in_list(rels)
            );
            Ok(conn.execute(&sql, params![source_id])?)
        })
    }

    fn delete_edges_of_type(&self, rel: RelKind) -> GraphResult<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM edges WHERE relationship = ?1;", params![rel])?)
        })
    }

    fn replace_module_imports(
        &self,
        module_name: &str,
        imports: &[ExtractedImport],
    ) -> GraphResult<usize> {
        let mut grouped: IndexMap<&str, ImportProps> = IndexMap::new();
        for import in imports {
            if import.module.is_empty() || import.module == module_name {
                continue;
            }
            match grouped.get_mut(import.module.as_str()) {
                Some(existing) => merge_import(existing, &import.props),
                None => {
                    grouped.insert(import.module.as_str(), import.props.clone());
                }
            }
        }

        self.with_conn(|conn| {
            let source_id = upsert_module_row(conn, module_name)?;
            conn.execute(
                "DELETE FROM edges WHERE source_id = ?1 AND relationship = 'IMPORTS';",
                params![source_id],
            )?;
            for (target, props) in &grouped {
                let target_id = upsert_module_row(conn, target)?;
                let value = serde_json::to_value(props)?;
                insert_edge(conn, source_id, target_id, RelKind::Imports, Some(&value))?;
            }
            Ok(grouped.len())
        })
    }

    fn link_base_classes(&self, class_id: i64, file_path: &str, bases: &[String]) -> GraphResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM edges WHERE source_id = ?1 AND relationship = 'INHERITS_FROM';",
                params![class_id],
            )?;
            for base in bases {
                let target = match resolve_base_target(conn, base, Some(file_path), class_id)? {
                    Some(id) => id,
                    None => upsert_placeholder(conn, base)?,
                };
                insert_edge(conn, class_id, target, RelKind::InheritsFrom, None)?;
            }
            Ok(())
        })
    }

    fn resolve_base_placeholders(&self) -> GraphResult<PlaceholderReport> {
        self.in_transaction(|| {
            self.with_conn(|conn| {
                let mut report = PlaceholderReport::default();
                let pending: Vec<(i64, String, i64, Option<String>)> = {
                    let mut stmt = conn.prepare(
                        "SELECT p.id, p.name, c.id, c.file_path \
                         FROM nodes p \
                         JOIN edges e ON e.target_id = p.id AND e.relationship = 'INHERITS_FROM' \
                         JOIN nodes c ON c.id = e.source_id \
                         WHERE p.kind = 'Class' AND p.is_unresolved = 1;",
                    )?;
                    let rows = stmt
                        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                };

                for (placeholder_id, name, child_id, file_path) in pending {
                    let Some(target) = resolve_base_target(conn, &name, file_path.as_deref(), child_id)?
                    else {
                        continue;
                    };
                    conn.execute(
                        "DELETE FROM edges WHERE source_id = ?1 AND target_id = ?2 AND relationship = 'INHERITS_FROM';",
                        params![child_id, placeholder_id],
                    )?;
                    insert_edge(conn, child_id, target, RelKind::InheritsFrom, None)?;
                    report.relinked += 1;
                }

                report.removed = conn.execute(
                    "DELETE FROM nodes \
                     WHERE kind = ?1 AND is_unresolved = 1 \
                       AND NOT EXISTS (SELECT 1 FROM edges e WHERE e.target_id = nodes.id);",
                    params![NodeKind::Class],
                )?;
                if report.relinked > 0 || report.removed > 0 {
                    debug!(relinked = report.relinked, removed = report.removed, "placeholders reconciled");
                }
                Ok(report)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extractor::extract_file;
    use crate::store::NodeOps;

    fn count(store: &GraphStore, sql: &str) -> i64 {
        store.with_conn(|c| Ok(c.query_row(sql, [], |r| r.get(0))?)).unwrap()
    }

    fn ingest_classes(store: &GraphStore, path: &str, module: &str, src: &str) {
        let x = extract_file(path, src);
        let file_id = store.upsert_file(path, module, &x.file_hash, None).unwrap();
        for class in x.classes() {
            let id = store.insert_entity(path, module, class, file_id).unwrap();
            store
                .link_base_classes(id, path, &class.as_class().unwrap().bases)
                .unwrap();
        }
    }

    #[test]
    fn test_add_edge_overwrites_properties() {
        let store = GraphStore::open_in_memory().unwrap();
        let a = store.upsert_module("a").unwrap();
        let b = store.upsert_module("b").unwrap();
        store
            .add_edge(a, b, RelKind::Imports, Some(&serde_json::json!({"v": 1})))
            .unwrap();
        store
            .add_edge(a, b, RelKind::Imports, Some(&serde_json::json!({"v": 2})))
            .unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM edges WHERE relationship = 'IMPORTS'"), 1);
        let props: String = store
            .with_conn(|c| Ok(c.query_row("SELECT properties FROM edges", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(props, r#"{"v":2}"#);
    }

    #[test]
    fn test_replace_module_imports_merges_same_target() {
        let store = GraphStore::open_in_memory().unwrap();
        let x = extract_file(
            "app/main.py",
            "import os\nfrom os import path\nfrom typing import TYPE_CHECKING\nif TYPE_CHECKING:\n    from app.models import User\n",
        );
        let written = store.replace_module_imports("app.main", &x.imports).unwrap();
        assert_eq!(written, 3);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM edges WHERE relationship = 'IMPORTS'"), 3);

        // A rebuild replaces rather than accumulates.
        let x2 = extract_file("app/main.py", "import os\n");
        store.replace_module_imports("app.main", &x2.imports).unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM edges WHERE relationship = 'IMPORTS'"), 1);
    }

    #[test]
    fn test_merge_import_keeps_guard_flags_only_when_shared() {
        let mut a = ImportProps {
            names: vec!["x".into()],
            is_type_checking: true,
            ..ImportProps::default()
        };
        let b = ImportProps {
            names: vec!["y".into(), "x".into()],
            ..ImportProps::default()
        };
        merge_import(&mut a, &b);
        assert_eq!(a.names, vec!["x", "y"]);
        assert!(!a.is_type_checking);
    }

    #[test]
    fn test_base_prefers_same_file_class() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest_classes(&store, "a.py", "a", "class Base:\n    pass\n");
        ingest_classes(&store, "b.py", "b", "class Base:\n    pass\nclass Child(Base):\n    pass\n");
        let target: String = store
            .with_conn(|c| {
                Ok(c.query_row(
                    "SELECT t.qualified_name FROM edges e JOIN nodes t ON t.id = e.target_id \
                     WHERE e.relationship = 'INHERITS_FROM'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(target, "b.Base");
        assert_eq!(count(&store, "SELECT COUNT(*) FROM nodes WHERE is_unresolved = 1"), 0);
    }

    #[test]
    fn test_ambiguous_base_gets_placeholder_until_unique() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest_classes(&store, "c.py", "c", "class Child(Base):\n    pass\n");
        assert_eq!(count(&store, "SELECT COUNT(*) FROM nodes WHERE is_unresolved = 1"), 1);

        ingest_classes(&store, "a.py", "a", "class Base:\n    pass\n");
        let report = store.resolve_base_placeholders().unwrap();
        assert_eq!(report, PlaceholderReport { relinked: 1, removed: 1 });
        assert_eq!(count(&store, "SELECT COUNT(*) FROM nodes WHERE is_unresolved = 1"), 0);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM edges WHERE relationship = 'INHERITS_FROM'"), 1);
    }

    #[test]
    fn test_placeholder_kept_while_ambiguous() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest_classes(&store, "c.py", "c", "class Child(Base):\n    pass\n");
        ingest_classes(&store, "a.py", "a", "class Base:\n    pass\n");
        ingest_classes(&store, "b.py", "b", "class Base:\n    pass\n");
        let report = store.resolve_base_placeholders().unwrap();
        assert_eq!(report, PlaceholderReport::default());
        assert_eq!(count(&store, "SELECT COUNT(*) FROM nodes WHERE is_unresolved = 1"), 1);
    }
}
