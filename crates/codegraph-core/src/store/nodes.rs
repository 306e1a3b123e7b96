//! Node CRUD: files, modules, code entities and their positional children.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::errors::GraphResult;
use crate::indexer::entities::{
    EntityDetails, ExtractedAttribute, ExtractedDecorator, ExtractedEntity, ExtractedParameter,
};
use crate::models::{NodeKind, RelKind};
use crate::store::database::optional_row;
use crate::store::edges::{insert_edge, upsert_placeholder};
use crate::store::{node_from_row, GraphStore, NodeRecord, NODE_COLUMNS};

pub trait NodeOps {
    /// Merge a File by path (plus its Module and DEFINES_MODULE edge).
    fn upsert_file(
        &self,
        path: &str,
        module_name: &str,
        content_hash: &str,
        parse_error: Option<&str>,
    ) -> GraphResult<i64>;

    /// Merge a Module by name.
    fn upsert_module(&self, name: &str) -> GraphResult<i64>;

    /// Create a Class or Function under `parent_id` (a File, Class or
    /// Function) with its CONTAINS edge. An existing node with the same
    /// qualified name is re-parented and overwritten.
    fn insert_entity(
        &self,
        file_path: &str,
        module_name: &str,
        entity: &ExtractedEntity,
        parent_id: i64,
    ) -> GraphResult<i64>;

    /// Overwrite structural properties in place, keeping enrichment fields.
    /// Returns `None` when no such entity is stored.
    fn update_entity(&self, entity: &ExtractedEntity) -> GraphResult<Option<i64>>;

    /// Refresh line numbers of an otherwise unchanged entity.
    fn refresh_position(&self, entity: &ExtractedEntity) -> GraphResult<()>;

    /// Delete an entity and everything below it. Returns rows removed.
    fn delete_entity(&self, kind: NodeKind, qualified_name: &str) -> GraphResult<usize>;

    /// Delete a File and its whole subtree. Returns whether it existed.
    fn delete_file(&self, path: &str) -> GraphResult<bool>;

    fn replace_parameters(&self, function_id: i64, params: &[ExtractedParameter]) -> GraphResult<()>;

    fn replace_attributes(&self, class_id: i64, attrs: &[ExtractedAttribute]) -> GraphResult<()>;

    /// Re-point DECORATED_BY edges. Decorator nodes are shared by name.
    fn replace_decorators(&self, entity_id: i64, decorators: &[ExtractedDecorator]) -> GraphResult<()>;

    fn node_id(&self, kind: NodeKind, key: &str) -> GraphResult<Option<i64>>;

    fn get_node(&self, id: i64) -> GraphResult<Option<NodeRecord>>;
}

const SUBTREE: &str = "WITH RECURSIVE sub(id) AS ( \
         SELECT ?1 \
         UNION ALL \
         SELECT n.id FROM nodes n JOIN sub ON n.parent_id = sub.id \
     ) ";

/// Delete `root_id` and its `parent_id` descendants. Classes outside the
/// subtree that inherited from a deleted class are re-pointed at an
/// unresolved placeholder of the same name.
fn delete_subtree(conn: &Connection, root_id: i64) -> GraphResult<usize> {
    let orphaned: Vec<(i64, String)> = {
        let mut stmt = conn.prepare(&format!(
            "{SUBTREE}\
             SELECT e.source_id, t.name FROM edges e \
             JOIN nodes t ON t.id = e.target_id \
             WHERE e.relationship = 'INHERITS_FROM' AND t.kind = 'Class' \
               AND e.target_id IN (SELECT id FROM sub) \
               AND e.source_id NOT IN (SELECT id FROM sub);"
        ))?;
        let rows = stmt
            .query_map(params![root_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let removed = conn.execute(
        &format!("{SUBTREE}DELETE FROM nodes WHERE id IN (SELECT id FROM sub);"),
        params![root_id],
    )?;

    for (child_id, base) in &orphaned {
        let placeholder = upsert_placeholder(conn, base)?;
        insert_edge(conn, *child_id, placeholder, RelKind::InheritsFrom, None)?;
    }
    if !orphaned.is_empty() {
        debug!(root_id, bases = orphaned.len(), "subclasses re-pointed at placeholders");
    }
    Ok(removed)
}

fn lookup_id(conn: &Connection, kind: NodeKind, key: &str) -> GraphResult<Option<i64>> {
    optional_row(conn.query_row(
        "SELECT id FROM nodes WHERE kind = ?1 AND node_key = ?2;",
        params![kind, key],
        |row| row.get(0),
    ))
}

pub(crate) fn upsert_module_row(conn: &Connection, name: &str) -> GraphResult<i64> {
    let id = conn.query_row(
        "INSERT INTO nodes(kind, node_key, name, qualified_name) VALUES ('Module', ?1, ?2, ?1) \
         ON CONFLICT(kind, node_key) DO UPDATE SET name = excluded.name \
         RETURNING id;",
        params![name, name.rsplit('.').next().unwrap_or(name)],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Merge a node that is identified by its name alone.
pub(crate) fn upsert_named(conn: &Connection, kind: NodeKind, name: &str) -> GraphResult<i64> {
    let id = conn.query_row(
        "INSERT INTO nodes(kind, node_key, name) VALUES (?1, ?2, ?2) \
         ON CONFLICT(kind, node_key) DO UPDATE SET name = excluded.name \
         RETURNING id;",
        params![kind, name],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn calls_json(entity: &ExtractedEntity) -> GraphResult<Option<String>> {
    match entity.as_function() {
        Some(f) => Ok(Some(serde_json::to_string(&f.calls)?)),
        None => Ok(None),
    }
}

fn function_flags(entity: &ExtractedEntity) -> (bool, bool, bool, Option<&str>) {
    match &entity.details {
        EntityDetails::Function(f) => (
            f.is_async,
            f.is_method,
            f.is_nested,
            f.return_annotation.as_deref(),
        ),
        EntityDetails::Class(_) => (false, false, false, None),
    }
}

impl NodeOps for GraphStore {
    fn upsert_file(
        &self,
        path: &str,
        module_name: &str,
        content_hash: &str,
        parse_error: Option<&str>,
    ) -> GraphResult<i64> {
        self.with_conn(|conn| {
            let name = path.rsplit('/').next().unwrap_or(path);
            let file_id: i64 = conn.query_row(
                "INSERT INTO nodes(kind, node_key, name, file_path, module_name, content_hash, parse_error) \
                 VALUES ('File', ?1, ?2, ?1, ?3, ?4, ?5) \
                 ON CONFLICT(kind, node_key) DO UPDATE SET \
                     module_name = excluded.module_name, \
                     content_hash = excluded.content_hash, \
                     parse_error = excluded.parse_error, \
                     indexed_at = CURRENT_TIMESTAMP \
                 RETURNING id;",
                params![path, name, module_name, content_hash, parse_error],
                |row| row.get(0),
            )?;
            if !module_name.is_empty() {
                let module_id = upsert_module_row(conn, module_name)?;
                conn.execute(
                    "DELETE FROM edges WHERE source_id = ?1 AND relationship = 'DEFINES_MODULE' AND target_id <> ?2;",
                    params![file_id, module_id],
                )?;
                insert_edge(conn, file_id, module_id, RelKind::DefinesModule, None)?;
            }
            Ok(file_id)
        })
    }

    fn upsert_module(&self, name: &str) -> GraphResult<i64> {
        self.with_conn(|conn| upsert_module_row(conn, name))
    }

    fn insert_entity(
        &self,
        file_path: &str,
        module_name: &str,
        entity: &ExtractedEntity,
        parent_id: i64,
    ) -> GraphResult<i64> {
        let kind = entity.kind();
        let calls = calls_json(entity)?;
        let (is_async, is_method, is_nested, return_annotation) = function_flags(entity);
        self.with_conn(|conn| {
            let id: i64 = conn.query_row(
                "INSERT INTO nodes(kind, node_key, name, qualified_name, parent_id, file_path, \
                     module_name, source, content_hash, lineno_start, lineno_end, docstring, \
                     is_async, is_method, is_nested, is_unresolved, return_annotation, calls_json) \
                 VALUES (?1, ?2, ?3, ?2, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0, ?15, ?16) \
                 ON CONFLICT(kind, node_key) DO UPDATE SET \
                     name = excluded.name, parent_id = excluded.parent_id, \
                     file_path = excluded.file_path, module_name = excluded.module_name, \
                     source = excluded.source, content_hash = excluded.content_hash, \
                     lineno_start = excluded.lineno_start, lineno_end = excluded.lineno_end, \
                     docstring = excluded.docstring, is_async = excluded.is_async, \
                     is_method = excluded.is_method, is_nested = excluded.is_nested, \
                     is_unresolved = 0, return_annotation = excluded.return_annotation, \
                     calls_json = excluded.calls_json, indexed_at = CURRENT_TIMESTAMP \
                 RETURNING id;",
                params![
                    kind,
                    entity.qualified_name,
                    entity.name,
                    parent_id,
                    file_path,
                    module_name,
                    entity.source,
                    entity.content_hash,
                    entity.lineno_start as i64,
                    entity.lineno_end as i64,
                    entity.docstring,
                    is_async,
                    is_method,
                    is_nested,
                    return_annotation,
                    calls,
                ],
                |row| row.get(0),
            )?;
            conn.execute(
                "DELETE FROM edges WHERE target_id = ?1 AND relationship = 'CONTAINS' AND source_id <> ?2;",
                params![id, parent_id],
            )?;
            insert_edge(conn, parent_id, id, RelKind::Contains, None)?;
            Ok(id)
        })
    }

    fn update_entity(&self, entity: &ExtractedEntity) -> GraphResult<Option<i64>> {
        let calls = calls_json(entity)?;
        let (is_async, is_method, is_nested, return_annotation) = function_flags(entity);
        self.with_conn(|conn| {
            optional_row(conn.query_row(
                "UPDATE nodes SET \
                     source = ?3, content_hash = ?4, lineno_start = ?5, lineno_end = ?6, \
                     docstring = ?7, is_async = ?8, is_method = ?9, is_nested = ?10, \
                     return_annotation = ?11, calls_json = ?12, indexed_at = CURRENT_TIMESTAMP \
                 WHERE kind = ?1 AND node_key = ?2 \
                 RETURNING id;",
                params![
                    entity.kind(),
                    entity.qualified_name,
                    entity.source,
                    entity.content_hash,
                    entity.lineno_start as i64,
                    entity.lineno_end as i64,
                    entity.docstring,
                    is_async,
                    is_method,
                    is_nested,
                    return_annotation,
                    calls,
                ],
                |row| row.get(0),
            ))
        })
    }

    fn refresh_position(&self, entity: &ExtractedEntity) -> GraphResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE nodes SET lineno_start = ?3, lineno_end = ?4 \
                 WHERE kind = ?1 AND node_key = ?2 \
                   AND (lineno_start IS NOT ?3 OR lineno_end IS NOT ?4);",
                params![
                    entity.kind(),
                    entity.qualified_name,
                    entity.lineno_start as i64,
                    entity.lineno_end as i64,
                ],
            )?;
            Ok(())
        })
    }

    fn delete_entity(&self, kind: NodeKind, qualified_name: &str) -> GraphResult<usize> {
        self.with_conn(|conn| match lookup_id(conn, kind, qualified_name)? {
            Some(id) => delete_subtree(conn, id),
            None => Ok(0),
        })
    }

    fn delete_file(&self, path: &str) -> GraphResult<bool> {
        self.with_conn(|conn| {
            let Some(file_id) = lookup_id(conn, NodeKind::File, path)? else {
                return Ok(false);
            };
            let module_id: Option<i64> = optional_row(conn.query_row(
                "SELECT target_id FROM edges WHERE source_id = ?1 AND relationship = 'DEFINES_MODULE';",
                params![file_id],
                |row| row.get(0),
            ))?;
            let removed = delete_subtree(conn, file_id)?;

            // A module nobody defines any more keeps no outgoing imports.
            if let Some(module_id) = module_id {
                conn.execute(
                    "DELETE FROM edges WHERE source_id = ?1 AND relationship = 'IMPORTS' \
                       AND NOT EXISTS (SELECT 1 FROM edges d WHERE d.target_id = ?1 AND d.relationship = 'DEFINES_MODULE');",
                    params![module_id],
                )?;
            }
            debug!(path, removed, "deleted file subtree");
            Ok(true)
        })
    }

    fn replace_parameters(&self, function_id: i64, params: &[ExtractedParameter]) -> GraphResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM nodes WHERE parent_id = ?1 AND kind = 'Parameter';",
                params![function_id],
            )?;
            let mut stmt = conn.prepare_cached(
                "INSERT INTO nodes(kind, name, parent_id, type_annotation, default_value, position, param_kind) \
                 VALUES ('Parameter', ?1, ?2, ?3, ?4, ?5, ?6) RETURNING id;",
            )?;
            for p in params {
                let id: i64 = stmt.query_row(
                    params![
                        p.name,
                        function_id,
                        p.type_annotation,
                        p.default_value,
                        p.position as i64,
                        p.kind.as_str(),
                    ],
                    |row| row.get(0),
                )?;
                insert_edge(conn, function_id, id, RelKind::HasParameter, None)?;
            }
            Ok(())
        })
    }

    fn replace_attributes(&self, class_id: i64, attrs: &[ExtractedAttribute]) -> GraphResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM nodes WHERE parent_id = ?1 AND kind = 'ClassAttribute';",
                params![class_id],
            )?;
            let mut stmt = conn.prepare_cached(
                "INSERT INTO nodes(kind, name, parent_id, type_annotation, default_value, lineno_start) \
                 VALUES ('ClassAttribute', ?1, ?2, ?3, ?4, ?5) RETURNING id;",
            )?;
            for a in attrs {
                let id: i64 = stmt.query_row(
                    params![a.name, class_id, a.type_annotation, a.default_value, a.lineno as i64],
                    |row| row.get(0),
                )?;
                insert_edge(conn, class_id, id, RelKind::HasAttribute, None)?;
            }
            Ok(())
        })
    }

    fn replace_decorators(&self, entity_id: i64, decorators: &[ExtractedDecorator]) -> GraphResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM edges WHERE source_id = ?1 AND relationship = 'DECORATED_BY';",
                params![entity_id],
            )?;
            for d in decorators {
                let id: i64 = conn.query_row(
                    "INSERT INTO nodes(kind, node_key, name, arguments) VALUES ('Decorator', ?1, ?1, ?2) \
                     ON CONFLICT(kind, node_key) DO UPDATE SET name = excluded.name \
                     RETURNING id;",
                    params![d.name, d.arguments],
                    |row| row.get(0),
                )?;
                let props = serde_json::json!({ "arguments": d.arguments });
                insert_edge(conn, entity_id, id, RelKind::DecoratedBy, Some(&props))?;
            }
            Ok(())
        })
    }

    fn node_id(&self, kind: NodeKind, key: &str) -> GraphResult<Option<i64>> {
        self.with_conn(|conn| lookup_id(conn, kind, key))
    }

    fn get_node(&self, id: i64) -> GraphResult<Option<NodeRecord>> {
        self.with_conn(|conn| {
            optional_row(conn.query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.id = ?1;"),
                params![id],
                node_from_row,
            ))
        })
    }
}
