//! Read-side store operations: lookups, neighbourhoods, statistics, and the
//! set queries the resolution passes run on.

use std::collections::{BTreeMap, HashMap};

use rusqlite::{params, Connection, ToSql};
use serde::{Deserialize, Serialize};

use crate::errors::GraphResult;
use crate::models::{NodeKind, RelKind};
use crate::store::enrichment::blob_to_vector;
use crate::store::{node_from_row, Direction, EdgeRecord, GraphStore, NodeRecord, StoredEntity, NODE_COLUMNS};

/// Bound on how far up the containment chain a function's file is looked for.
pub const FILE_ANCESTOR_DEPTH: u32 = 3;

/// A Function as the call resolver sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionSite {
    pub id: i64,
    pub name: String,
    /// Owning File within [`FILE_ANCESTOR_DEPTH`] containment hops.
    pub file_id: Option<i64>,
    pub calls: Vec<String>,
}

/// One directly connected node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub node: NodeRecord,
    pub relationship: RelKind,
    pub direction: Direction,
    pub properties: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentCoverage {
    pub total: usize,
    pub enriched: usize,
    pub stale: usize,
    pub ratio: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorIndex {
    pub name: String,
    pub kind: NodeKind,
    pub dimensions: Option<i64>,
}

pub trait QueryOps {
    /// Stored Classes and Functions owned by one file.
    fn file_entities(&self, path: &str) -> GraphResult<Vec<StoredEntity>>;

    /// `path -> content hash` for every stored File.
    fn file_hashes(&self) -> GraphResult<HashMap<String, String>>;

    fn find_by_qualified_name(&self, qualified_name: &str, kinds: &[NodeKind]) -> GraphResult<Vec<NodeRecord>>;

    /// Exact simple-name match, Functions first, then Classes, then
    /// Modules, oldest first within a kind.
    fn find_by_name(
        &self,
        name: &str,
        kinds: &[NodeKind],
        case_insensitive: bool,
        limit: usize,
    ) -> GraphResult<Vec<NodeRecord>>;

    /// Case-insensitive substring match on name or qualified name.
    fn find_by_substring(&self, fragment: &str, kinds: &[NodeKind], limit: usize) -> GraphResult<Vec<NodeRecord>>;

    /// Direct neighbours along `rels` (all relationships when empty).
    fn neighbors(&self, id: i64, direction: Direction, rels: &[RelKind]) -> GraphResult<Vec<Neighbor>>;

    /// Every edge whose endpoints are both in `ids`.
    fn edges_among(&self, ids: &[i64]) -> GraphResult<Vec<EdgeRecord>>;

    fn node_counts(&self) -> GraphResult<BTreeMap<String, usize>>;

    fn edge_counts(&self) -> GraphResult<BTreeMap<String, usize>>;

    fn enrichment_coverage(&self) -> GraphResult<EnrichmentCoverage>;

    /// Real Functions/Classes with no incoming CONTAINS edge: the total and
    /// the first `limit` qualified names.
    fn orphan_nodes(&self, limit: usize) -> GraphResult<(usize, Vec<String>)>;

    fn all_function_sites(&self) -> GraphResult<Vec<FunctionSite>>;

    fn function_site(&self, id: i64) -> GraphResult<Option<FunctionSite>>;

    /// Candidate definitions for a bare call name.
    fn functions_named(&self, name: &str) -> GraphResult<Vec<FunctionSite>>;

    /// Files defining a module that `file_id`'s module imports, directly or
    /// as `from pkg import submodule`.
    fn imported_file_ids(&self, file_id: i64) -> GraphResult<Vec<i64>>;

    /// Functions holding a `unique_name` CALLS edge to a function called `name`.
    fn unique_name_callers(&self, name: &str) -> GraphResult<Vec<i64>>;

    fn vector_indexes(&self) -> GraphResult<Vec<VectorIndex>>;

    fn vector_entries(&self, kind: NodeKind) -> GraphResult<Vec<(NodeRecord, Vec<f32>)>>;
}

/// `AND n.kind IN (...)`, or nothing for an empty filter. Kinds are enum
/// variants, so splicing is safe.
/// Functions before Classes before Modules, then everything else.
const KIND_PRIORITY: &str = "CASE n.kind WHEN 'Function' THEN 0 WHEN 'Class' THEN 1 WHEN 'Module' THEN 2 ELSE 3 END";

fn kind_clause(kinds: &[NodeKind]) -> String {
    if kinds.is_empty() {
        return String::new();
    }
    let quoted: Vec<String> = kinds.iter().map(|k| format!("'{}'", k.as_str())).collect();
    format!(" AND n.kind IN ({})", quoted.join(", "))
}

fn collect_nodes(conn: &Connection, sql: &str, args: &[&dyn ToSql]) -> GraphResult<Vec<NodeRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, node_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn collect_ids(conn: &Connection, sql: &str, args: &[&dyn ToSql]) -> GraphResult<Vec<i64>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map(args, |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Function sites for the seed set selected by `seed_filter` (a constant
/// WHERE fragment over `nodes`).
fn function_sites(conn: &Connection, seed_filter: &str, args: &[&dyn ToSql]) -> GraphResult<Vec<FunctionSite>> {
    let sql = format!(
        "WITH RECURSIVE up(fn_id, node_id, depth) AS ( \
             SELECT id, id, 0 FROM nodes WHERE kind = 'Function' AND is_unresolved = 0 AND ({seed_filter}) \
             UNION ALL \
             SELECT up.fn_id, e.source_id, up.depth + 1 FROM up \
             JOIN edges e ON e.target_id = up.node_id AND e.relationship = 'CONTAINS' \
             WHERE up.depth < {FILE_ANCESTOR_DEPTH} \
         ) \
         SELECT f.id, f.name, f.calls_json, MIN(CASE WHEN a.kind = 'File' THEN a.id END) \
         FROM up JOIN nodes f ON f.id = up.fn_id JOIN nodes a ON a.id = up.node_id \
         GROUP BY f.id ORDER BY f.id;"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(args, |row| {
            let calls: Option<String> = row.get(2)?;
            Ok(FunctionSite {
                id: row.get(0)?,
                name: row.get(1)?,
                calls: calls
                    .and_then(|c| serde_json::from_str(&c).ok())
                    .unwrap_or_default(),
                file_id: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn grouped_counts(conn: &Connection, sql: &str) -> GraphResult<BTreeMap<String, usize>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows.into_iter().map(|(k, n)| (k, n as usize)).collect())
}

impl QueryOps for GraphStore {
    fn file_entities(&self, path: &str) -> GraphResult<Vec<StoredEntity>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT kind, qualified_name, COALESCE(content_hash, '') FROM nodes \
                 WHERE file_path = ?1 AND kind IN ('Class', 'Function') AND is_unresolved = 0 \
                 ORDER BY id;",
            )?;
            let rows = stmt
                .query_map(params![path], |row| {
                    Ok(StoredEntity {
                        kind: row.get(0)?,
                        qualified_name: row.get(1)?,
                        content_hash: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn file_hashes(&self) -> GraphResult<HashMap<String, String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT node_key, COALESCE(content_hash, '') FROM nodes WHERE kind = 'File';",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<HashMap<_, _>>>()?;
            Ok(rows)
        })
    }

    fn find_by_qualified_name(&self, qualified_name: &str, kinds: &[NodeKind]) -> GraphResult<Vec<NodeRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NODE_COLUMNS} FROM nodes n WHERE n.qualified_name = ?1{} ORDER BY {KIND_PRIORITY}, n.id;",
                kind_clause(kinds)
            );
            collect_nodes(conn, &sql, &[&qualified_name])
        })
    }

    fn find_by_name(
        &self,
        name: &str,
        kinds: &[NodeKind],
        case_insensitive: bool,
        limit: usize,
    ) -> GraphResult<Vec<NodeRecord>> {
        self.with_conn(|conn| {
            let collate = if case_insensitive { " COLLATE NOCASE" } else { "" };
            let sql = format!(
                "SELECT {NODE_COLUMNS} FROM nodes n \
                 WHERE n.name = ?1{collate} AND n.is_unresolved = 0{} \
                 ORDER BY {KIND_PRIORITY}, n.id LIMIT ?2;",
                kind_clause(kinds)
            );
            collect_nodes(conn, &sql, &[&name, &(limit as i64)])
        })
    }

    fn find_by_substring(&self, fragment: &str, kinds: &[NodeKind], limit: usize) -> GraphResult<Vec<NodeRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NODE_COLUMNS} FROM nodes n \
                 WHERE n.is_unresolved = 0 \
                   AND (instr(lower(n.name), lower(?1)) > 0 \
                        OR instr(lower(COALESCE(n.qualified_name, '')), lower(?1)) > 0){} \
                 ORDER BY length(n.name), n.qualified_name LIMIT ?2;",
                kind_clause(kinds)
            );
            collect_nodes(conn, &sql, &[&fragment, &(limit as i64)])
        })
    }

    fn neighbors(&self, id: i64, direction: Direction, rels: &[RelKind]) -> GraphResult<Vec<Neighbor>> {
        let (near, far) = match direction {
            Direction::Outgoing => ("source_id", "target_id"),
            Direction::Incoming => ("target_id", "source_id"),
        };
        let rel_filter = if rels.is_empty() {
            String::new()
        } else {
            format!(" AND e.relationship IN {}", RelKind::sql_in_list(rels))
        };
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NODE_COLUMNS}, e.relationship, e.properties \
                 FROM edges e JOIN nodes n ON n.id = e.{far} \
                 WHERE e.{near} = ?1{rel_filter} ORDER BY e.id;"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params![id], |row| {
                    let props: Option<String> = row.get(16)?;
                    Ok(Neighbor {
                        node: node_from_row(row)?,
                        relationship: row.get(15)?,
                        direction,
                        properties: props.and_then(|p| serde_json::from_str(&p).ok()),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn edges_among(&self, ids: &[i64]) -> GraphResult<Vec<EdgeRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list: Vec<String> = ids.iter().map(i64::to_string).collect();
        let list = list.join(", ");
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT source_id, target_id, relationship, properties FROM edges \
                 WHERE source_id IN ({list}) AND target_id IN ({list}) ORDER BY id;"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| {
                    let props: Option<String> = row.get(3)?;
                    Ok(EdgeRecord {
                        source_id: row.get(0)?,
                        target_id: row.get(1)?,
                        relationship: row.get(2)?,
                        properties: props.and_then(|p| serde_json::from_str(&p).ok()),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn node_counts(&self) -> GraphResult<BTreeMap<String, usize>> {
        self.with_conn(|conn| grouped_counts(conn, "SELECT kind, COUNT(*) FROM nodes GROUP BY kind;"))
    }

    fn edge_counts(&self) -> GraphResult<BTreeMap<String, usize>> {
        self.with_conn(|conn| {
            grouped_counts(conn, "SELECT relationship, COUNT(*) FROM edges GROUP BY relationship;")
        })
    }

    fn enrichment_coverage(&self) -> GraphResult<EnrichmentCoverage> {
        self.with_conn(|conn| {
            let (total, enriched, stale): (i64, i64, i64) = conn.query_row(
                "SELECT COUNT(*), \
                        COALESCE(SUM(enrichment_hash IS NOT NULL AND enrichment_hash = content_hash), 0), \
                        COALESCE(SUM(enrichment_hash IS NULL OR enrichment_hash <> content_hash), 0) \
                 FROM nodes \
                 WHERE kind IN ('Function', 'Class') AND is_unresolved = 0 AND content_hash IS NOT NULL;",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let ratio = if total == 0 {
                0.0
            } else {
                (enriched as f64 / total as f64 * 1000.0).round() / 1000.0
            };
            Ok(EnrichmentCoverage {
                total: total as usize,
                enriched: enriched as usize,
                stale: stale as usize,
                ratio,
            })
        })
    }

    fn orphan_nodes(&self, limit: usize) -> GraphResult<(usize, Vec<String>)> {
        self.with_conn(|conn| {
            const ORPHANS: &str = "FROM nodes n \
                 WHERE n.kind IN ('Function', 'Class') AND n.is_unresolved = 0 \
                   AND NOT EXISTS (SELECT 1 FROM edges e WHERE e.target_id = n.id AND e.relationship = 'CONTAINS')";
            let total: i64 = conn.query_row(&format!("SELECT COUNT(*) {ORPHANS};"), [], |row| row.get(0))?;
            let mut stmt = conn.prepare(&format!(
                "SELECT COALESCE(n.qualified_name, n.name) {ORPHANS} ORDER BY n.id LIMIT ?1;"
            ))?;
            let names = stmt
                .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((total as usize, names))
        })
    }

    fn all_function_sites(&self) -> GraphResult<Vec<FunctionSite>> {
        self.with_conn(|conn| function_sites(conn, "1 = 1", &[]))
    }

    fn function_site(&self, id: i64) -> GraphResult<Option<FunctionSite>> {
        self.with_conn(|conn| Ok(function_sites(conn, "id = ?1", &[&id])?.into_iter().next()))
    }

    fn functions_named(&self, name: &str) -> GraphResult<Vec<FunctionSite>> {
        self.with_conn(|conn| function_sites(conn, "name = ?1", &[&name]))
    }

    fn imported_file_ids(&self, file_id: i64) -> GraphResult<Vec<i64>> {
        self.with_conn(|conn| {
            collect_ids(
                conn,
                "SELECT dm.source_id \
                 FROM edges own \
                 JOIN edges imp ON imp.source_id = own.target_id AND imp.relationship = 'IMPORTS' \
                 JOIN edges dm ON dm.target_id = imp.target_id AND dm.relationship = 'DEFINES_MODULE' \
                 WHERE own.source_id = ?1 AND own.relationship = 'DEFINES_MODULE' \
                 UNION \
                 SELECT dm.source_id \
                 FROM edges own \
                 JOIN edges imp ON imp.source_id = own.target_id AND imp.relationship = 'IMPORTS' \
                 JOIN nodes tm ON tm.id = imp.target_id \
                 JOIN json_each(imp.properties, '$.names') j \
                 JOIN nodes sub ON sub.kind = 'Module' AND sub.node_key = tm.node_key || '.' || j.value \
                 JOIN edges dm ON dm.target_id = sub.id AND dm.relationship = 'DEFINES_MODULE' \
                 WHERE own.source_id = ?1 AND own.relationship = 'DEFINES_MODULE';",
                &[&file_id],
            )
        })
    }

    fn unique_name_callers(&self, name: &str) -> GraphResult<Vec<i64>> {
        self.with_conn(|conn| {
            collect_ids(
                conn,
                "SELECT DISTINCT e.source_id FROM edges e JOIN nodes t ON t.id = e.target_id \
                 WHERE e.relationship = 'CALLS' AND t.name = ?1 \
                   AND json_extract(e.properties, '$.resolution') = 'unique_name' \
                 ORDER BY e.source_id;",
                &[&name],
            )
        })
    }

    fn vector_indexes(&self) -> GraphResult<Vec<VectorIndex>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name, kind, dimensions FROM vector_indexes ORDER BY name;")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(VectorIndex {
                        name: row.get(0)?,
                        kind: row.get(1)?,
                        dimensions: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn vector_entries(&self, kind: NodeKind) -> GraphResult<Vec<(NodeRecord, Vec<f32>)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NODE_COLUMNS}, v.vector FROM embeddings v JOIN nodes n ON n.id = v.node_id \
                 WHERE v.kind = ?1 ORDER BY n.id;"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params![kind], |row| {
                    let blob: Vec<u8> = row.get(15)?;
                    Ok((node_from_row(row)?, blob_to_vector(&blob)))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extractor::extract_file;
    use crate::store::{EdgeOps, NodeOps};

    fn ingest(store: &GraphStore, path: &str, module: &str, src: &str) -> i64 {
        let x = extract_file(path, src);
        let file_id = store.upsert_file(path, module, &x.file_hash, None).unwrap();
        let mut ids = vec![0i64; x.entities.len()];
        for (i, e) in x.entities.iter().enumerate() {
            let parent = e.parent.map(|p| ids[p]).unwrap_or(file_id);
            ids[i] = store.insert_entity(path, module, e, parent).unwrap();
        }
        store.replace_module_imports(module, &x.imports).unwrap();
        file_id
    }

    #[test]
    fn test_function_sites_find_file_within_depth() {
        let store = GraphStore::open_in_memory().unwrap();
        let file_id = ingest(
            &store,
            "a.py",
            "a",
            "class A:\n    def m(self):\n        def n():\n            def o():\n                go()\n",
        );
        let sites = store.all_function_sites().unwrap();
        let by_name: HashMap<&str, &FunctionSite> = sites.iter().map(|s| (s.name.as_str(), s)).collect();
        assert_eq!(by_name["m"].file_id, Some(file_id));
        assert_eq!(by_name["n"].file_id, Some(file_id));
        // Four containment hops away.
        assert_eq!(by_name["o"].file_id, None);
        assert_eq!(by_name["o"].calls, vec!["go"]);
    }

    #[test]
    fn test_imported_file_ids_follow_module_and_submodule_imports() {
        let store = GraphStore::open_in_memory().unwrap();
        let util = ingest(&store, "pkg/util.py", "pkg.util", "def helper():\n    pass\n");
        let models = ingest(&store, "pkg/models.py", "pkg.models", "class M:\n    pass\n");
        let app = ingest(
            &store,
            "app.py",
            "app",
            "from pkg.util import helper\nfrom pkg import models\n",
        );
        let mut ids = store.imported_file_ids(app).unwrap();
        ids.sort();
        let mut expected = vec![util, models];
        expected.sort();
        assert_eq!(ids, expected);
        assert!(store.imported_file_ids(util).unwrap().is_empty());
    }

    #[test]
    fn test_lookup_variants() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest(&store, "a.py", "a", "def LoadUser():\n    pass\ndef load_users():\n    pass\n");
        let exact = store.find_by_qualified_name("a.LoadUser", &[NodeKind::Function]).unwrap();
        assert_eq!(exact.len(), 1);
        assert!(store.find_by_name("loaduser", &[], false, 10).unwrap().is_empty());
        assert_eq!(store.find_by_name("loaduser", &[], true, 10).unwrap().len(), 1);
        let fuzzy = store.find_by_substring("LOAD", &[NodeKind::Function], 10).unwrap();
        assert_eq!(fuzzy.len(), 2);
        assert!(store.find_by_substring("load", &[NodeKind::Class], 10).unwrap().is_empty());
        ingest(&store, "b.py", "b", "class loaduser:\n    pass\n");
        let ranked = store.find_by_name("LOADUSER", &[], true, 10).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].kind, NodeKind::Function);
        assert_eq!(ranked[1].kind, NodeKind::Class);
    }

    #[test]
    fn test_neighbors_and_induced_edges() {
        let store = GraphStore::open_in_memory().unwrap();
        let file_id = ingest(&store, "a.py", "a", "class A:\n    def m(self):\n        pass\n");
        let class_id = store.node_id(NodeKind::Class, "a.A").unwrap().unwrap();
        let out = store.neighbors(file_id, Direction::Outgoing, &[RelKind::Contains]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].node.id, class_id);
        let inc = store.neighbors(class_id, Direction::Incoming, &[]).unwrap();
        assert_eq!(inc[0].node.id, file_id);
        assert_eq!(inc[0].relationship, RelKind::Contains);

        let m = store.node_id(NodeKind::Function, "a.A.m").unwrap().unwrap();
        let induced = store.edges_among(&[file_id, m]).unwrap();
        assert!(induced.is_empty());
        assert_eq!(store.edges_among(&[file_id, class_id, m]).unwrap().len(), 2);
    }

    #[test]
    fn test_statistics_and_orphans() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest(&store, "a.py", "a", "def f():\n    pass\n");
        store
            .with_conn(|c| {
                c.execute_batch(
                    "INSERT INTO nodes(kind, node_key, name, qualified_name, content_hash) \
                     VALUES ('Function', 'x.lost', 'lost', 'x.lost', 'h');",
                )?;
                Ok(())
            })
            .unwrap();
        let counts = store.node_counts().unwrap();
        assert_eq!(counts["Function"], 2);
        assert_eq!(counts["File"], 1);
        let (n, names) = store.orphan_nodes(20).unwrap();
        assert_eq!(n, 1);
        assert_eq!(names, vec!["x.lost"]);
        let coverage = store.enrichment_coverage().unwrap();
        assert_eq!(coverage.total, 2);
        assert_eq!(coverage.stale, 2);
        assert_eq!(coverage.ratio, 0.0);
    }

    #[test]
    fn test_unique_name_callers() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest(&store, "a.py", "a", "def f():\n    helper()\ndef g():\n    helper()\n");
        ingest(&store, "b.py", "b", "def helper():\n    pass\n");
        let f = store.node_id(NodeKind::Function, "a.f").unwrap().unwrap();
        let g = store.node_id(NodeKind::Function, "a.g").unwrap().unwrap();
        let h = store.node_id(NodeKind::Function, "b.helper").unwrap().unwrap();
        store
            .add_edge(f, h, RelKind::Calls, Some(&serde_json::json!({"resolution": "unique_name"})))
            .unwrap();
        store
            .add_edge(g, h, RelKind::Calls, Some(&serde_json::json!({"resolution": "import"})))
            .unwrap();
        assert_eq!(store.unique_name_callers("helper").unwrap(), vec![f]);
    }
}
