//! Enrichment persistence: staleness, the content-hash cache, annotation
//! writes with their derived semantic edges, context gathering for oracle
//! prompts, and embedding vectors.

use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;

use crate::enrichment::model::{
    AttributeContext, Enrichment, ParameterContext, StructuralContext,
};
use crate::errors::GraphResult;
use crate::models::{NodeKind, RelKind};
use crate::store::database::optional_row;
use crate::store::edges::insert_edge;
use crate::store::nodes::upsert_named;
use crate::store::GraphStore;

/// A Class or Function whose annotation is missing or out of date.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaleEntity {
    pub id: i64,
    pub kind: NodeKind,
    pub name: String,
    pub qualified_name: String,
    pub content_hash: String,
    pub source: String,
    pub docstring: Option<String>,
    pub is_async: bool,
    pub calls: Vec<String>,
}

/// Everything needed to build (or skip) one embedding document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbeddingCandidate {
    pub id: i64,
    pub kind: NodeKind,
    pub name: String,
    pub qualified_name: String,
    pub purpose: Option<String>,
    pub summary: Option<String>,
    pub docstring: Option<String>,
    pub domain_concepts: Vec<String>,
    /// Fingerprint of the text behind the stored vector, if any.
    pub text_hash: Option<String>,
}

pub trait EnrichmentOps {
    fn stale_entities(&self, kind: NodeKind) -> GraphResult<Vec<StaleEntity>>;

    fn stale_enrichment_count(&self) -> GraphResult<usize>;

    fn cached_enrichment(&self, content_hash: &str) -> GraphResult<Option<Enrichment>>;

    /// Cache rows are immortal; a later write for the same hash replaces
    /// the payload.
    fn cache_enrichment(&self, content_hash: &str, enrichment: &Enrichment) -> GraphResult<()>;

    fn structural_context(&self, entity: &StaleEntity) -> GraphResult<StructuralContext>;

    /// Write annotation fields and mark them current for `content_hash`.
    fn set_enrichment(&self, node_id: i64, content_hash: &str, enrichment: &Enrichment) -> GraphResult<()>;

    fn delete_semantic_edges(&self, node_id: i64) -> GraphResult<usize>;

    fn create_semantic_edges(&self, node_id: i64, enrichment: &Enrichment) -> GraphResult<usize>;

    /// Delete old semantic edges, write the annotation, recreate edges; all
    /// in one transaction.
    fn apply_enrichment(&self, node_id: i64, content_hash: &str, enrichment: &Enrichment) -> GraphResult<()>;

    fn embedding_candidates(&self, kind: NodeKind) -> GraphResult<Vec<EmbeddingCandidate>>;

    fn store_embedding(&self, node_id: i64, kind: NodeKind, vector: &[f32], text_hash: &str) -> GraphResult<()>;
}

pub(crate) fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn json_list<T: DeserializeOwned>(raw: Option<String>) -> Vec<T> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn names(conn: &Connection, sql: &str, id: i64) -> GraphResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn ids_named(conn: &Connection, sql: &str, name: &str, exclude: i64) -> GraphResult<Vec<i64>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map(params![name, exclude], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl EnrichmentOps for GraphStore {
    fn stale_entities(&self, kind: NodeKind) -> GraphResult<Vec<StaleEntity>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, name, qualified_name, content_hash, COALESCE(source, ''), \
                        docstring, is_async, calls_json \
                 FROM nodes \
                 WHERE kind = ?1 AND is_unresolved = 0 AND content_hash IS NOT NULL \
                   AND (enrichment_hash IS NULL OR enrichment_hash <> content_hash) \
                 ORDER BY id;",
            )?;
            let rows = stmt
                .query_map(params![kind], |row| {
                    Ok(StaleEntity {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        name: row.get(2)?,
                        qualified_name: row.get(3)?,
                        content_hash: row.get(4)?,
                        source: row.get(5)?,
                        docstring: row.get(6)?,
                        is_async: row.get::<_, i64>(7)? != 0,
                        calls: json_list(row.get(8)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn stale_enrichment_count(&self) -> GraphResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM nodes \
                 WHERE kind IN ('Function', 'Class') AND is_unresolved = 0 AND content_hash IS NOT NULL \
                   AND (enrichment_hash IS NULL OR enrichment_hash <> content_hash);",
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    fn cached_enrichment(&self, content_hash: &str) -> GraphResult<Option<Enrichment>> {
        let raw: Option<String> = self.with_conn(|conn| {
            optional_row(conn.query_row(
                "SELECT enrichment_json FROM enrichment_cache WHERE content_hash = ?1;",
                params![content_hash],
                |row| row.get(0),
            ))
        })?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn cache_enrichment(&self, content_hash: &str, enrichment: &Enrichment) -> GraphResult<()> {
        let json = serde_json::to_string(enrichment)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO enrichment_cache(content_hash, enrichment_json) VALUES (?1, ?2) \
                 ON CONFLICT(content_hash) DO UPDATE SET \
                     enrichment_json = excluded.enrichment_json, cached_at = CURRENT_TIMESTAMP;",
                params![content_hash, json],
            )?;
            Ok(())
        })
    }

    fn structural_context(&self, entity: &StaleEntity) -> GraphResult<StructuralContext> {
        self.with_conn(|conn| {
            let mut ctx = StructuralContext {
                is_async: entity.is_async,
                docstring: entity.docstring.clone(),
                ..StructuralContext::default()
            };

            let mut stmt = conn.prepare_cached(
                "SELECT d.name, e.properties FROM edges e JOIN nodes d ON d.id = e.target_id \
                 WHERE e.source_id = ?1 AND e.relationship = 'DECORATED_BY' ORDER BY e.id;",
            )?;
            let decorators = stmt
                .query_map(params![entity.id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ctx.decorators = decorators
                .into_iter()
                .map(|(name, props)| {
                    let args = props
                        .and_then(|p| serde_json::from_str::<serde_json::Value>(&p).ok())
                        .and_then(|v| v.get("arguments").and_then(|a| a.as_str()).map(str::to_string));
                    match args {
                        Some(args) => format!("{name}({args})"),
                        None => name,
                    }
                })
                .collect();

            match entity.kind {
                NodeKind::Class => {
                    ctx.bases = names(
                        conn,
                        "SELECT b.name FROM edges e JOIN nodes b ON b.id = e.target_id \
                         WHERE e.source_id = ?1 AND e.relationship = 'INHERITS_FROM' ORDER BY e.id;",
                        entity.id,
                    )?;
                    ctx.methods = names(
                        conn,
                        "SELECT name FROM nodes WHERE parent_id = ?1 AND kind = 'Function' ORDER BY lineno_start;",
                        entity.id,
                    )?;
                    let mut stmt = conn.prepare_cached(
                        "SELECT name, type_annotation, default_value FROM nodes \
                         WHERE parent_id = ?1 AND kind = 'ClassAttribute' ORDER BY lineno_start, id;",
                    )?;
                    ctx.attributes = stmt
                        .query_map(params![entity.id], |row| {
                            Ok(AttributeContext {
                                name: row.get(0)?,
                                type_annotation: row.get(1)?,
                                default_value: row.get(2)?,
                            })
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                }
                _ => {
                    let mut stmt = conn.prepare_cached(
                        "SELECT name, type_annotation, default_value, COALESCE(param_kind, '') FROM nodes \
                         WHERE parent_id = ?1 AND kind = 'Parameter' ORDER BY position;",
                    )?;
                    ctx.parameters = stmt
                        .query_map(params![entity.id], |row| {
                            Ok(ParameterContext {
                                name: row.get(0)?,
                                type_annotation: row.get(1)?,
                                default_value: row.get(2)?,
                                kind: row.get(3)?,
                            })
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    ctx.nested_functions = names(
                        conn,
                        "SELECT name FROM nodes WHERE parent_id = ?1 AND kind = 'Function' ORDER BY lineno_start;",
                        entity.id,
                    )?;

                    let parent: Option<(NodeKind, Option<String>)> = optional_row(conn.query_row(
                        "SELECT p.kind, p.qualified_name FROM nodes n JOIN nodes p ON p.id = n.parent_id \
                         WHERE n.id = ?1;",
                        params![entity.id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    ))?;
                    match parent {
                        Some((NodeKind::Class, qname)) => ctx.parent_class = qname,
                        Some((NodeKind::Function, qname)) => ctx.parent_function = qname,
                        _ => {}
                    }

                    ctx.callers = names(
                        conn,
                        "SELECT c.name FROM edges e JOIN nodes c ON c.id = e.source_id \
                         WHERE e.target_id = ?1 AND e.relationship = 'CALLS' ORDER BY c.name LIMIT 10;",
                        entity.id,
                    )?;
                    let callees = names(
                        conn,
                        "SELECT c.name FROM edges e JOIN nodes c ON c.id = e.target_id \
                         WHERE e.source_id = ?1 AND e.relationship = 'CALLS' ORDER BY c.name LIMIT 10;",
                        entity.id,
                    )?;
                    ctx.calls = if callees.is_empty() {
                        entity.calls.clone()
                    } else {
                        callees
                    };
                }
            }
            Ok(ctx)
        })
    }

    fn set_enrichment(&self, node_id: i64, content_hash: &str, enrichment: &Enrichment) -> GraphResult<()> {
        let patterns = serde_json::to_string(&enrichment.design_patterns)?;
        let concepts = serde_json::to_string(&enrichment.domain_concepts)?;
        let side_effects = serde_json::to_string(&enrichment.side_effects)?;
        let params_explained = serde_json::to_string(&enrichment.parameters_explained)?;
        let key_methods = serde_json::to_string(&enrichment.key_methods)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE nodes SET \
                     purpose = ?2, summary = ?3, complexity = ?4, role = ?5, \
                     design_patterns_json = ?6, domain_concepts_json = ?7, side_effects_json = ?8, \
                     parameters_explained_json = ?9, key_methods_json = ?10, \
                     enrichment_hash = ?11, enriched_at = CURRENT_TIMESTAMP \
                 WHERE id = ?1;",
                params![
                    node_id,
                    enrichment.purpose,
                    enrichment.summary,
                    enrichment.complexity,
                    enrichment.role,
                    patterns,
                    concepts,
                    side_effects,
                    params_explained,
                    key_methods,
                    content_hash,
                ],
            )?;
            Ok(())
        })
    }

    fn delete_semantic_edges(&self, node_id: i64) -> GraphResult<usize> {
        self.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM edges WHERE source_id = ?1 AND relationship IN {};",
                RelKind::sql_in_list(&RelKind::SEMANTIC)
            );
            Ok(conn.execute(&sql, params![node_id])?)
        })
    }

    fn create_semantic_edges(&self, node_id: i64, enrichment: &Enrichment) -> GraphResult<usize> {
        self.with_conn(|conn| {
            let mut created = 0;
            for pattern in &enrichment.design_patterns {
                let target = upsert_named(conn, NodeKind::DesignPattern, pattern)?;
                insert_edge(conn, node_id, target, RelKind::ImplementsPattern, None)?;
                created += 1;
            }
            for concept in &enrichment.domain_concepts {
                let target = upsert_named(conn, NodeKind::DomainConcept, concept)?;
                insert_edge(conn, node_id, target, RelKind::RelatesToConcept, None)?;
                created += 1;
            }
            for collaborator in &enrichment.collaborators {
                for target in ids_named(
                    conn,
                    "SELECT id FROM nodes WHERE kind = 'Class' AND is_unresolved = 0 AND name = ?1 AND id <> ?2;",
                    collaborator,
                    node_id,
                )? {
                    insert_edge(conn, node_id, target, RelKind::CollaboratesWith, None)?;
                    created += 1;
                }
            }
            for flow in &enrichment.data_flows_to {
                for target in ids_named(
                    conn,
                    "SELECT id FROM nodes WHERE kind IN ('Function', 'Class') AND is_unresolved = 0 \
                       AND name = ?1 AND id <> ?2;",
                    flow,
                    node_id,
                )? {
                    insert_edge(conn, node_id, target, RelKind::DataFlowsTo, None)?;
                    created += 1;
                }
            }
            Ok(created)
        })
    }

    fn apply_enrichment(&self, node_id: i64, content_hash: &str, enrichment: &Enrichment) -> GraphResult<()> {
        self.in_transaction(|| {
            self.delete_semantic_edges(node_id)?;
            self.set_enrichment(node_id, content_hash, enrichment)?;
            self.create_semantic_edges(node_id, enrichment)?;
            Ok(())
        })
    }

    fn embedding_candidates(&self, kind: NodeKind) -> GraphResult<Vec<EmbeddingCandidate>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.id, n.kind, n.name, COALESCE(n.qualified_name, n.name), n.purpose, n.summary, \
                        n.docstring, n.domain_concepts_json, e.text_hash \
                 FROM nodes n LEFT JOIN embeddings e ON e.node_id = n.id \
                 WHERE n.kind = ?1 AND n.is_unresolved = 0 \
                 ORDER BY n.id;",
            )?;
            let rows = stmt
                .query_map(params![kind], |row| {
                    Ok(EmbeddingCandidate {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        name: row.get(2)?,
                        qualified_name: row.get(3)?,
                        purpose: row.get(4)?,
                        summary: row.get(5)?,
                        docstring: row.get(6)?,
                        domain_concepts: json_list(row.get(7)?),
                        text_hash: row.get(8)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn store_embedding(&self, node_id: i64, kind: NodeKind, vector: &[f32], text_hash: &str) -> GraphResult<()> {
        let blob = vector_to_blob(vector);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO embeddings(node_id, kind, dimensions, vector, text_hash) VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(node_id) DO UPDATE SET \
                     kind = excluded.kind, dimensions = excluded.dimensions, vector = excluded.vector, \
                     text_hash = excluded.text_hash, embedded_at = CURRENT_TIMESTAMP;",
                params![node_id, kind, vector.len() as i64, blob, text_hash],
            )?;
            conn.execute(
                "UPDATE vector_indexes SET dimensions = ?2 WHERE kind = ?1 AND dimensions IS NULL;",
                params![kind, vector.len() as i64],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extractor::extract_file;
    use crate::store::{EdgeOps, NodeOps};

    const SRC: &str = "\
class Repo(Base):
    name: str = 'r'

    @cached(ttl=5)
    def save(self, item: int, force=False):
        def inner():
            pass
        return item

def helper():
    pass
";

    fn seeded() -> (GraphStore, i64, i64) {
        let store = GraphStore::open_in_memory().unwrap();
        let x = extract_file("repo.py", SRC);
        let file_id = store.upsert_file("repo.py", "repo", &x.file_hash, None).unwrap();
        let mut ids = vec![0i64; x.entities.len()];
        for (i, e) in x.entities.iter().enumerate() {
            let parent = e.parent.map(|p| ids[p]).unwrap_or(file_id);
            let id = store.insert_entity("repo.py", "repo", e, parent).unwrap();
            ids[i] = id;
            store.replace_decorators(id, &e.decorators).unwrap();
            if let Some(f) = e.as_function() {
                store.replace_parameters(id, &f.parameters).unwrap();
            }
            if let Some(c) = e.as_class() {
                store.replace_attributes(id, &c.attributes).unwrap();
                store.link_base_classes(id, "repo.py", &c.bases).unwrap();
            }
        }
        let class_id = store.node_id(NodeKind::Class, "repo.Repo").unwrap().unwrap();
        let save_id = store.node_id(NodeKind::Function, "repo.Repo.save").unwrap().unwrap();
        (store, class_id, save_id)
    }

    fn count(store: &GraphStore, sql: &str) -> i64 {
        store.with_conn(|c| Ok(c.query_row(sql, [], |r| r.get(0))?)).unwrap()
    }

    #[test]
    fn test_stale_until_enriched_for_current_hash() {
        let (store, _, save_id) = seeded();
        let stale = store.stale_entities(NodeKind::Function).unwrap();
        assert_eq!(stale.len(), 3);
        assert_eq!(store.stale_enrichment_count().unwrap(), 4);

        let save = stale.iter().find(|s| s.id == save_id).unwrap();
        store
            .apply_enrichment(save_id, &save.content_hash, &Enrichment::fallback(NodeKind::Function, None))
            .unwrap();
        assert_eq!(store.stale_entities(NodeKind::Function).unwrap().len(), 2);

        // An annotation recorded against an older hash is stale again.
        store.apply_enrichment(save_id, "old", &Enrichment::default()).unwrap();
        assert_eq!(store.stale_entities(NodeKind::Function).unwrap().len(), 3);
    }

    #[test]
    fn test_cache_round_trip() {
        let (store, _, _) = seeded();
        assert!(store.cached_enrichment("abc").unwrap().is_none());
        let e = Enrichment {
            purpose: "Saves.".into(),
            design_patterns: vec!["repository".into()],
            ..Enrichment::default()
        };
        store.cache_enrichment("abc", &e).unwrap();
        assert_eq!(store.cached_enrichment("abc").unwrap(), Some(e));
    }

    #[test]
    fn test_reapplying_replaces_semantic_edges() {
        let (store, class_id, save_id) = seeded();
        let first = Enrichment {
            design_patterns: vec!["factory".into()],
            domain_concepts: vec!["persistence".into()],
            data_flows_to: vec!["helper".into(), "missing".into()],
            ..Enrichment::default()
        };
        store.apply_enrichment(save_id, "h", &first).unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM edges WHERE relationship IN ('IMPLEMENTS_PATTERN','RELATES_TO_CONCEPT','DATA_FLOWS_TO')"), 3);

        let second = Enrichment {
            design_patterns: vec!["strategy".into()],
            ..Enrichment::default()
        };
        store.apply_enrichment(save_id, "h", &second).unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM edges WHERE relationship IN ('IMPLEMENTS_PATTERN','RELATES_TO_CONCEPT','DATA_FLOWS_TO')"), 1);

        // Collaborators never point back at the class itself.
        let self_ref = Enrichment {
            collaborators: vec!["Repo".into()],
            ..Enrichment::default()
        };
        assert_eq!(store.create_semantic_edges(class_id, &self_ref).unwrap(), 0);
    }

    #[test]
    fn test_structural_context_for_method_and_class() {
        let (store, class_id, save_id) = seeded();
        let stale = store.stale_entities(NodeKind::Function).unwrap();
        let save = stale.into_iter().find(|s| s.id == save_id).unwrap();
        let ctx = store.structural_context(&save).unwrap();
        assert_eq!(ctx.decorators, vec!["cached(ttl=5)"]);
        let params: Vec<&str> = ctx.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(params, vec!["item", "force"]);
        assert_eq!(ctx.parameters[0].type_annotation.as_deref(), Some("int"));
        assert_eq!(ctx.parent_class.as_deref(), Some("repo.Repo"));
        assert_eq!(ctx.nested_functions, vec!["inner"]);

        let class = store
            .stale_entities(NodeKind::Class)
            .unwrap()
            .into_iter()
            .find(|s| s.id == class_id)
            .unwrap();
        let ctx = store.structural_context(&class).unwrap();
        assert_eq!(ctx.bases, vec!["Base"]);
        assert_eq!(ctx.methods, vec!["save"]);
        assert_eq!(ctx.attributes[0].name, "name");
    }

    #[test]
    fn test_store_embedding_upserts_and_skips_placeholders() {
        let (store, class_id, _) = seeded();
        store.store_embedding(class_id, NodeKind::Class, &[0.5, -1.0], "t1").unwrap();
        store.store_embedding(class_id, NodeKind::Class, &[1.0, 0.0], "t2").unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM embeddings"), 1);

        let candidates = store.embedding_candidates(NodeKind::Class).unwrap();
        // The `Base` placeholder is not embeddable.
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text_hash.as_deref(), Some("t2"));

        let blob: Vec<u8> = store
            .with_conn(|c| Ok(c.query_row("SELECT vector FROM embeddings", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(blob_to_vector(&blob), vec![1.0, 0.0]);
    }
}
