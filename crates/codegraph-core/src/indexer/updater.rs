//! Applies one file's fresh extraction to the store as a minimal set of
//! entity changes, so unchanged entities keep their ids and enrichment.

use tracing::debug;

use crate::errors::GraphResult;
use crate::indexer::diff::{diff_file, DiffCounts};
use crate::indexer::entities::{ExtractedEntity, FileExtraction};
use crate::models::NodeKind;
use crate::store::{EdgeOps, GraphStore, NodeOps, QueryOps};

/// Result of applying one file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileUpdate {
    pub path: String,
    pub counts: DiffCounts,
    /// Added or Modified Functions whose outgoing CALLS must be recomputed.
    pub functions_to_resolve: Vec<i64>,
    /// Simple names of newly added Functions.
    pub added_function_names: Vec<String>,
    pub parse_error: Option<String>,
}

/// Rebuild the positional children and outgoing structural edges of one
/// entity after it was created or its content changed.
fn rebuild_children(store: &GraphStore, id: i64, path: &str, entity: &ExtractedEntity) -> GraphResult<()> {
    store.replace_decorators(id, &entity.decorators)?;
    if let Some(f) = entity.as_function() {
        store.replace_parameters(id, &f.parameters)?;
    }
    if let Some(c) = entity.as_class() {
        store.replace_attributes(id, &c.attributes)?;
        store.link_base_classes(id, path, &c.bases)?;
    }
    Ok(())
}

/// Apply `extraction` to the store in one transaction.
///
/// Order within the transaction: File upsert, deletions, in-place updates of
/// Modified entities, inserts of Added entities (parents first), position
/// refresh of Unchanged ones, then the file's import edges are rebuilt.
/// A file that failed to parse only records its hash and error; its prior
/// entities stay as they were.
pub fn apply_file(store: &GraphStore, extraction: &FileExtraction) -> GraphResult<FileUpdate> {
    let path = extraction.file_path.as_str();
    let module = extraction.module_name.as_str();

    store.in_transaction(|| {
        let file_id = store.upsert_file(
            path,
            module,
            &extraction.file_hash,
            extraction.parse_error.as_deref(),
        )?;
        let mut update = FileUpdate {
            path: path.to_string(),
            parse_error: extraction.parse_error.clone(),
            ..FileUpdate::default()
        };
        if extraction.parse_error.is_some() {
            return Ok(update);
        }

        let stored = store.file_entities(path)?;
        let diff = diff_file(&stored, extraction);
        update.counts = diff.counts();

        for gone in &diff.deleted {
            store.delete_entity(gone.kind, &gone.qualified_name)?;
        }

        let mut ids: Vec<Option<i64>> = vec![None; extraction.entities.len()];

        for &idx in &diff.modified {
            let entity = &extraction.entities[idx];
            let id = match store.update_entity(entity)? {
                Some(id) => id,
                None => {
                    let parent = parent_id(store, extraction, &ids, idx, file_id)?;
                    store.insert_entity(path, module, entity, parent)?
                }
            };
            ids[idx] = Some(id);
            rebuild_children(store, id, path, entity)?;
            if entity.kind() == NodeKind::Function {
                update.functions_to_resolve.push(id);
            }
        }

        for &idx in &diff.added {
            let entity = &extraction.entities[idx];
            let parent = parent_id(store, extraction, &ids, idx, file_id)?;
            let id = store.insert_entity(path, module, entity, parent)?;
            ids[idx] = Some(id);
            rebuild_children(store, id, path, entity)?;
            if entity.kind() == NodeKind::Function {
                update.functions_to_resolve.push(id);
                update.added_function_names.push(entity.name.clone());
            }
        }

        for &idx in &diff.unchanged {
            store.refresh_position(&extraction.entities[idx])?;
        }

        store.replace_module_imports(module, &extraction.imports)?;

        if !diff.is_noop() {
            debug!(
                path,
                added = update.counts.added,
                modified = update.counts.modified,
                deleted = update.counts.deleted,
                "file applied"
            );
        }
        Ok(update)
    })
}

/// Store id of the entity (or File) that should contain `idx`.
fn parent_id(
    store: &GraphStore,
    extraction: &FileExtraction,
    ids: &[Option<i64>],
    idx: usize,
    file_id: i64,
) -> GraphResult<i64> {
    let Some(parent) = extraction.entities[idx].parent else {
        return Ok(file_id);
    };
    if let Some(id) = ids[parent] {
        return Ok(id);
    }
    let p = &extraction.entities[parent];
    match store.node_id(p.kind(), &p.qualified_name)? {
        Some(id) => Ok(id),
        None => Err(crate::errors::GraphError::Database(format!(
            "parent {} of {} is not stored",
            p.qualified_name, extraction.entities[idx].qualified_name
        ))),
    }
}
