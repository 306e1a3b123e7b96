//! Entity diff between a file's stored Classes/Functions and a fresh
//! extraction of it.
//!
//! Identity is the qualified name. The walk goes one containment level at a
//! time with an explicit stack: an entity whose hash is unchanged settles
//! its whole subtree as Unchanged, an Added or Deleted entity takes its
//! subtree with it, and only Modified entities open a deeper level.

use std::collections::HashMap;

use serde::Serialize;

use crate::indexer::entities::FileExtraction;
use crate::store::StoredEntity;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityDiff {
    /// Indices into the fresh extraction, ascending (parents first).
    pub added: Vec<usize>,
    pub modified: Vec<usize>,
    pub unchanged: Vec<usize>,
    /// Stored entities absent from the fresh extraction, parents first.
    pub deleted: Vec<StoredEntity>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiffCounts {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl EntityDiff {
    pub fn counts(&self) -> DiffCounts {
        DiffCounts {
            added: self.added.len(),
            modified: self.modified.len(),
            deleted: self.deleted.len(),
            unchanged: self.unchanged.len(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

impl std::ops::AddAssign for DiffCounts {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.modified += other.modified;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
    }
}

/// What the store would hold after applying `extraction` to an empty file.
pub fn snapshot_of(extraction: &FileExtraction) -> Vec<StoredEntity> {
    extraction
        .entities
        .iter()
        .map(|e| StoredEntity {
            kind: e.kind(),
            qualified_name: e.qualified_name.clone(),
            content_hash: e.content_hash.clone(),
        })
        .collect()
}

/// `qualified_name` is a direct child of `prefix`.
fn is_direct_child(prefix: &str, qualified_name: &str) -> bool {
    let rest = if prefix.is_empty() {
        Some(qualified_name)
    } else {
        qualified_name
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix('.'))
    };
    rest.is_some_and(|r| !r.is_empty() && !r.contains('.'))
}

fn stored_subtree<'a>(stored: &'a [StoredEntity], root: &'a StoredEntity) -> impl Iterator<Item = &'a StoredEntity> {
    let prefix = format!("{}.", root.qualified_name);
    std::iter::once(root).chain(
        stored
            .iter()
            .filter(move |s| s.qualified_name.starts_with(&prefix)),
    )
}

pub fn diff_file(stored: &[StoredEntity], fresh: &FileExtraction) -> EntityDiff {
    let mut diff = EntityDiff::default();
    // (qualified-name prefix of the level, fresh parent index)
    let mut stack: Vec<(String, Option<usize>)> = vec![(fresh.module_name.clone(), None)];

    while let Some((prefix, parent)) = stack.pop() {
        let old: HashMap<&str, &StoredEntity> = stored
            .iter()
            .filter(|s| is_direct_child(&prefix, &s.qualified_name))
            .map(|s| (s.qualified_name.as_str(), s))
            .collect();

        let mut seen = Vec::new();
        for idx in fresh.children_of(parent) {
            let entity = &fresh.entities[idx];
            match old.get(entity.qualified_name.as_str()) {
                None => diff.added.extend(fresh.subtree(idx)),
                Some(prev) if prev.kind != entity.kind() => {
                    diff.deleted.extend(stored_subtree(stored, prev).cloned());
                    diff.added.extend(fresh.subtree(idx));
                    seen.push(prev.qualified_name.as_str());
                }
                Some(prev) => {
                    seen.push(prev.qualified_name.as_str());
                    if prev.content_hash == entity.content_hash {
                        diff.unchanged.extend(fresh.subtree(idx));
                    } else {
                        diff.modified.push(idx);
                        stack.push((entity.qualified_name.clone(), Some(idx)));
                    }
                }
            }
        }

        let mut gone: Vec<&StoredEntity> = old
            .values()
            .filter(|s| !seen.contains(&s.qualified_name.as_str()))
            .copied()
            .collect();
        gone.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        for prev in gone {
            diff.deleted.extend(stored_subtree(stored, prev).cloned());
        }
    }

    diff.added.sort_unstable();
    diff.modified.sort_unstable();
    diff.unchanged.sort_unstable();
    diff
}
