//! Nearest-neighbour search over stored embeddings.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{GraphError, GraphResult};
use crate::models::NodeKind;
use crate::query::{EntitySummary, QueryEngine};
use crate::store::QueryOps;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub entity: EntitySummary,
    pub index: String,
    /// Cosine similarity, rounded to 4 decimals.
    pub score: f64,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn round4(x: f32) -> f64 {
    (f64::from(x) * 10_000.0).round() / 10_000.0
}

impl QueryEngine {
    /// Embed `probe`, search each kind's index on its own, then merge,
    /// re-sort and de-duplicate by qualified name. Empty `kinds` searches
    /// every index.
    pub fn vector_search(
        &self,
        probe: &str,
        kinds: &[NodeKind],
        top_k: usize,
        include_source: bool,
    ) -> GraphResult<Vec<VectorHit>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| GraphError::Embedding("no embedding service configured".into()))?;
        let query = embedder.embed(probe)?;
        let top_k = top_k.max(1);

        let mut merged: Vec<VectorHit> = Vec::new();
        for index in self.store.vector_indexes()? {
            if !kinds.is_empty() && !kinds.contains(&index.kind) {
                continue;
            }
            let mut scored: Vec<(f32, VectorHit)> = self
                .store
                .vector_entries(index.kind)?
                .into_iter()
                .map(|(node, vector)| {
                    let score = cosine_similarity(&query, &vector);
                    let hit = VectorHit {
                        entity: EntitySummary::from_node(&node, include_source),
                        index: index.name.clone(),
                        score: round4(score),
                    };
                    (score, hit)
                })
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            debug!(index = %index.name, candidates = scored.len(), "vector index searched");
            merged.extend(scored.into_iter().take(top_k).map(|(_, hit)| hit));
        }

        merged.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut seen = HashSet::new();
        merged.retain(|hit| seen.insert(hit.entity.qualified_name.clone()));
        merged.truncate(top_k);
        Ok(merged)
    }
}
