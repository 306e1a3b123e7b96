//! Vector embeddings for Functions and Classes.

pub mod openai;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{GraphError, GraphResult};
use crate::indexer::filesystem::short_sha256;
use crate::store::enrichment::EmbeddingCandidate;
use crate::store::{EnrichmentOps, GraphStore, QueryOps};

const MAX_DOCSTRING_CHARS: usize = 500;

/// External service turning documents into fixed-dimension vectors.
pub trait EmbeddingService: Send + Sync {
    /// One vector per input text, in order.
    fn embed_batch(&self, texts: &[String]) -> GraphResult<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> GraphResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::Embedding("empty embedding response".into()))
    }
}

/// Document embedded for one entity.
pub fn embedding_text(candidate: &EmbeddingCandidate) -> String {
    let mut lines = vec![format!("{}: {}", candidate.kind, candidate.name)];
    if let Some(p) = candidate.purpose.as_deref().filter(|p| !p.is_empty()) {
        lines.push(format!("Purpose: {p}"));
    }
    if let Some(s) = candidate.summary.as_deref().filter(|s| !s.is_empty()) {
        lines.push(format!("Summary: {s}"));
    }
    if let Some(d) = candidate.docstring.as_deref().filter(|d| !d.is_empty()) {
        let clipped: String = d.chars().take(MAX_DOCSTRING_CHARS).collect();
        lines.push(format!("Docstring: {clipped}"));
    }
    if !candidate.domain_concepts.is_empty() {
        lines.push(format!("Concepts: {}", candidate.domain_concepts.join(", ")));
    }
    lines.join("\n")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingStats {
    pub candidates: usize,
    pub embedded: usize,
    /// Text unchanged since the stored vector was made.
    pub skipped: usize,
    pub failed_batches: usize,
}

/// Embed every entity of every registered vector index whose text changed.
pub fn embed_all(store: &GraphStore, service: &dyn EmbeddingService, batch_size: usize) -> GraphResult<EmbeddingStats> {
    let mut stats = EmbeddingStats::default();
    for index in store.vector_indexes()? {
        let mut todo: Vec<(i64, String, String)> = Vec::new();
        for candidate in store.embedding_candidates(index.kind)? {
            stats.candidates += 1;
            let text = embedding_text(&candidate);
            let hash = short_sha256(&text);
            if candidate.text_hash.as_deref() == Some(hash.as_str()) {
                stats.skipped += 1;
            } else {
                todo.push((candidate.id, text, hash));
            }
        }

        for batch in todo.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|(_, t, _)| t.clone()).collect();
            let vectors = match service.embed_batch(&texts) {
                Ok(v) if v.len() == texts.len() => v,
                Ok(v) => {
                    warn!(index = %index.name, expected = texts.len(), got = v.len(), "embedding batch size mismatch");
                    stats.failed_batches += 1;
                    continue;
                }
                Err(e) => {
                    warn!(index = %index.name, error = %e, "embedding batch failed");
                    stats.failed_batches += 1;
                    continue;
                }
            };
            store.in_transaction(|| {
                for ((id, _, hash), vector) in batch.iter().zip(&vectors) {
                    store.store_embedding(*id, index.kind, vector, hash)?;
                }
                Ok(())
            })?;
            stats.embedded += batch.len();
        }
    }
    info!(
        embedded = stats.embedded,
        skipped = stats.skipped,
        failed_batches = stats.failed_batches,
        "embeddings complete"
    );
    Ok(stats)
}
