//! Deterministic stand-ins for the enrichment oracle and the embedding
//! service.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedding::EmbeddingService;
use crate::enrichment::model::{Enrichment, EnrichmentRequest};
use crate::enrichment::EnrichmentOracle;
use crate::errors::{GraphError, GraphResult};
use crate::models::NodeKind;

#[derive(Debug, Default)]
pub struct FakeOracle {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeOracle {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EnrichmentOracle for FakeOracle {
    fn enrich(&self, request: &EnrichmentRequest) -> GraphResult<Enrichment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GraphError::Oracle("oracle unavailable".into()));
        }
        let first_line = request.source.lines().next().unwrap_or_default().trim();
        let mut out = Enrichment {
            purpose: format!("Implements {first_line}"),
            summary: format!("Summary of {}", request.qualified_name),
            domain_concepts: vec!["testing".into()],
            ..Enrichment::default()
        };
        match request.kind {
            NodeKind::Class => out.role = Some("service".into()),
            _ => out.complexity = Some("low".into()),
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Embeds text as a normalized byte histogram, or returns one fixed vector.
#[derive(Debug)]
pub struct FakeEmbedder {
    dims: usize,
    fixed: Option<Vec<f32>>,
    batches: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            fixed: None,
            batches: AtomicUsize::new(0),
        }
    }

    pub fn fixed(vector: Vec<f32>) -> Self {
        Self {
            dims: vector.len(),
            fixed: Some(vector),
            batches: AtomicUsize::new(0),
        }
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = &self.fixed {
            return v.clone();
        }
        let mut v = vec![0.0f32; self.dims];
        for b in text.bytes() {
            v[usize::from(b) % self.dims] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl EmbeddingService for FakeEmbedder {
    fn embed_batch(&self, texts: &[String]) -> GraphResult<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
