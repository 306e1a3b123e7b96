//! Semantic annotation of Functions and Classes.

pub mod coordinator;
pub mod model;
pub mod openai;
pub mod prompts;

use crate::enrichment::model::{Enrichment, EnrichmentRequest};
use crate::errors::GraphResult;

pub use coordinator::{EnrichmentCoordinator, EnrichmentSettings, EnrichmentStats};

/// External service producing annotations. Must answer identically for
/// identical input, since results are cached by content hash.
pub trait EnrichmentOracle: Send + Sync {
    fn enrich(&self, request: &EnrichmentRequest) -> GraphResult<Enrichment>;

    fn name(&self) -> &str {
        "oracle"
    }
}
