//! Brings every stale Function and Class annotation up to date.
//!
//! Per batch: group stale entities by content hash, serve groups from the
//! cache where possible, ask the oracle once per remaining group (in a
//! bounded rayon pool), then write the result to every member of the group.

use std::thread;
use std::time::Duration;

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EnrichmentConfig;
use crate::enrichment::model::{Enrichment, EnrichmentRequest};
use crate::enrichment::EnrichmentOracle;
use crate::errors::GraphResult;
use crate::models::NodeKind;
use crate::store::enrichment::StaleEntity;
use crate::store::{EnrichmentOps, GraphStore};

#[derive(Clone, Debug)]
pub struct EnrichmentSettings {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub workers: usize,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self::from(&EnrichmentConfig::default())
    }
}

impl From<&EnrichmentConfig> for EnrichmentSettings {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_attempts: config.max_retries.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            workers: config.workers.max(1),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentStats {
    pub stale: usize,
    pub enriched: usize,
    pub cache_hits: usize,
    pub oracle_calls: usize,
    /// Entities that received the docstring fallback.
    pub fallbacks: usize,
    /// Entities whose write failed.
    pub failed: usize,
}

impl std::ops::AddAssign for EnrichmentStats {
    fn add_assign(&mut self, other: Self) {
        self.stale += other.stale;
        self.enriched += other.enriched;
        self.cache_hits += other.cache_hits;
        self.oracle_calls += other.oracle_calls;
        self.fallbacks += other.fallbacks;
        self.failed += other.failed;
    }
}

/// Content hash, the entities sharing it, and the oracle request built from
/// the first of them.
type Pending<'e> = (&'e str, Vec<&'e StaleEntity>, EnrichmentRequest);

enum Outcome {
    Fresh(Enrichment),
    Fallback(Enrichment),
}

pub struct EnrichmentCoordinator<'a> {
    store: &'a GraphStore,
    oracle: &'a dyn EnrichmentOracle,
    settings: EnrichmentSettings,
}

impl<'a> EnrichmentCoordinator<'a> {
    pub fn new(store: &'a GraphStore, oracle: &'a dyn EnrichmentOracle, settings: EnrichmentSettings) -> Self {
        Self { store, oracle, settings }
    }

    /// Enrich stale Functions, then stale Classes.
    pub fn run(&self) -> GraphResult<EnrichmentStats> {
        let mut stats = EnrichmentStats::default();
        for kind in [NodeKind::Function, NodeKind::Class] {
            let stale = self.store.stale_entities(kind)?;
            let total = stale.len();
            info!(kind = %kind, total, oracle = self.oracle.name(), "enrichment starting");
            for (i, batch) in stale.chunks(self.settings.batch_size).enumerate() {
                stats += self.run_batch(batch)?;
                debug!(
                    kind = %kind,
                    done = ((i + 1) * self.settings.batch_size).min(total),
                    total,
                    "enrichment progress"
                );
            }
        }
        info!(
            enriched = stats.enriched,
            cache_hits = stats.cache_hits,
            oracle_calls = stats.oracle_calls,
            fallbacks = stats.fallbacks,
            failed = stats.failed,
            "enrichment complete"
        );
        Ok(stats)
    }

    fn run_batch(&self, batch: &[StaleEntity]) -> GraphResult<EnrichmentStats> {
        let mut stats = EnrichmentStats {
            stale: batch.len(),
            ..EnrichmentStats::default()
        };

        let mut groups: IndexMap<&str, Vec<&StaleEntity>> = IndexMap::new();
        for entity in batch {
            groups.entry(entity.content_hash.as_str()).or_default().push(entity);
        }

        let mut pending: Vec<Pending<'_>> = Vec::new();
        for (hash, members) in groups {
            if let Some(cached) = self.store.cached_enrichment(hash)? {
                stats.cache_hits += members.len();
                self.write_group(&members, hash, &cached, &mut stats);
                continue;
            }
            let representative = members[0];
            match self.store.structural_context(representative) {
                Ok(context) => {
                    let request = EnrichmentRequest {
                        kind: representative.kind,
                        qualified_name: representative.qualified_name.clone(),
                        source: representative.source.clone(),
                        context,
                    };
                    pending.push((hash, members, request));
                }
                Err(e) => {
                    warn!(entity = %representative.qualified_name, error = %e, "could not gather context");
                    stats.failed += members.len();
                }
            }
        }

        stats.oracle_calls += pending.len();
        let outcomes = self.ask_oracle(&pending);

        for ((hash, members, request), outcome) in pending.iter().zip(outcomes) {
            match outcome {
                Outcome::Fresh(enrichment) => {
                    if let Err(e) = self.store.cache_enrichment(hash, &enrichment) {
                        warn!(entity = %request.qualified_name, error = %e, "could not cache annotation");
                    }
                    self.write_group(members, hash, &enrichment, &mut stats);
                }
                Outcome::Fallback(enrichment) => {
                    stats.fallbacks += members.len();
                    self.write_group(members, hash, &enrichment, &mut stats);
                }
            }
        }
        Ok(stats)
    }

    fn ask_oracle(&self, pending: &[Pending<'_>]) -> Vec<Outcome> {
        if pending.is_empty() {
            return Vec::new();
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.workers)
            .build();
        match pool {
            Ok(pool) => pool.install(|| pending.par_iter().map(|p| self.outcome(p)).collect()),
            Err(_) => pending.iter().map(|p| self.outcome(p)).collect(),
        }
    }

    fn outcome(&self, (_, members, request): &Pending<'_>) -> Outcome {
        match self.enrich_with_retry(request) {
            Some(e) => Outcome::Fresh(e),
            None => Outcome::Fallback(Enrichment::fallback(request.kind, members[0].docstring.as_deref())),
        }
    }

    /// `None` once every attempt has failed.
    fn enrich_with_retry(&self, request: &EnrichmentRequest) -> Option<Enrichment> {
        for attempt in 1..=self.settings.max_attempts {
            match self.oracle.enrich(request) {
                Ok(e) => return Some(e.normalized(request.kind)),
                Err(e) => {
                    warn!(
                        entity = %request.qualified_name,
                        attempt,
                        error = %e,
                        "enrichment attempt failed"
                    );
                    if attempt < self.settings.max_attempts {
                        thread::sleep(self.settings.backoff * attempt);
                    }
                }
            }
        }
        warn!(entity = %request.qualified_name, "all enrichment attempts failed, using fallback");
        None
    }

    fn write_group(&self, members: &[&StaleEntity], hash: &str, enrichment: &Enrichment, stats: &mut EnrichmentStats) {
        for entity in members {
            match self.store.apply_enrichment(entity.id, hash, enrichment) {
                Ok(()) => stats.enriched += 1,
                Err(e) => {
                    warn!(entity = %entity.qualified_name, error = %e, "could not store annotation");
                    stats.failed += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extractor::extract_file;
    use crate::indexer::updater::apply_file;
    use crate::store::NodeOps;
    use crate::testutil::FakeOracle;

    fn settings() -> EnrichmentSettings {
        EnrichmentSettings {
            batch_size: 30,
            max_attempts: 3,
            backoff: Duration::ZERO,
            workers: 2,
        }
    }

    fn store_with(files: &[(&str, &str)]) -> GraphStore {
        let store = GraphStore::open_in_memory().unwrap();
        for (path, src) in files {
            apply_file(&store, &extract_file(path, src)).unwrap();
        }
        store
    }

    #[test]
    fn test_identical_bodies_share_one_oracle_call() {
        let body = "def helper(x):\n    return x + 1\n";
        let store = store_with(&[("a.py", body), ("b.py", body)]);
        let oracle = FakeOracle::default();
        let stats = EnrichmentCoordinator::new(&store, &oracle, settings()).run().unwrap();

        assert_eq!(oracle.calls(), 1);
        assert_eq!(stats.enriched, 2);
        let a = store.node_id(NodeKind::Function, "a.helper").unwrap().unwrap();
        let b = store.node_id(NodeKind::Function, "b.helper").unwrap().unwrap();
        let (a, b) = (store.get_node(a).unwrap().unwrap(), store.get_node(b).unwrap().unwrap());
        assert_eq!(a.purpose, b.purpose);
        assert!(a.purpose.is_some());
        assert_eq!(store.stale_enrichment_count().unwrap(), 0);
    }

    #[test]
    fn test_second_run_hits_cache_after_reingest() {
        let body = "def helper(x):\n    return x + 1\n";
        let store = store_with(&[("a.py", body)]);
        let oracle = FakeOracle::default();
        EnrichmentCoordinator::new(&store, &oracle, settings()).run().unwrap();

        apply_file(&store, &extract_file("c.py", body)).unwrap();
        let stats = EnrichmentCoordinator::new(&store, &oracle, settings()).run().unwrap();
        assert_eq!(oracle.calls(), 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[test]
    fn test_exhausted_oracle_falls_back_without_caching() {
        let store = store_with(&[("a.py", "def f():\n    \"\"\"Does f.\"\"\"\n    return 1\n")]);
        let oracle = FakeOracle::failing();
        let stats = EnrichmentCoordinator::new(&store, &oracle, settings()).run().unwrap();

        assert_eq!(oracle.calls(), 3);
        assert_eq!(stats.fallbacks, 1);
        let id = store.node_id(NodeKind::Function, "a.f").unwrap().unwrap();
        let node = store.get_node(id).unwrap().unwrap();
        assert_eq!(node.purpose.as_deref(), Some("Does f."));
        let hash = node.content_hash.unwrap();
        assert!(store.cached_enrichment(&hash).unwrap().is_none());

        // The fallback counts as current until the body changes.
        assert_eq!(store.stale_enrichment_count().unwrap(), 0);
        EnrichmentCoordinator::new(&store, &oracle, settings()).run().unwrap();
        assert_eq!(oracle.calls(), 3);
    }

    #[test]
    fn test_classes_enriched_after_functions() {
        let store = store_with(&[("m.py", "class C:\n    def run(self):\n        pass\n")]);
        let oracle = FakeOracle::default();
        let stats = EnrichmentCoordinator::new(&store, &oracle, settings()).run().unwrap();
        assert_eq!(stats.enriched, 2);
        assert_eq!(oracle.calls(), 2);
    }
}
