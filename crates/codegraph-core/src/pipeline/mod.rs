//! Ingestion orchestration: full and incremental runs over a repository
//! snapshot, background jobs, and the status overview.

pub mod jobs;
pub mod source;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::IndexerConfig;
use crate::embedding::{embed_all, EmbeddingService, EmbeddingStats};
use crate::enrichment::{EnrichmentCoordinator, EnrichmentOracle, EnrichmentSettings, EnrichmentStats};
use crate::errors::{GraphError, GraphResult};
use crate::indexer::diff::DiffCounts;
use crate::indexer::entities::FileExtraction;
use crate::indexer::extractor::extract_file;
use crate::indexer::filesystem::content_hash;
use crate::indexer::resolution::{resolve_all, resolve_scoped, revalidate_unique_names, ResolutionStats};
use crate::indexer::updater::apply_file;
use crate::models::{ChangeSet, IndexState, NodeKind, RelKind};
use crate::store::queries::EnrichmentCoverage;
use crate::store::{Direction, EdgeOps, GraphStore, NodeOps, QueryOps};

pub use jobs::{InMemoryJobStore, Job, JobKind, JobProgress, JobStatus, JobStore};
pub use source::{InMemorySource, LocalRepository, SourceProvider};

const RECENT_JOBS: usize = 10;
const ORPHAN_SAMPLE: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RunOptions {
    pub clear_graph: bool,
    pub run_enrichment: bool,
    pub create_embeddings: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            clear_graph: false,
            run_enrichment: true,
            create_embeddings: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub files_total: usize,
    pub files_indexed: usize,
    pub files_deleted: usize,
    pub parse_errors: usize,
    /// `path: message` for every file that failed to read or parse.
    pub errors: Vec<String>,
    pub entities: DiffCounts,
    pub resolution: ResolutionStats,
    pub enrichment: Option<EnrichmentStats>,
    pub embeddings: Option<EmbeddingStats>,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Overview {
    pub active_jobs: usize,
    pub recent_jobs: Vec<Job>,
    pub node_counts: BTreeMap<String, usize>,
    pub edge_counts: BTreeMap<String, usize>,
    pub enrichment: EnrichmentCoverage,
    pub warnings: Vec<String>,
    pub index_state: Option<IndexState>,
}

type Extracted = Result<FileExtraction, (String, String)>;

fn extract_one(source: &dyn SourceProvider, path: &str) -> Extracted {
    match source.read_file(path) {
        Ok(text) => Ok(extract_file(path, &text)),
        Err(e) => Err((path.to_string(), e.to_string())),
    }
}

/// Read and extract `paths` on a bounded pool. Output order follows `paths`.
fn parallel_extract(source: &dyn SourceProvider, paths: &[String], workers: usize) -> Vec<Extracted> {
    if paths.is_empty() {
        return Vec::new();
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();
    match pool {
        Ok(pool) => pool.install(|| paths.par_iter().map(|p| extract_one(source, p)).collect()),
        Err(e) => {
            warn!(error = %e, "worker pool unavailable, extracting sequentially");
            paths.iter().map(|p| extract_one(source, p)).collect()
        }
    }
}

/// Drives runs against one store. Cheap to clone; clones share the store,
/// the collaborators and the job records.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<GraphStore>,
    config: IndexerConfig,
    oracle: Option<Arc<dyn EnrichmentOracle>>,
    embedder: Option<Arc<dyn EmbeddingService>>,
    jobs: Arc<dyn JobStore>,
}

impl Orchestrator {
    pub fn new(store: Arc<GraphStore>, config: IndexerConfig) -> Self {
        Self {
            store,
            config,
            oracle: None,
            embedder: None,
            jobs: Arc::new(InMemoryJobStore::new()),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn EnrichmentOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingService>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_job_store(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Index a whole snapshot. Re-running on an unchanged snapshot rewrites
    /// nothing, since each file goes through the diff updater.
    pub fn run_full(&self, source: &dyn SourceProvider, options: RunOptions) -> GraphResult<RunSummary> {
        self.run_full_reporting(source, options, &|_| {})
    }

    fn run_full_reporting(
        &self,
        source: &dyn SourceProvider,
        options: RunOptions,
        report: &dyn Fn(JobProgress),
    ) -> GraphResult<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary {
            run_id: Uuid::new_v4().to_string(),
            ..RunSummary::default()
        };
        info!(run_id = %summary.run_id, source = %source.describe(), clear = options.clear_graph, "full run starting");

        if options.clear_graph {
            self.store.clear_graph()?;
        }

        let paths = source.list_files()?;
        summary.files_total = paths.len();
        report(JobProgress::new("extract", 0, paths.len(), "extracting files"));
        self.ingest(source, &paths, &mut summary, report)?;

        let present: BTreeSet<&str> = paths.iter().map(String::as_str).collect();
        let stale: Vec<String> = self
            .store
            .file_hashes()?
            .into_keys()
            .filter(|p| !present.contains(p.as_str()))
            .collect();
        for path in stale {
            if self.store.delete_file(&path)? {
                summary.files_deleted += 1;
            }
        }

        report(JobProgress::new("resolve", paths.len(), paths.len(), "resolving calls"));
        summary.resolution = resolve_all(&self.store)?;

        self.post_passes(options, &mut summary, paths.len(), report)?;
        self.finish(source, &mut summary, started)?;
        Ok(summary)
    }

    /// Apply a known set of file changes. Only the touched functions, and
    /// callers whose edges the change may have invalidated, are re-resolved.
    pub fn run_incremental(
        &self,
        source: &dyn SourceProvider,
        changes: &ChangeSet,
        options: RunOptions,
    ) -> GraphResult<RunSummary> {
        self.run_incremental_reporting(source, changes, options, &|_| {})
    }

    fn run_incremental_reporting(
        &self,
        source: &dyn SourceProvider,
        changes: &ChangeSet,
        options: RunOptions,
        report: &dyn Fn(JobProgress),
    ) -> GraphResult<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary {
            run_id: Uuid::new_v4().to_string(),
            ..RunSummary::default()
        };
        info!(
            run_id = %summary.run_id,
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            renamed = changes.renamed.len(),
            "incremental run starting"
        );

        let mut orphaned_callers = BTreeSet::new();
        for path in changes.paths_to_remove() {
            orphaned_callers.extend(self.callers_into_file(&path)?);
            if self.store.delete_file(&path)? {
                summary.files_deleted += 1;
            }
        }

        let paths = changes.paths_to_index();
        summary.files_total = paths.len();
        report(JobProgress::new("extract", 0, paths.len(), "extracting changed files"));
        let (touched, added_names) = self.ingest(source, &paths, &mut summary, report)?;

        report(JobProgress::new("resolve", paths.len(), paths.len(), "resolving calls"));
        let mut scope = touched.clone();
        scope.extend(orphaned_callers.into_iter().filter(|id| !touched.contains(id)));
        summary.resolution = resolve_scoped(&self.store, &scope)?;
        summary.resolution += revalidate_unique_names(&self.store, &added_names, &scope)?;
        summary
            .resolution
            .record_placeholders(self.store.resolve_base_placeholders()?);

        self.post_passes(options, &mut summary, paths.len(), report)?;
        self.finish(source, &mut summary, started)?;
        Ok(summary)
    }

    /// Compare stored File hashes with the snapshot. An added file whose
    /// content matches a vanished one is reported as a rename.
    pub fn detect_changes(&self, source: &dyn SourceProvider) -> GraphResult<ChangeSet> {
        let mut stored = self.store.file_hashes()?;
        let mut changes = ChangeSet::default();
        let mut added: Vec<(String, String)> = Vec::new();
        for path in source.list_files()? {
            let hash = match source.read_file(&path) {
                Ok(text) => content_hash(&text),
                Err(e) => {
                    warn!(path = %path, error = %e, "unreadable file skipped during change detection");
                    stored.remove(&path);
                    continue;
                }
            };
            match stored.remove(&path) {
                None => added.push((path, hash)),
                Some(old) if old != hash => changes.modified.push(path),
                Some(_) => {}
            }
        }

        let mut vanished: HashMap<String, Vec<String>> = HashMap::new();
        let mut deleted = Vec::with_capacity(stored.len());
        for (path, hash) in stored {
            vanished.entry(hash).or_default().push(path.clone());
            deleted.push(path);
        }
        for (path, hash) in added {
            match vanished.get_mut(&hash).and_then(Vec::pop) {
                Some(old) => {
                    deleted.retain(|d| d != &old);
                    changes.renamed.push((old, path));
                }
                None => changes.added.push(path),
            }
        }
        deleted.sort();
        changes.deleted = deleted;
        changes.renamed.sort();
        Ok(changes)
    }

    /// Queue a full run on a background thread and return its job id.
    pub fn submit_full(&self, source: Arc<dyn SourceProvider>, options: RunOptions) -> GraphResult<String> {
        self.submit(JobKind::Full, move |this, report| {
            this.run_full_reporting(source.as_ref(), options, report)
        })
    }

    pub fn submit_incremental(
        &self,
        source: Arc<dyn SourceProvider>,
        changes: ChangeSet,
        options: RunOptions,
    ) -> GraphResult<String> {
        self.submit(JobKind::Incremental, move |this, report| {
            this.run_incremental_reporting(source.as_ref(), &changes, options, report)
        })
    }

    fn submit<F>(&self, kind: JobKind, run: F) -> GraphResult<String>
    where
        F: FnOnce(&Orchestrator, &dyn Fn(JobProgress)) -> GraphResult<RunSummary> + Send + 'static,
    {
        let job = Job::new(kind);
        let id = job.id.clone();
        self.jobs.put(job)?;

        let this = self.clone();
        let job_id = id.clone();
        std::thread::Builder::new()
            .name(format!("codegraph-job-{}", &id[..8]))
            .spawn(move || {
                let jobs = Arc::clone(&this.jobs);
                let _ = jobs.update(&job_id, &mut |j| j.start());
                let report = |p: JobProgress| {
                    let _ = jobs.update(&job_id, &mut |j| j.progress = p.clone());
                };
                let outcome = run(&this, &report).and_then(|s| Ok(serde_json::to_value(&s)?));
                let stored = match outcome {
                    Ok(result) => jobs.update(&job_id, &mut |j| j.complete(result.clone())),
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "job failed");
                        let message = e.to_string();
                        jobs.update(&job_id, &mut |j| j.fail(message.clone()))
                    }
                };
                if let Err(e) = stored {
                    error!(job_id = %job_id, error = %e, "could not record job outcome");
                }
            })
            .map_err(|e| GraphError::Job(format!("could not spawn job thread: {e}")))?;
        Ok(id)
    }

    pub fn job_status(&self, id: &str) -> GraphResult<Job> {
        self.jobs
            .get(id)?
            .ok_or_else(|| GraphError::NotFound(format!("job {id}")))
    }

    pub fn overview(&self) -> GraphResult<Overview> {
        let recent_jobs = self.jobs.list(RECENT_JOBS)?;
        let active_jobs = self
            .jobs
            .list(usize::MAX)?
            .iter()
            .filter(|j| j.status.is_active())
            .count();
        let enrichment = self.store.enrichment_coverage()?;

        let mut warnings = Vec::new();
        let (orphans, sample) = self.store.orphan_nodes(ORPHAN_SAMPLE)?;
        if orphans > 0 {
            warnings.push(format!("Found {orphans} orphan nodes: [{}]", sample.join(", ")));
        }
        if enrichment.stale > 0 {
            warnings.push(format!("{} nodes have stale enrichment", enrichment.stale));
        }

        Ok(Overview {
            active_jobs,
            recent_jobs,
            node_counts: self.store.node_counts()?,
            edge_counts: self.store.edge_counts()?,
            enrichment,
            warnings,
            index_state: self.store.index_state()?,
        })
    }

    /// Extract and apply `paths`. Returns the functions to resolve and the
    /// names of newly added functions.
    fn ingest(
        &self,
        source: &dyn SourceProvider,
        paths: &[String],
        summary: &mut RunSummary,
        report: &dyn Fn(JobProgress),
    ) -> GraphResult<(Vec<i64>, Vec<String>)> {
        let extracted = parallel_extract(source, paths, self.config.ingestion.max_workers);
        let mut touched = Vec::new();
        let mut added_names = Vec::new();
        for (i, item) in extracted.into_iter().enumerate() {
            match item {
                Ok(extraction) => {
                    let update = apply_file(&self.store, &extraction)?;
                    summary.entities += update.counts;
                    if let Some(err) = update.parse_error {
                        warn!(path = %update.path, error = %err, "parse failed, prior entities kept");
                        summary.parse_errors += 1;
                        summary.errors.push(format!("{}: {err}", update.path));
                    } else {
                        summary.files_indexed += 1;
                    }
                    touched.extend(update.functions_to_resolve);
                    added_names.extend(update.added_function_names);
                }
                Err((path, err)) => {
                    warn!(path = %path, error = %err, "unreadable file skipped");
                    summary.parse_errors += 1;
                    summary.errors.push(format!("{path}: {err}"));
                }
            }
            report(JobProgress::new("extract", i + 1, paths.len(), "applying files"));
        }
        Ok((touched, added_names))
    }

    /// Functions elsewhere that call into `path`; they lose those edges when
    /// the file goes away and need another resolution attempt.
    fn callers_into_file(&self, path: &str) -> GraphResult<Vec<i64>> {
        let mut callers = Vec::new();
        for entity in self.store.file_entities(path)? {
            if entity.kind != NodeKind::Function {
                continue;
            }
            let Some(id) = self.store.node_id(NodeKind::Function, &entity.qualified_name)? else {
                continue;
            };
            for n in self.store.neighbors(id, Direction::Incoming, &[RelKind::Calls])? {
                if n.node.file_path.as_deref() != Some(path) {
                    callers.push(n.node.id);
                }
            }
        }
        Ok(callers)
    }

    fn post_passes(
        &self,
        options: RunOptions,
        summary: &mut RunSummary,
        files: usize,
        report: &dyn Fn(JobProgress),
    ) -> GraphResult<()> {
        if options.run_enrichment && self.config.enrichment.enabled {
            if let Some(oracle) = &self.oracle {
                report(JobProgress::new("enrich", files, files, "enriching entities"));
                let settings = EnrichmentSettings::from(&self.config.enrichment);
                summary.enrichment = Some(EnrichmentCoordinator::new(&self.store, oracle.as_ref(), settings).run()?);
            }
        }
        if options.create_embeddings && self.config.embedding.enabled {
            if let Some(embedder) = &self.embedder {
                report(JobProgress::new("embed", files, files, "creating embeddings"));
                summary.embeddings = Some(embed_all(&self.store, embedder.as_ref(), self.config.embedding.batch_size)?);
            }
        }
        Ok(())
    }

    fn finish(&self, source: &dyn SourceProvider, summary: &mut RunSummary, started: Instant) -> GraphResult<()> {
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        self.store.update_index_state(IndexState {
            source: Some(source.describe()),
            files_indexed: summary.files_indexed,
            status: "completed".to_string(),
            last_run_id: Some(summary.run_id.clone()),
            updated_at: None,
        })?;
        info!(
            run_id = %summary.run_id,
            files = summary.files_total,
            indexed = summary.files_indexed,
            parse_errors = summary.parse_errors,
            call_edges = summary.resolution.edges,
            elapsed_ms = summary.elapsed_ms,
            "run complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testutil::{FakeEmbedder, FakeOracle};

    const SERVICE: &str = "from app.util import helper\n\ndef handle(x):\n    return helper(x)\n";
    const UTIL: &str = "def helper(x):\n    return x * 2\n";

    fn orchestrator() -> Orchestrator {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let mut config = IndexerConfig::default();
        config.ingestion.max_workers = 2;
        Orchestrator::new(store, config)
    }

    fn calls(o: &Orchestrator, caller: &str) -> Vec<String> {
        let id = o.store.node_id(NodeKind::Function, caller).unwrap().unwrap();
        o.store
            .neighbors(id, Direction::Outgoing, &[RelKind::Calls])
            .unwrap()
            .into_iter()
            .map(|n| n.node.display_name().to_string())
            .collect()
    }

    fn count(o: &Orchestrator, sql: &str) -> i64 {
        o.store.with_conn(|c| Ok(c.query_row(sql, [], |r| r.get(0))?)).unwrap()
    }

    fn wait_for(o: &Orchestrator, id: &str) -> Job {
        for _ in 0..500 {
            let job = o.job_status(id).unwrap();
            if !job.status.is_active() {
                return job;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("job {id} did not finish");
    }

    #[test]
    fn test_full_run_links_calls_across_files() {
        let o = orchestrator();
        let src = InMemorySource::new([("app/service.py", SERVICE), ("app/util.py", UTIL)]);
        let summary = o.run_full(&src, RunOptions::default()).unwrap();

        assert_eq!(summary.files_total, 2);
        assert_eq!(summary.files_indexed, 2);
        assert_eq!(summary.resolution.edges, 1);
        assert_eq!(calls(&o, "app.service.handle"), vec!["app.util.helper".to_string()]);
        assert_eq!(o.store.edge_counts().unwrap().get("CALLS"), Some(&1));
        assert_eq!(count(&o, "SELECT COUNT(*) FROM nodes WHERE is_unresolved = 1"), 0);
        let state = o.store.index_state().unwrap().unwrap();
        assert_eq!(state.files_indexed, 2);
        assert_eq!(state.last_run_id.as_deref(), Some(summary.run_id.as_str()));
    }

    #[test]
    fn test_full_run_is_idempotent_and_drops_missing_files() {
        let o = orchestrator();
        let mut src = InMemorySource::new([("app/service.py", SERVICE), ("app/util.py", UTIL)]);
        o.run_full(&src, RunOptions::default()).unwrap();
        let again = o.run_full(&src, RunOptions::default()).unwrap();
        assert_eq!(again.entities.added, 0);
        assert_eq!(again.entities.modified, 0);

        src.remove("app/util.py");
        let third = o.run_full(&src, RunOptions::default()).unwrap();
        assert_eq!(third.files_deleted, 1);
        assert!(calls(&o, "app.service.handle").is_empty());
    }

    #[test]
    fn test_parse_failure_is_isolated() {
        let o = orchestrator();
        let src = InMemorySource::new([("bad.py", "def broken(:\n"), ("app/util.py", UTIL)]);
        let summary = o.run_full(&src, RunOptions::default()).unwrap();
        assert_eq!(summary.parse_errors, 1);
        assert_eq!(summary.files_indexed, 1);
        assert!(summary.errors[0].starts_with("bad.py:"));
    }

    #[test]
    fn test_detect_changes_and_incremental_run() {
        let o = orchestrator();
        let mut src = InMemorySource::new([("app/service.py", SERVICE), ("app/util.py", UTIL)]);
        o.run_full(&src, RunOptions::default()).unwrap();
        assert!(o.detect_changes(&src).unwrap().is_empty());

        src.insert("app/util.py", "def helper(x):\n    return x * 3\n");
        src.insert("app/extra.py", "def other():\n    pass\n");
        let changes = o.detect_changes(&src).unwrap();
        assert_eq!(changes.modified, vec!["app/util.py".to_string()]);
        assert_eq!(changes.added, vec!["app/extra.py".to_string()]);

        let summary = o.run_incremental(&src, &changes, RunOptions::default()).unwrap();
        assert_eq!(summary.files_indexed, 2);
        assert_eq!(calls(&o, "app.service.handle"), vec!["app.util.helper".to_string()]);
        assert!(o.detect_changes(&src).unwrap().is_empty());
    }

    #[test]
    fn test_detect_changes_reports_renames() {
        let o = orchestrator();
        let mut src = InMemorySource::new([("app/util.py", UTIL)]);
        o.run_full(&src, RunOptions::default()).unwrap();
        src.remove("app/util.py");
        src.insert("app/tools.py", UTIL);
        let changes = o.detect_changes(&src).unwrap();
        assert_eq!(changes.renamed, vec![("app/util.py".to_string(), "app/tools.py".to_string())]);
        assert!(changes.added.is_empty() && changes.deleted.is_empty());
    }

    #[test]
    fn test_incremental_delete_reresolves_callers() {
        let o = orchestrator();
        let mut src = InMemorySource::new([
            ("app/service.py", "from app.legacy import helper\n\ndef handle(x):\n    return helper(x)\n"),
            ("app/util.py", UTIL),
            ("app/legacy.py", UTIL),
        ]);
        o.run_full(&src, RunOptions::default()).unwrap();
        assert_eq!(calls(&o, "app.service.handle"), vec!["app.legacy.helper".to_string()]);

        src.remove("app/legacy.py");
        let changes = o.detect_changes(&src).unwrap();
        assert_eq!(changes.deleted, vec!["app/legacy.py".to_string()]);
        o.run_incremental(&src, &changes, RunOptions::default()).unwrap();
        assert_eq!(calls(&o, "app.service.handle"), vec!["app.util.helper".to_string()]);
    }

    #[test]
    fn test_deleted_base_class_is_relinked_when_it_returns() {
        const BASE: &str = "class Base:\n    pass\n";
        let inherits = "SELECT COUNT(*) FROM edges e JOIN nodes t ON t.id = e.target_id \
                        WHERE e.relationship = 'INHERITS_FROM' AND t.is_unresolved = 0";
        let placeholders = "SELECT COUNT(*) FROM edges e JOIN nodes t ON t.id = e.target_id \
                            WHERE e.relationship = 'INHERITS_FROM' AND t.is_unresolved = 1";

        let o = orchestrator();
        let mut src = InMemorySource::new([
            ("app/base.py", BASE),
            ("app/child.py", "from app.base import Base\n\nclass Child(Base):\n    pass\n"),
        ]);
        o.run_full(&src, RunOptions::default()).unwrap();
        assert_eq!((count(&o, inherits), count(&o, placeholders)), (1, 0));

        src.remove("app/base.py");
        let changes = o.detect_changes(&src).unwrap();
        o.run_incremental(&src, &changes, RunOptions::default()).unwrap();
        assert_eq!((count(&o, inherits), count(&o, placeholders)), (0, 1));

        src.insert("app/base.py", BASE);
        let changes = o.detect_changes(&src).unwrap();
        assert_eq!(changes.added, vec!["app/base.py".to_string()]);
        o.run_incremental(&src, &changes, RunOptions::default()).unwrap();
        assert_eq!((count(&o, inherits), count(&o, placeholders)), (1, 0));
        assert_eq!(count(&o, "SELECT COUNT(*) FROM nodes WHERE is_unresolved = 1"), 0);

        o.run_full(&src, RunOptions::default()).unwrap();
        assert_eq!((count(&o, inherits), count(&o, placeholders)), (1, 0));
    }

    #[test]
    fn test_post_passes_use_configured_collaborators() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let mut config = IndexerConfig::default();
        config.enrichment.enabled = true;
        config.enrichment.retry_backoff_ms = 0;
        config.embedding.enabled = true;
        let oracle = Arc::new(FakeOracle::default());
        let o = Orchestrator::new(store, config)
            .with_oracle(oracle.clone())
            .with_embedder(Arc::new(FakeEmbedder::new(8)));

        let src = InMemorySource::new([("app/util.py", UTIL)]);
        let summary = o.run_full(&src, RunOptions::default()).unwrap();
        assert_eq!(summary.enrichment.unwrap().enriched, 1);
        assert_eq!(summary.embeddings.unwrap().embedded, 1);
        assert_eq!(oracle.calls(), 1);

        let skipped = o
            .run_full(
                &src,
                RunOptions {
                    run_enrichment: false,
                    create_embeddings: false,
                    ..RunOptions::default()
                },
            )
            .unwrap();
        assert!(skipped.enrichment.is_none() && skipped.embeddings.is_none());
    }

    #[test]
    fn test_background_job_completes_and_overview_reports() {
        let o = orchestrator();
        let src: Arc<dyn SourceProvider> =
            Arc::new(InMemorySource::new([("app/service.py", SERVICE), ("app/util.py", UTIL)]));
        let id = o.submit_full(src, RunOptions::default()).unwrap();
        let job = wait_for(&o, &id);
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
        assert_eq!(job.result.unwrap()["files_indexed"], 2);
        assert!(job.started_at.is_some() && job.finished_at.is_some());

        let overview = o.overview().unwrap();
        assert_eq!(overview.active_jobs, 0);
        assert_eq!(overview.recent_jobs.len(), 1);
        assert_eq!(overview.node_counts.get("Function"), Some(&2));
        assert!(overview.warnings.iter().all(|w| !w.contains("orphan")));
        assert!(matches!(o.job_status("missing"), Err(GraphError::NotFound(_))));
    }

    #[test]
    fn test_failed_source_marks_job_failed() {
        let o = orchestrator();
        let repo: Arc<dyn SourceProvider> = Arc::new(LocalRepository::new("/no/such/repo", Vec::new()));
        let id = o.submit_full(repo, RunOptions::default()).unwrap();
        let job = wait_for(&o, &id);
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("not a directory"));
    }
}
