//! Call resolution: turns bare callee names into CALLS edges.
//!
//! Three passes run per caller, each only over names the earlier passes
//! left open:
//!
//! 1. same file: candidates owned by the caller's File,
//! 2. import: candidates owned by a File whose module the caller's module
//!    imports,
//! 3. unique name: the only Function with that name anywhere.
//!
//! Anything still open stays unresolved. The caller is never its own
//! candidate. The passes are the same for both modes; only the candidate
//! lookup differs (an in-memory index for a full run, indexed store queries
//! for a scoped one).

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::errors::GraphResult;
use crate::models::{CallResolution, RelKind};
use crate::store::edges::PlaceholderReport;
use crate::store::queries::FunctionSite;
use crate::store::{EdgeOps, GraphStore, QueryOps};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub id: i64,
    pub file_id: Option<i64>,
}

impl From<&FunctionSite> for Candidate {
    fn from(site: &FunctionSite) -> Self {
        Candidate {
            id: site.id,
            file_id: site.file_id,
        }
    }
}

/// Where the passes get their candidates from.
pub trait CandidateLookup {
    /// Every Function named `name`.
    fn candidates(&mut self, name: &str) -> GraphResult<Vec<Candidate>>;

    /// Files whose module is imported by `file_id`'s module.
    fn imported_files(&mut self, file_id: i64) -> GraphResult<Vec<i64>>;
}

/// Name index over every Function, built once for a full run.
pub struct InMemoryLookup<'a> {
    store: &'a GraphStore,
    by_name: HashMap<String, Vec<Candidate>>,
    imports: HashMap<i64, Vec<i64>>,
}

impl<'a> InMemoryLookup<'a> {
    pub fn new(store: &'a GraphStore, sites: &[FunctionSite]) -> Self {
        let mut by_name: HashMap<String, Vec<Candidate>> = HashMap::new();
        for site in sites {
            by_name.entry(site.name.clone()).or_default().push(site.into());
        }
        Self {
            store,
            by_name,
            imports: HashMap::new(),
        }
    }
}

impl CandidateLookup for InMemoryLookup<'_> {
    fn candidates(&mut self, name: &str) -> GraphResult<Vec<Candidate>> {
        Ok(self.by_name.get(name).cloned().unwrap_or_default())
    }

    fn imported_files(&mut self, file_id: i64) -> GraphResult<Vec<i64>> {
        if let Some(hit) = self.imports.get(&file_id) {
            return Ok(hit.clone());
        }
        let files = self.store.imported_file_ids(file_id)?;
        self.imports.insert(file_id, files.clone());
        Ok(files)
    }
}

/// Per-name store queries; cost scales with the callers being resolved,
/// not the repository.
pub struct StoreLookup<'a> {
    store: &'a GraphStore,
    names: HashMap<String, Vec<Candidate>>,
    imports: HashMap<i64, Vec<i64>>,
}

impl<'a> StoreLookup<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self {
            store,
            names: HashMap::new(),
            imports: HashMap::new(),
        }
    }
}

impl CandidateLookup for StoreLookup<'_> {
    fn candidates(&mut self, name: &str) -> GraphResult<Vec<Candidate>> {
        if let Some(hit) = self.names.get(name) {
            return Ok(hit.clone());
        }
        let found: Vec<Candidate> = self
            .store
            .functions_named(name)?
            .iter()
            .map(Candidate::from)
            .collect();
        self.names.insert(name.to_string(), found.clone());
        Ok(found)
    }

    fn imported_files(&mut self, file_id: i64) -> GraphResult<Vec<i64>> {
        if let Some(hit) = self.imports.get(&file_id) {
            return Ok(hit.clone());
        }
        let files = self.store.imported_file_ids(file_id)?;
        self.imports.insert(file_id, files.clone());
        Ok(files)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedCall {
    pub caller_id: i64,
    pub callee_id: i64,
    pub resolution: CallResolution,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub callers: usize,
    pub edges: usize,
    pub same_file: usize,
    pub import: usize,
    pub unique_name: usize,
    pub placeholders_relinked: usize,
    pub placeholders_removed: usize,
}

impl ResolutionStats {
    fn record(&mut self, calls: &[ResolvedCall]) {
        self.callers += 1;
        for call in calls {
            self.edges += 1;
            match call.resolution {
                CallResolution::SameFile => self.same_file += 1,
                CallResolution::Import => self.import += 1,
                CallResolution::UniqueName => self.unique_name += 1,
            }
        }
    }

    pub fn record_placeholders(&mut self, report: PlaceholderReport) {
        self.placeholders_relinked += report.relinked;
        self.placeholders_removed += report.removed;
    }
}

impl std::ops::AddAssign for ResolutionStats {
    fn add_assign(&mut self, other: Self) {
        self.callers += other.callers;
        self.edges += other.edges;
        self.same_file += other.same_file;
        self.import += other.import;
        self.unique_name += other.unique_name;
        self.placeholders_relinked += other.placeholders_relinked;
        self.placeholders_removed += other.placeholders_removed;
    }
}

/// Run the three passes for one caller.
pub fn resolve_site(site: &FunctionSite, lookup: &mut impl CandidateLookup) -> GraphResult<Vec<ResolvedCall>> {
    let mut open: Vec<&str> = site
        .calls
        .iter()
        .map(String::as_str)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut out = Vec::new();

    let emit = |targets: &[Candidate], resolution: CallResolution, out: &mut Vec<ResolvedCall>| {
        for t in targets {
            out.push(ResolvedCall {
                caller_id: site.id,
                callee_id: t.id,
                resolution,
            });
        }
    };

    if let Some(file_id) = site.file_id {
        let mut still_open = Vec::new();
        for name in open {
            let local: Vec<Candidate> = lookup
                .candidates(name)?
                .into_iter()
                .filter(|c| c.id != site.id && c.file_id == Some(file_id))
                .collect();
            if local.is_empty() {
                still_open.push(name);
            } else {
                emit(&local, CallResolution::SameFile, &mut out);
            }
        }
        open = still_open;

        if !open.is_empty() {
            let imported = lookup.imported_files(file_id)?;
            let mut still_open = Vec::new();
            for name in open {
                let via_import: Vec<Candidate> = lookup
                    .candidates(name)?
                    .into_iter()
                    .filter(|c| {
                        c.id != site.id && c.file_id.is_some_and(|f| f != file_id && imported.contains(&f))
                    })
                    .collect();
                if via_import.is_empty() {
                    still_open.push(name);
                } else {
                    emit(&via_import, CallResolution::Import, &mut out);
                }
            }
            open = still_open;
        }
    }

    for name in open {
        let others: Vec<Candidate> = lookup
            .candidates(name)?
            .into_iter()
            .filter(|c| c.id != site.id)
            .collect();
        if others.len() == 1 {
            emit(&others, CallResolution::UniqueName, &mut out);
        }
    }

    Ok(out)
}

fn write_calls(store: &GraphStore, calls: &[ResolvedCall]) -> GraphResult<()> {
    for call in calls {
        let props = json!({ "resolution": call.resolution.as_str() });
        store.add_edge(call.caller_id, call.callee_id, RelKind::Calls, Some(&props))?;
    }
    Ok(())
}

/// Recompute every CALLS edge in the graph, then reconcile base-class
/// placeholders.
pub fn resolve_all(store: &GraphStore) -> GraphResult<ResolutionStats> {
    let sites = store.all_function_sites()?;
    let mut lookup = InMemoryLookup::new(store, &sites);
    let mut stats = ResolutionStats::default();
    let mut resolved = Vec::new();
    for site in sites.iter().filter(|s| !s.calls.is_empty()) {
        let calls = resolve_site(site, &mut lookup)?;
        stats.record(&calls);
        resolved.extend(calls);
    }

    store.in_transaction(|| {
        store.delete_edges_of_type(RelKind::Calls)?;
        write_calls(store, &resolved)
    })?;
    stats.record_placeholders(store.resolve_base_placeholders()?);

    info!(
        functions = sites.len(),
        edges = stats.edges,
        same_file = stats.same_file,
        import = stats.import,
        unique_name = stats.unique_name,
        "call resolution complete"
    );
    Ok(stats)
}

/// Recompute outgoing CALLS edges of the given functions only.
pub fn resolve_scoped(store: &GraphStore, function_ids: &[i64]) -> GraphResult<ResolutionStats> {
    let mut lookup = StoreLookup::new(store);
    let mut stats = ResolutionStats::default();
    for &id in function_ids {
        let Some(site) = store.function_site(id)? else {
            continue;
        };
        let calls = resolve_site(&site, &mut lookup)?;
        store.in_transaction(|| {
            store.delete_edges_from(id, &[RelKind::Calls])?;
            write_calls(store, &calls)
        })?;
        stats.record(&calls);
    }
    debug!(callers = stats.callers, edges = stats.edges, "scoped resolution complete");
    Ok(stats)
}

/// Callers whose `unique_name` edges point at a name that just gained a
/// definition may now be ambiguous; re-resolve them.
pub fn revalidate_unique_names(
    store: &GraphStore,
    names: &[String],
    already_resolved: &[i64],
) -> GraphResult<ResolutionStats> {
    let mut callers = BTreeSet::new();
    for name in names.iter().collect::<BTreeSet<_>>() {
        callers.extend(store.unique_name_callers(name)?);
    }
    let ids: Vec<i64> = callers
        .into_iter()
        .filter(|id| !already_resolved.contains(id))
        .collect();
    if ids.is_empty() {
        return Ok(ResolutionStats::default());
    }
    debug!(callers = ids.len(), "re-validating unique-name edges");
    resolve_scoped(store, &ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extractor::extract_file;
    use crate::indexer::updater::apply_file;
    use crate::models::NodeKind;
    use crate::store::NodeOps;

    fn ingest(store: &GraphStore, files: &[(&str, &str)]) -> Vec<i64> {
        let mut touched = Vec::new();
        for (path, src) in files {
            touched.extend(apply_file(store, &extract_file(path, src)).unwrap().functions_to_resolve);
        }
        touched
    }

    fn id(store: &GraphStore, qname: &str) -> i64 {
        store.node_id(NodeKind::Function, qname).unwrap().unwrap()
    }

    fn calls_of(store: &GraphStore, caller: i64) -> Vec<(i64, String)> {
        store
            .with_conn(|c| {
                let mut stmt = c.prepare(
                    "SELECT target_id, json_extract(properties, '$.resolution') FROM edges \
                     WHERE source_id = ?1 AND relationship = 'CALLS' ORDER BY target_id",
                )?;
                let rows = stmt
                    .query_map([caller], |r| Ok((r.get(0)?, r.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .unwrap()
    }

    #[test]
    fn test_same_file_candidate_wins_over_others() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest(
            &store,
            &[
                ("a.py", "def helper():\n    pass\ndef run():\n    helper()\n"),
                ("b.py", "def helper():\n    pass\n"),
                ("c.py", "def helper():\n    pass\n"),
            ],
        );
        resolve_all(&store).unwrap();
        assert_eq!(
            calls_of(&store, id(&store, "a.run")),
            vec![(id(&store, "a.helper"), "same_file".to_string())]
        );
    }

    #[test]
    fn test_import_pass_picks_imported_module() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest(
            &store,
            &[
                ("app.py", "from util import helper\ndef run():\n    helper()\n"),
                ("util.py", "def helper():\n    pass\n"),
                ("other.py", "def helper():\n    pass\n"),
            ],
        );
        let stats = resolve_all(&store).unwrap();
        assert_eq!(stats.import, 1);
        assert_eq!(
            calls_of(&store, id(&store, "app.run")),
            vec![(id(&store, "util.helper"), "import".to_string())]
        );
    }

    #[test]
    fn test_unique_name_and_ambiguity() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest(
            &store,
            &[
                ("a.py", "def run():\n    single()\n    twice()\n    run()\n"),
                ("b.py", "def single():\n    pass\ndef twice():\n    pass\n"),
                ("c.py", "def twice():\n    pass\n"),
            ],
        );
        resolve_all(&store).unwrap();
        assert_eq!(
            calls_of(&store, id(&store, "a.run")),
            vec![(id(&store, "b.single"), "unique_name".to_string())]
        );
    }

    #[test]
    fn test_scoped_matches_full_resolution() {
        let store = GraphStore::open_in_memory().unwrap();
        let touched = ingest(
            &store,
            &[
                ("app.py", "from util import helper\ndef run():\n    helper()\n    local()\ndef local():\n    pass\n"),
                ("util.py", "def helper():\n    pass\n"),
            ],
        );
        resolve_scoped(&store, &touched).unwrap();
        let scoped = calls_of(&store, id(&store, "app.run"));
        resolve_all(&store).unwrap();
        assert_eq!(calls_of(&store, id(&store, "app.run")), scoped);
        assert_eq!(scoped.len(), 2);
    }

    #[test]
    fn test_new_definition_invalidates_unique_name_edge() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest(
            &store,
            &[
                ("a.py", "def run():\n    helper()\n"),
                ("b.py", "def helper():\n    pass\n"),
            ],
        );
        resolve_all(&store).unwrap();
        let run = id(&store, "a.run");
        assert_eq!(calls_of(&store, run).len(), 1);

        let update = apply_file(&store, &extract_file("c.py", "def helper():\n    pass\n")).unwrap();
        resolve_scoped(&store, &update.functions_to_resolve).unwrap();
        revalidate_unique_names(&store, &update.added_function_names, &update.functions_to_resolve).unwrap();
        assert!(calls_of(&store, run).is_empty());
    }

    #[test]
    fn test_nested_function_resolves_within_its_file() {
        let store = GraphStore::open_in_memory().unwrap();
        ingest(
            &store,
            &[
                ("a.py", "class A:\n    def m(self):\n        def inner():\n            helper()\ndef helper():\n    pass\n"),
                ("b.py", "def helper():\n    pass\n"),
            ],
        );
        resolve_all(&store).unwrap();
        assert_eq!(
            calls_of(&store, id(&store, "a.A.m.inner")),
            vec![(id(&store, "a.helper"), "same_file".to_string())]
        );
        assert!(calls_of(&store, id(&store, "a.A.m")).is_empty());
    }
}
