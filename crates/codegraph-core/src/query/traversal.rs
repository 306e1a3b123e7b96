//! Bounded walks from one entity: dependencies, dependents, import chains
//! and direct neighbours.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::errors::GraphResult;
use crate::models::{ImportProps, NodeKind, RelKind};
use crate::query::guards::{
    clamp_depth, clamp_limit, default_relationships, relationship_filter, DEFAULT_RELATED_LIMIT,
    MAX_GRAPH_VISITED, MAX_IMPORT_DEPTH, MAX_SEARCH_LIMIT, MAX_TRAVERSAL_DEPTH,
};
use crate::query::{EntitySummary, QueryEngine, TraceDirection};
use crate::store::{Direction, NodeRecord, QueryOps};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencyHit {
    pub qualified_name: String,
    pub name: String,
    pub kind: NodeKind,
    pub purpose: Option<String>,
    /// Minimum hop count from the seed.
    pub distance: u32,
    /// Relationship of the edge that first reached this node.
    pub relationship: RelKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencyResult {
    pub entity: EntitySummary,
    pub direction: Direction,
    pub relationships: Vec<RelKind>,
    pub depth: u32,
    pub results: Vec<DependencyHit>,
    pub truncated: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportEdgeRow {
    pub from_module: String,
    pub to_module: String,
    pub depth: u32,
    #[serde(flatten)]
    pub props: ImportProps,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportTrace {
    pub module: String,
    pub direction: TraceDirection,
    pub depth: u32,
    pub imports: Vec<ImportEdgeRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    #[serde(flatten)]
    pub entity: EntitySummary,
    pub relationship: RelKind,
    pub direction: Direction,
    pub properties: Option<serde_json::Value>,
}

/// One BFS step result: the node, its distance, and the edge type that
/// first reached it.
struct Reached {
    node: NodeRecord,
    distance: u32,
    relationship: RelKind,
}

impl QueryEngine {
    /// Breadth-first walk from `seed` along `rels` in one direction. Each
    /// node is reported once at its minimum distance.
    fn walk(&self, seed: i64, direction: Direction, rels: &[RelKind], max_depth: u32) -> GraphResult<Vec<Reached>> {
        let mut visited: HashSet<i64> = HashSet::from([seed]);
        let mut queue: VecDeque<(i64, u32)> = VecDeque::from([(seed, 0)]);
        let mut out = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for n in self.store.neighbors(current, direction, rels)? {
                if visited.len() >= MAX_GRAPH_VISITED {
                    return Ok(out);
                }
                if !visited.insert(n.node.id) {
                    continue;
                }
                queue.push_back((n.node.id, depth + 1));
                out.push(Reached {
                    node: n.node,
                    distance: depth + 1,
                    relationship: n.relationship,
                });
            }
        }
        Ok(out)
    }

    fn dependency_walk(
        &self,
        entity: &str,
        relationships: Option<&str>,
        depth: u32,
        direction: Direction,
    ) -> GraphResult<DependencyResult> {
        let mut rels = relationship_filter(relationships)?;
        let seed = self.require_entity(entity, &[])?;
        if rels.is_empty() {
            rels = default_relationships(seed.kind);
        }
        let depth = clamp_depth(depth, self.settings.max_traversal_depth.min(MAX_TRAVERSAL_DEPTH));
        let max_results = self.settings.max_results;

        let mut results: Vec<DependencyHit> = self
            .walk(seed.id, direction, &rels, depth)?
            .into_iter()
            .map(|r| DependencyHit {
                qualified_name: r.node.display_name().to_string(),
                name: r.node.name,
                kind: r.node.kind,
                purpose: r.node.purpose,
                distance: r.distance,
                relationship: r.relationship,
            })
            .collect();
        let truncated = results.len() > max_results;
        results.truncate(max_results);

        Ok(DependencyResult {
            entity: EntitySummary::from_node(&seed, false),
            direction,
            relationships: rels,
            depth,
            results,
            truncated,
        })
    }

    /// What `entity` depends on, up to `depth` hops along outgoing edges.
    pub fn get_dependencies(&self, entity: &str, relationships: Option<&str>, depth: u32) -> GraphResult<DependencyResult> {
        self.dependency_walk(entity, relationships, depth, Direction::Outgoing)
    }

    /// What depends on `entity`, up to `depth` hops along incoming edges.
    pub fn get_dependents(&self, entity: &str, relationships: Option<&str>, depth: u32) -> GraphResult<DependencyResult> {
        self.dependency_walk(entity, relationships, depth, Direction::Incoming)
    }

    /// Import chains from or into a module.
    pub fn trace_imports(&self, module: &str, direction: TraceDirection, depth: u32) -> GraphResult<ImportTrace> {
        let seed = match self.store.find_by_qualified_name(module, &[NodeKind::Module])?.into_iter().next() {
            Some(m) => m,
            None => self
                .store
                .find_by_substring(module, &[NodeKind::Module], 1)?
                .into_iter()
                .next()
                .ok_or_else(|| crate::errors::GraphError::NotFound(module.to_string()))?,
        };
        let depth = clamp_depth(depth, self.settings.max_import_depth.min(MAX_IMPORT_DEPTH));
        let seed_name = seed.display_name().to_string();

        let directions: &[Direction] = match direction {
            TraceDirection::Outgoing => &[Direction::Outgoing],
            TraceDirection::Incoming => &[Direction::Incoming],
            TraceDirection::Both => &[Direction::Outgoing, Direction::Incoming],
        };

        let mut imports = Vec::new();
        let mut seen_edges: HashSet<(i64, i64)> = HashSet::new();
        for &dir in directions {
            let mut names: HashMap<i64, String> = HashMap::from([(seed.id, seed_name.clone())]);
            let mut visited: HashSet<i64> = HashSet::from([seed.id]);
            let mut queue: VecDeque<(i64, u32)> = VecDeque::from([(seed.id, 0)]);
            while let Some((current, d)) = queue.pop_front() {
                if d >= depth || visited.len() >= MAX_GRAPH_VISITED {
                    continue;
                }
                let current_name = names.get(&current).cloned().unwrap_or_default();
                for n in self.store.neighbors(current, dir, &[RelKind::Imports])? {
                    let other = n.node.display_name().to_string();
                    let (from_id, to_id, from_module, to_module) = match dir {
                        Direction::Outgoing => (current, n.node.id, current_name.clone(), other.clone()),
                        Direction::Incoming => (n.node.id, current, other.clone(), current_name.clone()),
                    };
                    if seen_edges.insert((from_id, to_id)) {
                        let props: ImportProps = n
                            .properties
                            .and_then(|p| serde_json::from_value(p).ok())
                            .unwrap_or_default();
                        imports.push(ImportEdgeRow {
                            from_module,
                            to_module,
                            depth: d + 1,
                            props,
                        });
                    }
                    if visited.insert(n.node.id) {
                        names.insert(n.node.id, other);
                        queue.push_back((n.node.id, d + 1));
                    }
                }
            }
        }

        Ok(ImportTrace {
            module: seed_name,
            direction,
            depth,
            imports,
        })
    }

    /// Direct neighbours of `entity`, outgoing first.
    pub fn find_related(
        &self,
        entity: &str,
        relationships: Option<&str>,
        direction: TraceDirection,
        target_kind: Option<NodeKind>,
        limit: usize,
    ) -> GraphResult<Vec<RelatedEntity>> {
        let rels = relationship_filter(relationships)?;
        let seed = self.require_entity(entity, &[])?;
        let limit = clamp_limit(if limit == 0 { DEFAULT_RELATED_LIMIT } else { limit }, MAX_SEARCH_LIMIT);

        let mut neighbours = Vec::new();
        if direction != TraceDirection::Incoming {
            neighbours.extend(self.store.neighbors(seed.id, Direction::Outgoing, &rels)?);
        }
        if direction != TraceDirection::Outgoing {
            neighbours.extend(self.store.neighbors(seed.id, Direction::Incoming, &rels)?);
        }

        Ok(neighbours
            .into_iter()
            .filter(|n| target_kind.map_or(true, |k| n.node.kind == k))
            .take(limit)
            .map(|n| RelatedEntity {
                entity: EntitySummary::from_node(&n.node, false),
                relationship: n.relationship,
                direction: n.direction,
                properties: n.properties,
            })
            .collect())
    }
}
