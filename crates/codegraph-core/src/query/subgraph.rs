//! Bidirectional subgraph slicing around one or more seed entities.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::GraphResult;
use crate::models::RelKind;
use crate::query::guards::{clamp_depth, clamp_limit, MAX_GRAPH_VISITED, MAX_SUBGRAPH_HOPS, MAX_SUBGRAPH_NODES};
use crate::query::{EntitySummary, QueryEngine};
use crate::store::{Direction, NodeRecord, QueryOps};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubgraphEdge {
    pub source: String,
    pub target: String,
    pub relationship: RelKind,
    pub properties: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub seeds: usize,
    pub hops: u32,
    pub truncated: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<EntitySummary>,
    pub edges: Vec<SubgraphEdge>,
    pub seeds_not_found: Vec<String>,
    pub stats: SubgraphStats,
}

impl QueryEngine {
    /// Nodes with a qualified name reachable from `seed` within `hops`
    /// along edges of one direction, in BFS discovery order. The walk passes
    /// through unnamed nodes without reporting them.
    fn reachable(&self, seed: i64, direction: Direction, hops: u32) -> GraphResult<Vec<NodeRecord>> {
        let mut visited: HashSet<i64> = HashSet::from([seed]);
        let mut queue: VecDeque<(i64, u32)> = VecDeque::from([(seed, 0)]);
        let mut out = Vec::new();
        while let Some((current, depth)) = queue.pop_front() {
            if depth >= hops {
                continue;
            }
            for n in self.store.neighbors(current, direction, &[])? {
                if visited.len() >= MAX_GRAPH_VISITED {
                    return Ok(out);
                }
                if !visited.insert(n.node.id) {
                    continue;
                }
                queue.push_back((n.node.id, depth + 1));
                if n.node.qualified_name.is_some() {
                    out.push(n.node);
                }
            }
        }
        Ok(out)
    }

    /// Induced subgraph around `seeds`: seeds first, then everything
    /// reachable forward or backward within `hops`, capped at `max_nodes`
    /// (seeds are never dropped), plus every stored edge between surviving
    /// nodes.
    pub fn get_subgraph(&self, seeds: &[String], hops: u32, max_nodes: usize) -> GraphResult<Subgraph> {
        let hops = clamp_depth(hops, MAX_SUBGRAPH_HOPS);
        let max_nodes = clamp_limit(max_nodes, MAX_SUBGRAPH_NODES);

        let mut nodes: IndexMap<i64, NodeRecord> = IndexMap::new();
        let mut seed_ids = Vec::new();
        let mut seeds_not_found = Vec::new();
        for seed in seeds {
            match self.resolve_entity(seed, &[])? {
                Some(node) => {
                    seed_ids.push(node.id);
                    nodes.entry(node.id).or_insert(node);
                }
                None => seeds_not_found.push(seed.clone()),
            }
        }

        let seed_count = nodes.len();

        for &seed in &seed_ids {
            for direction in [Direction::Outgoing, Direction::Incoming] {
                for node in self.reachable(seed, direction, hops)? {
                    nodes.entry(node.id).or_insert(node);
                }
            }
        }

        let cap = max_nodes.max(seed_count);
        let truncated = nodes.len() > cap;
        nodes.truncate(cap);

        let ids: Vec<i64> = nodes.keys().copied().collect();
        let edges: Vec<SubgraphEdge> = self
            .store
            .edges_among(&ids)?
            .into_iter()
            .filter_map(|e| {
                let source = nodes.get(&e.source_id)?.display_name().to_string();
                let target = nodes.get(&e.target_id)?.display_name().to_string();
                Some(SubgraphEdge {
                    source,
                    target,
                    relationship: e.relationship,
                    properties: e.properties,
                })
            })
            .collect();

        debug!(
            seeds = seed_ids.len(),
            nodes = nodes.len(),
            edges = edges.len(),
            truncated,
            "subgraph sliced"
        );

        let stats = SubgraphStats {
            nodes: nodes.len(),
            edges: edges.len(),
            seeds: seed_count,
            hops,
            truncated,
        };
        Ok(Subgraph {
            nodes: nodes
                .values()
                .map(|n| EntitySummary::from_node(n, n.kind.is_code_entity()))
                .collect(),
            edges,
            seeds_not_found,
            stats,
        })
    }
}
