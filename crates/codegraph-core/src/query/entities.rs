//! Entity lookup: single-entity resolution with an ordered fallback chain,
//! and multi-result search in four modes.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{GraphError, GraphResult};
use crate::models::NodeKind;
use crate::query::guards::{clamp_limit, truncate_query, DEFAULT_FIND_LIMIT, MAX_SEARCH_LIMIT};
use crate::query::{EntitySummary, QueryEngine, ENTITY_KINDS};
use crate::store::{NodeOps, NodeRecord, QueryOps};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindMode {
    #[default]
    Exact,
    Fuzzy,
    Semantic,
    Hybrid,
}

impl FromStr for FindMode {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(FindMode::Exact),
            "fuzzy" => Ok(FindMode::Fuzzy),
            "semantic" => Ok(FindMode::Semantic),
            "hybrid" => Ok(FindMode::Hybrid),
            other => Err(GraphError::Query(format!("unknown search mode: {other}"))),
        }
    }
}

impl fmt::Display for FindMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FindMode::Exact => "exact",
            FindMode::Fuzzy => "fuzzy",
            FindMode::Semantic => "semantic",
            FindMode::Hybrid => "hybrid",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindRequest {
    pub name: String,
    /// Empty means Function, Class and Module.
    pub kinds: Vec<NodeKind>,
    pub mode: FindMode,
    pub include_source: bool,
    pub limit: usize,
}

impl FindRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kinds: Vec::new(),
            mode: FindMode::Exact,
            include_source: false,
            limit: DEFAULT_FIND_LIMIT,
        }
    }

    pub fn mode(mut self, mode: FindMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    #[serde(flatten)]
    pub entity: EntitySummary,
    /// Which lookup produced the match.
    pub matched_by: FindMode,
    /// Similarity for semantic matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

fn kinds_or_default(kinds: &[NodeKind]) -> &[NodeKind] {
    if kinds.is_empty() {
        &ENTITY_KINDS
    } else {
        kinds
    }
}

impl QueryEngine {
    /// Resolve a caller-supplied name to one entity: exact qualified name,
    /// then exact simple name, then case-insensitive simple name, then the
    /// nearest vector match when an embedder is configured.
    pub fn resolve_entity(&self, name: &str, kinds: &[NodeKind]) -> GraphResult<Option<NodeRecord>> {
        let name = truncate_query(name);
        if name.is_empty() {
            return Ok(None);
        }
        let kinds = kinds_or_default(kinds);

        if let Some(hit) = self.store.find_by_qualified_name(name, kinds)?.into_iter().next() {
            return Ok(Some(hit));
        }
        if let Some(hit) = self.store.find_by_name(name, kinds, false, 1)?.into_iter().next() {
            return Ok(Some(hit));
        }
        if let Some(hit) = self.store.find_by_name(name, kinds, true, 1)?.into_iter().next() {
            return Ok(Some(hit));
        }
        if self.embedder.is_some() {
            let vector_kinds: Vec<NodeKind> = kinds.iter().copied().filter(|k| k.is_code_entity()).collect();
            if !vector_kinds.is_empty() {
                if let Some(hit) = self.vector_search(name, &vector_kinds, 1, false)?.into_iter().next() {
                    debug!(name, resolved = %hit.entity.qualified_name, "resolved by vector match");
                    return self.store.get_node(hit.entity.id);
                }
            }
        }
        Ok(None)
    }

    /// Like [`QueryEngine::resolve_entity`] but a miss is an error.
    pub fn require_entity(&self, name: &str, kinds: &[NodeKind]) -> GraphResult<NodeRecord> {
        self.resolve_entity(name, kinds)?
            .ok_or_else(|| GraphError::NotFound(name.to_string()))
    }

    pub fn find_entity(&self, request: &FindRequest) -> GraphResult<Vec<EntityMatch>> {
        let name = truncate_query(&request.name);
        if name.is_empty() {
            return Ok(Vec::new());
        }
        let kinds = kinds_or_default(&request.kinds);
        let limit = clamp_limit(request.limit, MAX_SEARCH_LIMIT);
        let include_source = request.include_source;

        let mut out = match request.mode {
            FindMode::Exact => self.exact_matches(name, kinds, limit, include_source)?,
            FindMode::Fuzzy => self.fuzzy_matches(name, kinds, limit, include_source)?,
            FindMode::Semantic => self.semantic_matches(name, kinds, limit, include_source)?,
            FindMode::Hybrid => {
                let mut all = self.exact_matches(name, kinds, limit, include_source)?;
                all.extend(self.fuzzy_matches(name, kinds, limit, include_source)?);
                if self.embedder.is_some() {
                    all.extend(self.semantic_matches(name, kinds, limit, include_source)?);
                }
                all
            }
        };

        let mut seen = HashSet::new();
        out.retain(|m| seen.insert(m.entity.qualified_name.clone()));
        out.truncate(limit);
        Ok(out)
    }

    fn exact_matches(
        &self,
        name: &str,
        kinds: &[NodeKind],
        limit: usize,
        include_source: bool,
    ) -> GraphResult<Vec<EntityMatch>> {
        let mut nodes = self.store.find_by_qualified_name(name, kinds)?;
        nodes.extend(self.store.find_by_name(name, kinds, false, limit)?);
        Ok(nodes
            .iter()
            .map(|n| EntityMatch {
                entity: EntitySummary::from_node(n, include_source),
                matched_by: FindMode::Exact,
                score: None,
            })
            .collect())
    }

    fn fuzzy_matches(
        &self,
        name: &str,
        kinds: &[NodeKind],
        limit: usize,
        include_source: bool,
    ) -> GraphResult<Vec<EntityMatch>> {
        Ok(self
            .store
            .find_by_substring(name, kinds, limit)?
            .iter()
            .map(|n| EntityMatch {
                entity: EntitySummary::from_node(n, include_source),
                matched_by: FindMode::Fuzzy,
                score: None,
            })
            .collect())
    }

    fn semantic_matches(
        &self,
        name: &str,
        kinds: &[NodeKind],
        limit: usize,
        include_source: bool,
    ) -> GraphResult<Vec<EntityMatch>> {
        Ok(self
            .vector_search(name, kinds, limit, include_source)?
            .into_iter()
            .map(|hit| EntityMatch {
                entity: hit.entity,
                matched_by: FindMode::Semantic,
                score: Some(hit.score),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::QueryConfig;
    use crate::indexer::extractor::extract_file;
    use crate::indexer::updater::apply_file;
    use crate::store::GraphStore;

    fn engine() -> QueryEngine {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        apply_file(
            &store,
            &extract_file(
                "shop/cart.py",
                "class Cart:\n    def add_item(self, item):\n        return item\n\ndef checkout(cart):\n    return cart\n",
            ),
        )
        .unwrap();
        QueryEngine::new(store, QueryConfig::default())
    }

    #[test]
    fn test_resolve_entity_fallback_chain() {
        let e = engine();
        assert_eq!(e.resolve_entity("shop.cart.Cart", &[]).unwrap().unwrap().name, "Cart");
        assert_eq!(
            e.resolve_entity("checkout", &[]).unwrap().unwrap().qualified_name.as_deref(),
            Some("shop.cart.checkout")
        );
        assert_eq!(e.resolve_entity("CART", &[]).unwrap().unwrap().name, "Cart");
        assert!(e.resolve_entity("missing", &[]).unwrap().is_none());
        assert!(matches!(e.require_entity("missing", &[]), Err(GraphError::NotFound(_))));
    }

    #[test]
    fn test_resolve_entity_honours_kinds() {
        let e = engine();
        assert!(e.resolve_entity("Cart", &[NodeKind::Function]).unwrap().is_none());
        assert_eq!(e.resolve_entity("shop.cart", &[]).unwrap().unwrap().kind, NodeKind::Module);
    }

    #[test]
    fn test_find_entity_modes() {
        let e = engine();
        let exact = e.find_entity(&FindRequest::new("add_item")).unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].entity.qualified_name, "shop.cart.Cart.add_item");

        let fuzzy = e.find_entity(&FindRequest::new("ITEM").mode(FindMode::Fuzzy)).unwrap();
        assert_eq!(fuzzy.len(), 1);

        let hybrid = e.find_entity(&FindRequest::new("Cart").mode(FindMode::Hybrid)).unwrap();
        let names: Vec<&str> = hybrid.iter().map(|m| m.entity.qualified_name.as_str()).collect();
        assert_eq!(names[0], "shop.cart.Cart");
        assert_eq!(names.iter().filter(|n| **n == "shop.cart.Cart").count(), 1);
        assert!(names.contains(&"shop.cart"));
    }

    #[test]
    fn test_find_mode_parsing() {
        assert_eq!("Hybrid".parse::<FindMode>().unwrap(), FindMode::Hybrid);
        assert!("nope".parse::<FindMode>().is_err());
    }
}
