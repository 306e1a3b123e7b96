//! Request and response shapes exchanged with the enrichment oracle.

use serde::{Deserialize, Serialize};

use crate::models::NodeKind;

pub const COMPLEXITY_LEVELS: [&str; 3] = ["low", "medium", "high"];

pub const CLASS_ROLES: [&str; 8] = [
    "controller",
    "model",
    "service",
    "utility",
    "base_class",
    "mixin",
    "protocol",
    "other",
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterExplanation {
    pub name: String,
    pub explanation: String,
}

/// Semantic annotation of one Function or Class. Function-only and
/// class-only fields stay empty for the other kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Enrichment {
    pub purpose: String,
    pub summary: String,
    pub complexity: Option<String>,
    pub design_patterns: Vec<String>,
    pub domain_concepts: Vec<String>,
    pub data_flows_to: Vec<String>,
    pub side_effects: Vec<String>,
    pub parameters_explained: Vec<ParameterExplanation>,
    pub role: Option<String>,
    pub key_methods: Vec<String>,
    pub collaborators: Vec<String>,
}

impl Enrichment {
    /// Minimal annotation used when the oracle is exhausted.
    pub fn fallback(kind: NodeKind, docstring: Option<&str>) -> Self {
        let purpose = docstring
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or("Unable to enrich")
            .to_string();
        let mut out = Enrichment {
            purpose,
            ..Enrichment::default()
        };
        if kind == NodeKind::Class {
            out.role = Some("other".to_string());
        } else {
            out.complexity = Some("low".to_string());
        }
        out
    }

    /// Lower-case the enumerated fields, drop values outside their
    /// vocabulary, and trim and de-duplicate tag lists.
    pub fn normalized(mut self, kind: NodeKind) -> Self {
        self.complexity = self
            .complexity
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| COMPLEXITY_LEVELS.contains(&c.as_str()));
        self.role = self
            .role
            .map(|r| r.trim().to_ascii_lowercase())
            .filter(|r| CLASS_ROLES.contains(&r.as_str()));

        for list in [
            &mut self.design_patterns,
            &mut self.domain_concepts,
            &mut self.side_effects,
        ] {
            clean_tags(list, true);
        }
        for list in [
            &mut self.data_flows_to,
            &mut self.key_methods,
            &mut self.collaborators,
        ] {
            clean_tags(list, false);
        }

        match kind {
            NodeKind::Class => {
                self.side_effects.clear();
                self.parameters_explained.clear();
            }
            _ => {
                self.role = None;
                self.key_methods.clear();
                self.collaborators.clear();
            }
        }
        self
    }
}

fn clean_tags(list: &mut Vec<String>, lowercase: bool) {
    let mut seen = Vec::with_capacity(list.len());
    for tag in list.drain(..) {
        let tag = tag.trim();
        let tag = if lowercase {
            tag.to_ascii_lowercase()
        } else {
            tag.to_string()
        };
        if !tag.is_empty() && !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    *list = seen;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterContext {
    pub name: String,
    pub type_annotation: Option<String>,
    pub default_value: Option<String>,
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeContext {
    pub name: String,
    pub type_annotation: Option<String>,
    pub default_value: Option<String>,
}

/// What the graph knows around an entity, gathered before the oracle call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralContext {
    pub is_async: bool,
    pub docstring: Option<String>,
    /// Rendered as `name(args)`.
    pub decorators: Vec<String>,
    pub parameters: Vec<ParameterContext>,
    pub bases: Vec<String>,
    pub attributes: Vec<AttributeContext>,
    pub methods: Vec<String>,
    pub nested_functions: Vec<String>,
    pub parent_class: Option<String>,
    pub parent_function: Option<String>,
    pub calls: Vec<String>,
    pub callers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub kind: NodeKind,
    pub qualified_name: String,
    pub source: String,
    pub context: StructuralContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_uses_docstring_or_placeholder() {
        let f = Enrichment::fallback(NodeKind::Function, Some("  Adds numbers. "));
        assert_eq!(f.purpose, "Adds numbers.");
        assert_eq!(f.complexity.as_deref(), Some("low"));
        assert!(f.role.is_none());

        let c = Enrichment::fallback(NodeKind::Class, None);
        assert_eq!(c.purpose, "Unable to enrich");
        assert_eq!(c.role.as_deref(), Some("other"));
        assert!(c.complexity.is_none());
    }

    #[test]
    fn test_normalized_filters_vocabularies_and_kind_fields() {
        let raw = Enrichment {
            purpose: "p".into(),
            complexity: Some(" High ".into()),
            design_patterns: vec!["Factory".into(), "factory".into(), " ".into()],
            role: Some("service".into()),
            key_methods: vec!["run".into()],
            side_effects: vec!["io_operation".into()],
            ..Enrichment::default()
        };
        let f = raw.clone().normalized(NodeKind::Function);
        assert_eq!(f.complexity.as_deref(), Some("high"));
        assert_eq!(f.design_patterns, vec!["factory"]);
        assert!(f.role.is_none());
        assert!(f.key_methods.is_empty());
        assert_eq!(f.side_effects, vec!["io_operation"]);

        let c = raw.normalized(NodeKind::Class);
        assert_eq!(c.role.as_deref(), Some("service"));
        assert!(c.side_effects.is_empty());

        let odd = Enrichment {
            complexity: Some("extreme".into()),
            ..Enrichment::default()
        };
        assert!(odd.normalized(NodeKind::Function).complexity.is_none());
    }

    #[test]
    fn test_enrichment_deserializes_partial_payload() {
        let e: Enrichment = serde_json::from_str(
            r#"{"purpose": "x", "parameters_explained": [{"name": "a", "explanation": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(e.purpose, "x");
        assert_eq!(e.parameters_explained[0].name, "a");
        assert!(e.design_patterns.is_empty());
    }
}
