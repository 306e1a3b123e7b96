//! Prompt text sent to the enrichment oracle.

use crate::enrichment::model::{EnrichmentRequest, StructuralContext};
use crate::models::NodeKind;

pub const DESIGN_PATTERNS: [&str; 16] = [
    "singleton",
    "factory",
    "builder",
    "observer",
    "decorator",
    "strategy",
    "template_method",
    "dependency_injection",
    "middleware",
    "mixin",
    "registry",
    "facade",
    "adapter",
    "proxy",
    "chain_of_responsibility",
    "command",
];

pub const DOMAIN_CONCEPTS: [&str; 17] = [
    "routing",
    "validation",
    "middleware",
    "authentication",
    "authorization",
    "dependency_injection",
    "serialization",
    "error_handling",
    "request_processing",
    "response_building",
    "websocket",
    "cors",
    "testing",
    "configuration",
    "lifecycle",
    "openapi",
    "documentation",
];

pub const SIDE_EFFECTS: [&str; 5] = [
    "modifies_state",
    "io_operation",
    "raises_exception",
    "network_call",
    "database_write",
];

const MAX_PROMPT_ATTRIBUTES: usize = 20;
const MAX_PROMPT_CALLS: usize = 15;
const MAX_PROMPT_CALLERS: usize = 10;

/// System prompt shared by every request.
pub fn system_prompt() -> String {
    format!(
        "You are a code analysis expert. Given a Python code entity (function or class) \
with its context, produce a structured analysis as a single JSON object.\n\n\
Valid design patterns: {}.\n\n\
Valid domain concepts: {}.\n\n\
Typical side effects: {}.\n\n\
For data_flows_to: identify other functions or classes that this entity sends data to, \
for example a return value consumed by another function, data passed through a callback, \
shared state read by another entity, or a request object transformed for a downstream step.",
        DESIGN_PATTERNS.join(", "),
        DOMAIN_CONCEPTS.join(", "),
        SIDE_EFFECTS.join(", "),
    )
}

/// JSON shape the oracle must answer with for `kind`.
pub fn response_schema(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Class => {
            r#"Respond with JSON: {"purpose": one line, "summary": 2-3 sentences, "design_patterns": [..], "role": one of controller|model|service|utility|base_class|mixin|protocol|other, "key_methods": [..], "collaborators": [class names], "domain_concepts": [..], "data_flows_to": [names]}"#
        }
        _ => {
            r#"Respond with JSON: {"purpose": one line, "summary": 2-3 sentences, "design_patterns": [..], "complexity": one of low|medium|high, "side_effects": [..], "domain_concepts": [..], "parameters_explained": [{"name": .., "explanation": ..}], "data_flows_to": [names]}"#
        }
    }
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Class => "class",
        _ => "function",
    }
}

fn name_type_default(name: &str, type_annotation: Option<&str>, default_value: Option<&str>) -> String {
    let mut s = name.to_string();
    if let Some(t) = type_annotation.filter(|t| !t.is_empty()) {
        s.push_str(": ");
        s.push_str(t);
    }
    if let Some(d) = default_value.filter(|d| !d.is_empty()) {
        s.push_str(" = ");
        s.push_str(d);
    }
    s
}

fn context_lines(ctx: &StructuralContext, out: &mut Vec<String>) {
    if ctx.is_async {
        out.push("This is an async function.".to_string());
    }
    if let Some(doc) = ctx.docstring.as_deref().filter(|d| !d.is_empty()) {
        out.push(format!("Docstring: {doc}"));
    }
    if !ctx.decorators.is_empty() {
        out.push(format!("Decorators: {}", ctx.decorators.join(", ")));
    }
    if !ctx.parameters.is_empty() {
        let params: Vec<String> = ctx
            .parameters
            .iter()
            .map(|p| {
                let mut s = name_type_default(&p.name, p.type_annotation.as_deref(), p.default_value.as_deref());
                if !p.kind.is_empty() && p.kind != "positional_or_keyword" {
                    s.push_str(&format!("  [{}]", p.kind));
                }
                s
            })
            .collect();
        out.push(format!("Parameters: {}", params.join(", ")));
    }
    if !ctx.bases.is_empty() {
        out.push(format!("Inherits from: {}", ctx.bases.join(", ")));
    }
    if !ctx.attributes.is_empty() {
        let attrs: Vec<String> = ctx
            .attributes
            .iter()
            .take(MAX_PROMPT_ATTRIBUTES)
            .map(|a| name_type_default(&a.name, a.type_annotation.as_deref(), a.default_value.as_deref()))
            .collect();
        out.push(format!("Class attributes: {}", attrs.join(", ")));
    }
    if !ctx.methods.is_empty() {
        out.push(format!("Methods ({}): {}", ctx.methods.len(), ctx.methods.join(", ")));
    }
    if !ctx.nested_functions.is_empty() {
        out.push(format!("Nested functions: {}", ctx.nested_functions.join(", ")));
    }
    if let Some(parent) = &ctx.parent_class {
        out.push(format!("This is a method of class: {parent}"));
    }
    if let Some(parent) = &ctx.parent_function {
        out.push(format!("This is a nested function inside: {parent}"));
    }
    if !ctx.calls.is_empty() {
        let calls: Vec<&str> = ctx.calls.iter().take(MAX_PROMPT_CALLS).map(String::as_str).collect();
        out.push(format!("Calls: {}", calls.join(", ")));
    }
    if !ctx.callers.is_empty() {
        let callers: Vec<&str> = ctx.callers.iter().take(MAX_PROMPT_CALLERS).map(String::as_str).collect();
        out.push(format!("Called by: {}", callers.join(", ")));
    }
}

/// User prompt for one entity.
pub fn build_prompt(request: &EnrichmentRequest) -> String {
    let mut parts = vec![
        format!("Analyze this Python {}:\n", kind_label(request.kind)),
        format!("```python\n{}\n```\n", request.source),
    ];
    let mut lines = Vec::new();
    context_lines(&request.context, &mut lines);
    parts.extend(lines.into_iter().map(|l| format!("{l}\n")));
    parts.push(response_schema(request.kind).to_string());
    parts.join("\n")
}
