//! Extraction output: one file's entities as a flat arena with parent
//! indices, plus its import records.

use serde::{Deserialize, Serialize};

use crate::models::{ImportProps, NodeKind, ParameterKind};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedParameter {
    pub name: String,
    pub type_annotation: Option<String>,
    pub default_value: Option<String>,
    pub kind: ParameterKind,
    pub position: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDecorator {
    /// Dotted callee, e.g. `app.route`.
    pub name: String,
    /// Call arguments without the parentheses; `None` for a bare decorator.
    pub arguments: Option<String>,
}

impl ExtractedDecorator {
    pub fn render(&self) -> String {
        match &self.arguments {
            Some(args) => format!("{}({})", self.name, args),
            None => self.name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedAttribute {
    pub name: String,
    pub type_annotation: Option<String>,
    pub default_value: Option<String>,
    pub lineno: usize,
}

/// Fields only a function carries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDetails {
    pub is_async: bool,
    pub is_method: bool,
    pub is_nested: bool,
    pub parameters: Vec<ExtractedParameter>,
    pub return_annotation: Option<String>,
    /// Unresolved callee names, sorted and unique.
    pub calls: Vec<String>,
}

/// Fields only a class carries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDetails {
    /// Unresolved base names (bare last segment).
    pub bases: Vec<String>,
    pub attributes: Vec<ExtractedAttribute>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityDetails {
    Class(ClassDetails),
    Function(FunctionDetails),
}

/// One Class or Function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub qualified_name: String,
    /// Index of the enclosing entity in [`FileExtraction::entities`];
    /// `None` for module-level definitions.
    pub parent: Option<usize>,
    pub lineno_start: usize,
    pub lineno_end: usize,
    /// Dedented span from the first decorator line to the end of the body.
    pub source: String,
    pub content_hash: String,
    pub docstring: Option<String>,
    pub decorators: Vec<ExtractedDecorator>,
    pub details: EntityDetails,
}

impl ExtractedEntity {
    pub fn kind(&self) -> NodeKind {
        match self.details {
            EntityDetails::Class(_) => NodeKind::Class,
            EntityDetails::Function(_) => NodeKind::Function,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionDetails> {
        match &self.details {
            EntityDetails::Function(f) => Some(f),
            EntityDetails::Class(_) => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassDetails> {
        match &self.details {
            EntityDetails::Class(c) => Some(c),
            EntityDetails::Function(_) => None,
        }
    }
}

/// One import, already resolved to an absolute target module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedImport {
    pub module: String,
    pub lineno: usize,
    pub props: ImportProps,
}

/// Everything extracted from one file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExtraction {
    pub file_path: String,
    pub module_name: String,
    pub is_package: bool,
    pub file_hash: String,
    /// Set when the file failed to parse; `entities` and `imports` are then empty.
    pub parse_error: Option<String>,
    /// Pre-order: every parent precedes its children.
    pub entities: Vec<ExtractedEntity>,
    pub imports: Vec<ExtractedImport>,
}

impl FileExtraction {
    /// Indices of the direct children of `parent` (`None` = module level).
    pub fn children_of(&self, parent: Option<usize>) -> impl Iterator<Item = usize> + '_ {
        self.entities
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.parent == parent)
            .map(|(i, _)| i)
    }

    /// Indices of `root` and every entity below it, in pre-order.
    pub fn subtree(&self, root: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            out.push(idx);
            let kids: Vec<usize> = self.children_of(Some(idx)).collect();
            stack.extend(kids.into_iter().rev());
        }
        out
    }

    pub fn find(&self, qualified_name: &str) -> Option<usize> {
        self.entities
            .iter()
            .position(|e| e.qualified_name == qualified_name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &ExtractedEntity> {
        self.entities
            .iter()
            .filter(|e| e.kind() == NodeKind::Function)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ExtractedEntity> {
        self.entities.iter().filter(|e| e.kind() == NodeKind::Class)
    }
}
