//! Repository snapshots the pipeline reads from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::{GraphError, GraphResult};
use crate::indexer::filesystem::discover_python_files;

/// Yields the files of one repository snapshot.
pub trait SourceProvider: Send + Sync {
    /// Ordered, `/`-separated relative paths of every Python file.
    fn list_files(&self) -> GraphResult<Vec<String>>;

    fn read_file(&self, path: &str) -> GraphResult<String>;

    /// Short description recorded in the index state.
    fn describe(&self) -> String;
}

/// A checkout on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalRepository {
    root: PathBuf,
    exclude_patterns: Vec<String>,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>, exclude_patterns: Vec<String>) -> Self {
        Self {
            root: root.into(),
            exclude_patterns,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceProvider for LocalRepository {
    fn list_files(&self) -> GraphResult<Vec<String>> {
        if !self.root.is_dir() {
            return Err(GraphError::Config(format!(
                "repository root is not a directory: {}",
                self.root.display()
            )));
        }
        discover_python_files(&self.root, &self.exclude_patterns)
    }

    fn read_file(&self, path: &str) -> GraphResult<String> {
        let bytes = std::fs::read(self.root.join(path))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Fixed set of files held in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemorySource {
    files: BTreeMap<String, String>,
}

impl InMemorySource {
    pub fn new<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: Into<String>,
        C: Into<String>,
    {
        Self {
            files: files.into_iter().map(|(p, c)| (p.into(), c.into())).collect(),
        }
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(path)
    }
}

impl SourceProvider for InMemorySource {
    fn list_files(&self) -> GraphResult<Vec<String>> {
        Ok(self.files.keys().filter(|p| p.ends_with(".py")).cloned().collect())
    }

    fn read_file(&self, path: &str) -> GraphResult<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(path.to_string()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
