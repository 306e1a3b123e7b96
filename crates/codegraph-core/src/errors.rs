//! Error types for the codegraph core library.

/// Top-level error enum for the codegraph core library.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Query error: {0}")]
    Query(String),

    /// A caller-supplied query was refused before it reached the store.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Relationship filter contained tokens outside the whitelist.
    #[error("Invalid relationship type(s): {}", .0.join(", "))]
    InvalidRelationship(Vec<String>),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Job error: {0}")]
    Job(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] ignore::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl GraphError {
    /// Whether this error came out of a query guard rather than the store.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GraphError::InvalidQuery(_) | GraphError::InvalidRelationship(_)
        )
    }
}

pub type GraphResult<T> = Result<T, GraphError>;
