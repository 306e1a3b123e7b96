//! Persistent configuration for the indexer.
//!
//! Loaded from TOML (`$CODEGRAPH_CONFIG`, else `./codegraph.toml`), then
//! patched by `CODEGRAPH_*` environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{GraphError, GraphResult};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub storage: StorageConfig,
    pub ingestion: IngestionConfig,
    pub enrichment: EnrichmentConfig,
    pub embedding: EmbeddingConfig,
    pub query: QueryConfig,
    pub logging: LoggingConfig,
}

impl IndexerConfig {
    /// Load configuration from the given path.
    pub fn load(path: &Path) -> GraphResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to the given path.
    pub fn save(&self, path: &Path) -> GraphResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from the default path (or defaults if it doesn't exist), then
    /// apply environment overrides.
    pub fn load_or_default() -> GraphResult<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `$CODEGRAPH_CONFIG`, else `codegraph.toml` in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os("CODEGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("codegraph.toml"))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the process environment in
    /// production).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CODEGRAPH_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Some(n) = lookup("CODEGRAPH_MAX_WORKERS").and_then(|v| v.trim().parse().ok()) {
            self.ingestion.max_workers = n;
        }
        if let Some(v) = lookup("CODEGRAPH_ENRICHMENT") {
            self.enrichment.enabled = env_flag(&v);
        }
        if let Some(v) = lookup("CODEGRAPH_EMBEDDINGS") {
            self.embedding.enabled = env_flag(&v);
        }
        if let Some(v) = lookup("CODEGRAPH_ORACLE_URL") {
            self.enrichment.base_url = v;
        }
        if let Some(v) = lookup("CODEGRAPH_ORACLE_MODEL") {
            self.enrichment.model = v;
        }
        if let Some(v) = lookup("CODEGRAPH_EMBEDDING_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = lookup("CODEGRAPH_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.ingestion.max_workers == 0 {
            return Err(GraphError::Config("ingestion.max_workers must be > 0".into()));
        }
        if self.enrichment.batch_size == 0 || self.embedding.batch_size == 0 {
            return Err(GraphError::Config("batch sizes must be > 0".into()));
        }
        if self.enrichment.max_retries == 0 {
            return Err(GraphError::Config("enrichment.max_retries must be > 0".into()));
        }
        if self.query.max_results == 0 {
            return Err(GraphError::Config("query.max_results must be > 0".into()));
        }
        Ok(())
    }
}

/// Env flags are on unless explicitly switched off.
pub fn env_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file; `:memory:` for a throwaway store.
    pub db_path: String,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: ".codegraph/graph.db".to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Files extracted concurrently.
    pub max_workers: usize,
    /// Extra globs skipped when walking a local repository.
    pub exclude_patterns: Vec<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            exclude_patterns: vec![
                "**/.venv/**".to_string(),
                "**/venv/**".to_string(),
                "**/__pycache__/**".to_string(),
                "**/node_modules/**".to_string(),
            ],
        }
    }
}

/// Enrichment oracle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    /// Name of the env var holding the API key.
    pub api_key_env: String,
    pub batch_size: usize,
    pub max_retries: u32,
    /// Backoff before retry `n` is `retry_backoff_ms * n`.
    pub retry_backoff_ms: u64,
    /// Concurrent oracle calls.
    pub workers: usize,
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 30,
            max_retries: 3,
            retry_backoff_ms: 1_000,
            workers: 8,
            timeout_secs: 60,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimensions: 1536,
            batch_size: 50,
            timeout_secs: 60,
        }
    }
}

/// Retrieval limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub max_traversal_depth: u32,
    pub max_import_depth: u32,
    pub max_results: usize,
    pub vector_top_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_traversal_depth: 3,
            max_import_depth: 5,
            max_results: 50,
            vector_top_k: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `CODEGRAPH_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "codegraph_core=info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let config = IndexerConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: IndexerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.ingestion.max_workers, 10);
        assert_eq!(parsed.enrichment.batch_size, 30);
        assert_eq!(parsed.embedding.batch_size, 50);
        assert_eq!(parsed.query.max_traversal_depth, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults_for_missing_fields() {
        let partial = r#"
[enrichment]
max_retries = 5

[query]
max_results = 20
"#;
        let config: IndexerConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.enrichment.max_retries, 5);
        assert_eq!(config.enrichment.batch_size, 30);
        assert_eq!(config.query.max_results, 20);
        assert_eq!(config.query.vector_top_k, 10);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("codegraph.toml");

        let mut config = IndexerConfig::default();
        config.storage.db_path = "/tmp/x.db".into();
        config.ingestion.max_workers = 3;
        config.save(&path).unwrap();

        let loaded = IndexerConfig::load(&path).unwrap();
        assert_eq!(loaded.storage.db_path, "/tmp/x.db");
        assert_eq!(loaded.ingestion.max_workers, 3);
    }

    #[test]
    fn test_load_nonexistent_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(IndexerConfig::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CODEGRAPH_DB_PATH", "/data/g.db"),
            ("CODEGRAPH_MAX_WORKERS", "4"),
            ("CODEGRAPH_ENRICHMENT", "off"),
            ("CODEGRAPH_EMBEDDINGS", "yes"),
            ("CODEGRAPH_ORACLE_MODEL", "local-model"),
        ]
        .into_iter()
        .collect();

        let mut config = IndexerConfig::default();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.storage.db_path, "/data/g.db");
        assert_eq!(config.ingestion.max_workers, 4);
        assert!(!config.enrichment.enabled);
        assert!(config.embedding.enabled);
        assert_eq!(config.enrichment.model, "local-model");
    }

    #[test]
    fn test_unparseable_worker_count_is_ignored() {
        let mut config = IndexerConfig::default();
        config.apply_overrides_from(|k| (k == "CODEGRAPH_MAX_WORKERS").then(|| "many".into()));
        assert_eq!(config.ingestion.max_workers, 10);
    }

    #[test]
    fn test_env_flag() {
        for off in ["0", "false", "No", " OFF "] {
            assert!(!env_flag(off), "{off}");
        }
        for on in ["1", "true", "yes", "anything"] {
            assert!(env_flag(on), "{on}");
        }
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = IndexerConfig::default();
        config.ingestion.max_workers = 0;
        assert!(matches!(config.validate(), Err(GraphError::Config(_))));
    }
}
