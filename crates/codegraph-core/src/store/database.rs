//! SQLite-backed property graph store.
//!
//! [`GraphStore`] owns one connection behind a re-entrant mutex. Operation
//! groups live in sibling modules as traits ([`NodeOps`](super::NodeOps),
//! [`EdgeOps`](super::EdgeOps), [`EnrichmentOps`](super::EnrichmentOps),
//! [`QueryOps`](super::QueryOps)); each call locks the connection, and
//! [`GraphStore::in_transaction`] lets one thread group several calls under
//! a single SAVEPOINT.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::errors::{GraphError, GraphResult};
use crate::models::IndexState;
use crate::store::schema;

const INDEX_STATE_KEY: &str = "index_state";

// ---------------------------------------------------------------------------
// Helper: tilde expansion
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// GraphStore
// ---------------------------------------------------------------------------

pub struct GraphStore {
    conn: ReentrantMutex<Connection>,
    db_path: Option<PathBuf>,
}

impl GraphStore {
    /// Open (creating if needed) a file-backed store and bring its schema up
    /// to date. Parent directories are created.
    pub fn open(db_path: &Path) -> GraphResult<Self> {
        let expanded = expand_tilde(&db_path.to_string_lossy());
        if let Some(parent) = expanded.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&expanded)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let store = Self::from_connection(conn, Some(expanded))?;
        info!(path = ?store.db_path, "opened graph store");
        Ok(store)
    }

    /// Throwaway store for tests and one-shot runs.
    pub fn open_in_memory() -> GraphResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    /// Open the store named by a config path; `:memory:` selects an
    /// in-memory store.
    pub fn open_configured(config: &crate::config::StorageConfig) -> GraphResult<Self> {
        if config.db_path == ":memory:" {
            return Self::open_in_memory();
        }
        let store = Self::open(Path::new(&config.db_path))?;
        store.with_conn(|c| {
            c.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
            Ok(())
        })?;
        Ok(store)
    }

    fn from_connection(conn: Connection, db_path: Option<PathBuf>) -> GraphResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: ReentrantMutex::new(conn),
            db_path,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run `f` with the locked connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> GraphResult<T>) -> GraphResult<T> {
        let guard = self.conn.lock();
        f(&guard)
    }

    /// Run `f` atomically. Nested calls on the same thread nest as
    /// savepoints; other threads block until the outermost call returns.
    pub fn in_transaction<T>(&self, f: impl FnOnce() -> GraphResult<T>) -> GraphResult<T> {
        let guard = self.conn.lock();
        guard.execute_batch("SAVEPOINT codegraph_tx;")?;
        match f() {
            Ok(value) => {
                guard.execute_batch("RELEASE SAVEPOINT codegraph_tx;")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) =
                    guard.execute_batch("ROLLBACK TO SAVEPOINT codegraph_tx; RELEASE SAVEPOINT codegraph_tx;")
                {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Remove every node and edge. The enrichment cache survives: it is keyed
    /// by content and stays valid across rebuilds.
    pub fn clear_graph(&self) -> GraphResult<()> {
        self.in_transaction(|| {
            self.with_conn(|conn| {
                conn.execute_batch("DELETE FROM edges; DELETE FROM embeddings; DELETE FROM nodes;")?;
                Ok(())
            })
        })?;
        debug!("graph cleared");
        Ok(())
    }

    /// Copy the database to `destination` using the SQLite backup API.
    pub fn backup_to(&self, destination: &Path) -> GraphResult<PathBuf> {
        let resolved = expand_tilde(&destination.to_string_lossy());
        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.with_conn(|src| {
            let mut dst = Connection::open(&resolved)?;
            let backup = rusqlite::backup::Backup::new(src, &mut dst)?;
            backup.run_to_completion(100, Duration::from_millis(10), None)?;
            Ok(())
        })?;
        Ok(resolved)
    }

    // -----------------------------------------------------------------------
    // repo_meta
    // -----------------------------------------------------------------------

    pub fn set_meta(&self, key: &str, value: &str) -> GraphResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO repo_meta(key, value) VALUES(?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
                params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn get_meta(&self, key: &str) -> GraphResult<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM repo_meta WHERE key = ?1;",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    pub fn index_state(&self) -> GraphResult<Option<IndexState>> {
        match self.get_meta(INDEX_STATE_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn update_index_state(&self, mut state: IndexState) -> GraphResult<()> {
        state.updated_at = Some(chrono::Utc::now());
        self.set_meta(INDEX_STATE_KEY, &serde_json::to_string(&state)?)
    }

    pub fn schema_version(&self) -> GraphResult<i32> {
        self.with_conn(|conn| Ok(schema::get_schema_version(conn)))
    }
}

/// Map a rusqlite "no rows" into `None`, passing other errors through.
pub(crate) fn optional_row<T>(result: rusqlite::Result<T>) -> GraphResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(GraphError::from(e)),
    }
}
