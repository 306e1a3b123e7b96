//! SQLite schema DDL and migration framework.
//!
//! The property graph is one `nodes` table and one `edges` table. Every
//! uniqueness rule (File.path, Class/Function/Module qualified name,
//! Decorator/DesignPattern/DomainConcept name) is the single
//! `UNIQUE(kind, node_key)` constraint; Parameter and ClassAttribute rows
//! carry a NULL key and never collide.

use rusqlite::Connection;

use crate::errors::GraphResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 2;

/// Core DDL statements: 7 CREATE TABLE + 11 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (7) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS repo_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        node_key TEXT,
        name TEXT NOT NULL,
        qualified_name TEXT,
        parent_id INTEGER REFERENCES nodes(id) ON DELETE CASCADE,
        file_path TEXT,
        module_name TEXT,
        source TEXT,
        content_hash TEXT,
        lineno_start INTEGER,
        lineno_end INTEGER,
        docstring TEXT,
        is_async INTEGER NOT NULL DEFAULT 0,
        is_method INTEGER NOT NULL DEFAULT 0,
        is_nested INTEGER NOT NULL DEFAULT 0,
        is_unresolved INTEGER NOT NULL DEFAULT 0,
        return_annotation TEXT,
        calls_json TEXT,
        type_annotation TEXT,
        default_value TEXT,
        position INTEGER,
        param_kind TEXT,
        arguments TEXT,
        parse_error TEXT,
        purpose TEXT,
        summary TEXT,
        complexity TEXT,
        role TEXT,
        design_patterns_json TEXT,
        domain_concepts_json TEXT,
        side_effects_json TEXT,
        parameters_explained_json TEXT,
        key_methods_json TEXT,
        enrichment_hash TEXT,
        enriched_at TEXT,
        indexed_at TEXT DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(kind, node_key)
    );",
    "CREATE TABLE IF NOT EXISTS edges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        target_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        relationship TEXT NOT NULL,
        properties TEXT,
        UNIQUE(source_id, target_id, relationship)
    );",
    "CREATE TABLE IF NOT EXISTS enrichment_cache (
        content_hash TEXT PRIMARY KEY,
        enrichment_json TEXT NOT NULL,
        cached_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS vector_indexes (
        name TEXT PRIMARY KEY,
        kind TEXT NOT NULL UNIQUE,
        similarity TEXT NOT NULL DEFAULT 'cosine',
        dimensions INTEGER
    );",
    "CREATE TABLE IF NOT EXISTS embeddings (
        node_id INTEGER PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        dimensions INTEGER NOT NULL,
        vector BLOB NOT NULL,
        text_hash TEXT NOT NULL,
        embedded_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes (11) ────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);",
    "CREATE INDEX IF NOT EXISTS idx_nodes_kind_name ON nodes(kind, name);",
    "CREATE INDEX IF NOT EXISTS idx_nodes_qualified ON nodes(qualified_name);",
    "CREATE INDEX IF NOT EXISTS idx_nodes_file ON nodes(file_path);",
    "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);",
    "CREATE INDEX IF NOT EXISTS idx_nodes_content_hash ON nodes(content_hash);",
    "CREATE INDEX IF NOT EXISTS idx_nodes_name_nocase ON nodes(name COLLATE NOCASE);",
    "CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id, relationship);",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id, relationship);",
    "CREATE INDEX IF NOT EXISTS idx_edges_relationship ON edges(relationship);",
    "CREATE INDEX IF NOT EXISTS idx_embeddings_kind ON embeddings(kind);",
];

// ─── Setup ──────────────────────────────────────────────────────────────────

/// Create every table and index, then migrate to [`SCHEMA_VERSION`].
pub fn init_schema(conn: &Connection) -> GraphResult<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    migrate_schema(conn)
}

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`]. Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> GraphResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT codegraph_migrate_step;")?;

        let step_result = (|| -> GraphResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT codegraph_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT codegraph_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT codegraph_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `repo_meta`.
/// Returns 0 when the key is absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM repo_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> GraphResult<()> {
    conn.execute(
        "INSERT INTO repo_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> GraphResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, no-op.
fn migrate_to_v1(_conn: &Connection) -> GraphResult<()> {
    Ok(())
}

/// v1 -> v2: register one cosine vector index per embeddable kind.
fn migrate_to_v2(conn: &Connection) -> GraphResult<()> {
    conn.execute_batch(
        "INSERT OR IGNORE INTO vector_indexes(name, kind, similarity) \
         VALUES ('function_embeddings', 'Function', 'cosine'), \
                ('class_embeddings', 'Class', 'cosine');",
    )?;
    Ok(())
}
