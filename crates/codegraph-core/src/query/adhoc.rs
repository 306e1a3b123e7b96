//! Read-only ad-hoc SQL over the `nodes` and `edges` tables.

use std::sync::LazyLock;

use regex::Regex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{GraphError, GraphResult};
use crate::query::guards::MAX_QUERY_LENGTH;
use crate::query::QueryEngine;

static WRITE_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|REPLACE|UPSERT|MERGE|TRUNCATE|ATTACH|DETACH|PRAGMA|VACUUM|REINDEX|SET)\b",
    )
    .unwrap_or_else(|e| panic!("write keyword pattern: {e}"))
});

/// A `LIMIT` that closes the outermost statement. Anything after it may not
/// leave a parenthesised subquery or a string literal.
static TRAILING_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bLIMIT\s+[^()']+$").unwrap_or_else(|e| panic!("limit pattern: {e}")));

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdhocResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, Value>>,
    pub count: usize,
    /// A default cap was applied and the result reached it.
    pub truncated: bool,
}

/// First write-intent keyword in `query`, if any.
pub fn write_keyword(query: &str) -> Option<String> {
    WRITE_KEYWORDS.find(query).map(|m| m.as_str().to_ascii_uppercase())
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

impl QueryEngine {
    /// Run a caller-supplied read-only query with positional parameters.
    ///
    /// Rejected before preparation when it is too long or mentions a write
    /// keyword anywhere (subqueries and CTEs included), and after
    /// preparation when SQLite reports it is not read-only. Without a trailing
    /// top-level `LIMIT`, `max_results` is appended.
    pub fn run_query(&self, query: &str, params: &[Value]) -> GraphResult<AdhocResult> {
        let trimmed = query.trim().trim_end_matches(';').trim();
        if trimmed.is_empty() {
            return Err(GraphError::InvalidQuery("empty query".into()));
        }
        if trimmed.len() > MAX_QUERY_LENGTH {
            return Err(GraphError::InvalidQuery(format!(
                "query exceeds {MAX_QUERY_LENGTH} bytes"
            )));
        }
        if let Some(keyword) = write_keyword(trimmed) {
            warn!(keyword = %keyword, "rejected write query");
            return Err(GraphError::InvalidQuery(format!(
                "write operation '{keyword}' is not allowed"
            )));
        }

        let max = self.settings.max_results;
        let caller_limit = TRAILING_LIMIT.is_match(trimmed);
        let sql = if caller_limit {
            trimmed.to_string()
        } else {
            format!("{trimmed} LIMIT {max}")
        };
        let bound: Vec<SqlValue> = params.iter().map(to_sql_value).collect();

        let (columns, rows) = self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| GraphError::Query(format!("could not prepare query: {e}")))?;
            if !stmt.readonly() {
                return Err(GraphError::InvalidQuery("only read-only statements are allowed".into()));
            }
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = Vec::new();
            let mut cursor = stmt.query(rusqlite::params_from_iter(bound.iter()))?;
            while let Some(row) = cursor.next()? {
                let mut obj = serde_json::Map::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    obj.insert(name.clone(), to_json(row.get_ref(i)?));
                }
                rows.push(obj);
            }
            Ok((columns, rows))
        })?;

        let count = rows.len();
        let truncated = !caller_limit && count >= max;
        debug!(count, truncated, "ad-hoc query executed");
        Ok(AdhocResult {
            columns,
            rows,
            count,
            truncated,
        })
    }
}
