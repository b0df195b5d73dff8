//! Query backends.
//!
//! Two engines answer queries behind the same [`QueryBackend`] trait and the
//! same row shape ([`ResultRow`], column name to value in declared order):
//!
//! - the persistent [`IndexStore`](crate::store::IndexStore), SQLite dialect
//!   plus FTS5 free-text search;
//! - the in-memory analytical engine (`analytics` feature), rebuilt per
//!   invocation for joins, aggregates, and window functions.
//!
//! Which one runs is decided per call from an explicit request and an
//! availability check. When neither applies (quick scan without analytics)
//! a case-insensitive substring match over serialized fragments is used.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::StoreResult;
use crate::models::{ResultRow, SearchResult};
use crate::store::IndexStore;

/// Rows produced by a query, plus a diagnostic when execution failed.
///
/// Failures never propagate as errors: the caller gets no rows and a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub rows: Vec<ResultRow>,
    pub diagnostic: Option<String>,
}

impl QueryOutcome {
    pub fn rows(rows: Vec<ResultRow>) -> Self {
        Self {
            rows,
            diagnostic: None,
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            diagnostic: Some(diagnostic.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.diagnostic.is_none()
    }
}

/// A SQL-capable engine returning the common row shape.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Short name used in log lines (e.g. `"sqlite"`, `"analytics"`).
    fn name(&self) -> &'static str;

    /// Execute `query`. Errors are reported through [`QueryOutcome::diagnostic`].
    async fn execute(&self, query: &str) -> QueryOutcome;
}

/// True when the in-memory analytical engine was compiled in.
pub const fn analytics_available() -> bool {
    cfg!(feature = "analytics")
}

/// Decide whether an analytical request can be honoured, warning when not.
pub fn use_analytics(requested: bool) -> bool {
    if requested && !analytics_available() {
        warn!("analytical engine not available in this build, falling back");
    }
    requested && analytics_available()
}

/// Run `query` against the persisted index.
///
/// With `analytics` (and the engine available) every stored fragment is
/// loaded into the analytical engine as `mhtml_data` and the SQL runs there;
/// otherwise the store answers directly. Only reading the fragments back
/// out of the store can fail.
pub async fn query_index(store: &IndexStore, query: &str, analytics: bool) -> StoreResult<QueryOutcome> {
    if use_analytics(analytics) {
        return query_index_analytics(store, query).await;
    }
    Ok(store.execute(query).await)
}

#[cfg(feature = "analytics")]
async fn query_index_analytics(store: &IndexStore, query: &str) -> StoreResult<QueryOutcome> {
    use crate::analytics::AnalyticsEngine;

    let rows = store.fragment_rows().await?;
    Ok(match AnalyticsEngine::build(&rows) {
        Ok(engine) => engine.execute(query).await,
        Err(e) => QueryOutcome::failed(e.to_string()),
    })
}

#[cfg(not(feature = "analytics"))]
async fn query_index_analytics(store: &IndexStore, query: &str) -> StoreResult<QueryOutcome> {
    Ok(store.execute(query).await)
}

/// True if `query` should be run as SQL rather than free text.
pub fn is_select(query: &str) -> bool {
    query
        .trim_start()
        .get(..6)
        .map(|head| head.eq_ignore_ascii_case("select"))
        .unwrap_or(false)
}

/// True when `sql` holds at most one statement.
///
/// Semicolons inside string literals, quoted identifiers and comments are
/// ignored, and trailing semicolons are allowed.
pub fn is_single_statement(sql: &str) -> bool {
    let mut chars = sql.chars().peekable();
    let mut ended = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                if ended {
                    return false;
                }
                for inner in chars.by_ref() {
                    if inner == close {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            ';' => ended = true,
            c if c.is_whitespace() => {}
            _ if ended => return false,
            _ => {}
        }
    }
    true
}

/// Case-insensitive substring match of `query` against every fragment's
/// serialized JSON. Used by quick scan when no analytical engine is in play.
pub fn substring_filter(results: &[SearchResult], query: &str) -> Vec<ResultRow> {
    let needle = query.to_lowercase();
    let mut rows = Vec::new();

    for result in results {
        let file_path = result.archive.path_str();
        for fragment in &result.fragments {
            if fragment.text.to_lowercase().contains(&needle) {
                let mut row = ResultRow::new();
                row.insert("file_path".to_string(), Value::String(file_path.clone()));
                row.insert("json_data".to_string(), Value::String(fragment.text.clone()));
                row.insert("file_size".to_string(), Value::from(result.archive.size));
                rows.push(row);
            }
        }
    }

    rows
}
