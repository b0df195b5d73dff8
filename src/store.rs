//! Persistent index store.
//!
//! One SQLite file holds every indexed archive (`mhtml_files`), its
//! fragments (`json_data`), and a full-text projection over the fragment
//! text (`json_fts`). Writes are serialized through a single write lock and
//! each archive is replaced in one transaction, so a reader never sees a
//! half-written archive. Queries run on a second, query-only pool, so a
//! stacked `SELECT ...; DELETE ...` can never touch the index.

use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db;
use crate::error::StoreResult;
use crate::migrate;
use crate::models::{ArchiveFile, FragmentRow, JsonFragment, ResultRow};
use crate::query::{is_select, is_single_statement, QueryBackend, QueryOutcome};

const FREE_TEXT_QUERY: &str = r#"
    SELECT f.file_path AS file_path, j.json_text AS json_data
    FROM json_fts
    JOIN json_data j ON j.id = json_fts.rowid
    JOIN mhtml_files f ON f.id = j.file_id
    WHERE json_fts MATCH ?
    ORDER BY json_fts.rank
"#;

pub struct IndexStore {
    pool: SqlitePool,
    reader: SqlitePool,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl IndexStore {
    /// Open (creating if needed) the index at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        let reader = db::connect_read_only(path).await?;
        debug!(path = %path.display(), "index store opened");
        Ok(Self {
            pool,
            reader,
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Replace everything stored for `archive` with `fragments`.
    ///
    /// The archive row is inserted or updated in place (its id is kept),
    /// its previous fragments and text-search entries are removed, and the
    /// new ones written, all in one transaction. Returns the archive id.
    pub async fn upsert(&self, archive: &ArchiveFile, fragments: &[JsonFragment]) -> StoreResult<i64> {
        let _guard = self.write_lock.lock().await;
        let file_path = archive.path_str();
        let indexed_time = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;

        let mut tx = self.pool.begin().await?;

        let file_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO mhtml_files (file_path, file_size, modified_time, indexed_time, json_count, depth)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                file_size = excluded.file_size,
                modified_time = excluded.modified_time,
                indexed_time = excluded.indexed_time,
                json_count = excluded.json_count,
                depth = excluded.depth
            RETURNING id
            "#,
        )
        .bind(&file_path)
        .bind(archive.size as i64)
        .bind(archive.modified)
        .bind(indexed_time)
        .bind(fragments.len() as i64)
        .bind(archive.depth as i64)
        .fetch_one(&mut *tx)
        .await?;

        // FTS rows share their rowid with the json_data row they mirror
        sqlx::query("DELETE FROM json_fts WHERE rowid IN (SELECT id FROM json_data WHERE file_id = ?)")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM json_data WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        for fragment in fragments {
            let fragment_id = sqlx::query(
                "INSERT INTO json_data (file_id, json_text, json_hash) VALUES (?, ?, ?)",
            )
            .bind(file_id)
            .bind(&fragment.text)
            .bind(&fragment.hash)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            sqlx::query(
                "INSERT INTO json_fts (rowid, fragment_id, file_path, json_content) VALUES (?, ?, ?, ?)",
            )
            .bind(fragment_id)
            .bind(fragment_id)
            .bind(&file_path)
            .bind(&fragment.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(file_id)
    }

    /// Run a SELECT verbatim, or anything else as a free-text search.
    ///
    /// Never fails: errors come back as an empty outcome with a diagnostic.
    /// Only one statement is accepted, and it runs on the query-only pool.
    pub async fn query(&self, text: &str) -> QueryOutcome {
        let text = text.trim();
        if text.is_empty() {
            return QueryOutcome::failed("empty query");
        }

        let result = if is_select(text) {
            if !is_single_statement(text) {
                warn!("rejected query with more than one statement");
                return QueryOutcome::failed("only a single SELECT statement is allowed");
            }
            sqlx::query(text).fetch_all(&self.reader).await
        } else {
            sqlx::query(FREE_TEXT_QUERY)
                .bind(text)
                .fetch_all(&self.reader)
                .await
        };

        match result {
            Ok(rows) => QueryOutcome::rows(rows.iter().map(row_to_map).collect()),
            Err(e) => {
                warn!(error = %e, "index query failed");
                QueryOutcome::failed(e.to_string())
            }
        }
    }

    /// Every persisted fragment joined to its archive, one row per fragment.
    pub async fn fragment_rows(&self) -> StoreResult<Vec<FragmentRow>> {
        let rows: Vec<(String, i64, f64, String)> = sqlx::query_as(
            r#"
            SELECT f.file_path, f.file_size, f.modified_time, j.json_text
            FROM mhtml_files f
            JOIN json_data j ON f.id = j.file_id
            ORDER BY f.file_path, j.id
            "#,
        )
        .fetch_all(&self.reader)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(file_path, file_size, modified_time, json_data)| FragmentRow {
                file_path,
                file_size,
                modified_time,
                json_data,
            })
            .collect())
    }

    pub async fn close(&self) {
        self.reader.close().await;
        self.pool.close().await;
    }
}

#[async_trait]
impl QueryBackend for IndexStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&self, query: &str) -> QueryOutcome {
        self.query(query).await
    }
}

fn row_to_map(row: &SqliteRow) -> ResultRow {
    row.columns()
        .iter()
        .map(|column| {
            let index = column.ordinal();
            (column.name().to_string(), decode_column(row, index))
        })
        .collect()
}

fn decode_column(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
            .try_get_unchecked::<f64, _>(index)
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
