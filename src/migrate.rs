use sqlx::SqlitePool;

use crate::error::StoreResult;

pub async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
    // One row per archive, keyed by absolute path
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mhtml_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT UNIQUE NOT NULL,
            file_size INTEGER NOT NULL,
            modified_time REAL NOT NULL,
            indexed_time REAL NOT NULL,
            json_count INTEGER NOT NULL DEFAULT 0,
            depth INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per extracted fragment
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS json_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            json_text TEXT NOT NULL,
            json_hash TEXT NOT NULL,
            FOREIGN KEY (file_id) REFERENCES mhtml_files(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='json_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE json_fts USING fts5(
                fragment_id UNINDEXED,
                file_path UNINDEXED,
                json_content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Older indexes let FTS pick its own rowids; re-key them by fragment id
    let unkeyed: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM json_fts WHERE rowid != fragment_id")
            .fetch_one(pool)
            .await?;
    if unkeyed > 0 {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM json_fts").execute(&mut *tx).await?;
        sqlx::query(
            r#"
            INSERT INTO json_fts (rowid, fragment_id, file_path, json_content)
            SELECT j.id, j.id, f.file_path, j.json_text
            FROM json_data j
            JOIN mhtml_files f ON f.id = j.file_id
            "#,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_json_data_file_id ON json_data(file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_json_data_hash ON json_data(json_hash)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_mhtml_files_indexed_time ON mhtml_files(indexed_time DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
