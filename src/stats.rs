//! Index statistics overview.
//!
//! Summarizes what the persistent index holds: archive and fragment counts,
//! archives that yielded nothing, and where the fragments are concentrated.
//! Used by `mhtml-search stats`.

use anyhow::Result;
use sqlx::Row;

use crate::store::IndexStore;

/// Aggregate counts over the whole index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub archives: i64,
    pub fragments: i64,
    pub empty_archives: i64,
    pub last_indexed: Option<f64>,
    pub top_archives: Vec<(String, i64)>,
}

/// Gather the numbers shown by [`run_stats`].
pub async fn collect_stats(store: &IndexStore) -> Result<IndexStats> {
    let pool = store.pool();

    let archives: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mhtml_files")
        .fetch_one(pool)
        .await?;

    let fragments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM json_data")
        .fetch_one(pool)
        .await?;

    let empty_archives: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM mhtml_files WHERE json_count = 0")
            .fetch_one(pool)
            .await?;

    let last_indexed: Option<f64> = sqlx::query_scalar("SELECT MAX(indexed_time) FROM mhtml_files")
        .fetch_one(pool)
        .await?;

    let top_rows = sqlx::query(
        r#"
        SELECT file_path, json_count
        FROM mhtml_files
        WHERE json_count > 0
        ORDER BY json_count DESC, file_path
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await?;

    let top_archives = top_rows
        .iter()
        .map(|row| (row.get("file_path"), row.get("json_count")))
        .collect();

    Ok(IndexStats {
        archives,
        fragments,
        empty_archives,
        last_indexed,
        top_archives,
    })
}

/// Run the stats command: query the index and print a summary.
pub async fn run_stats(store: &IndexStore) -> Result<()> {
    let stats = collect_stats(store).await?;
    let db_size = std::fs::metadata(store.path())
        .map(|m| m.len())
        .unwrap_or(0);

    println!("mhtml-search index");
    println!("==================");
    println!();
    println!("  Database:    {}", store.path().display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Archives:    {}", stats.archives);
    println!("  Fragments:   {}", stats.fragments);
    println!("  Empty:       {}", stats.empty_archives);
    println!(
        "  Last index:  {}",
        match stats.last_indexed {
            Some(ts) => format_ts_relative(ts as i64),
            None => "never".to_string(),
        }
    );

    if !stats.top_archives.is_empty() {
        println!();
        println!("  Most fragments:");
        println!("  {:>9}   {}", "FRAGMENTS", "ARCHIVE");
        println!("  {}", "-".repeat(76));
        for (path, count) in &stats.top_archives {
            println!("  {:>9}   {}", count, path);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
