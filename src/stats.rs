//! Record store statistics.
//!
//! Gives a quick picture of what has been processed: record counts by file
//! type, extraction status and summary status, plus the scan checkpoints.
//! Used by `docsum stats` to spot failures that need attention.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Record counts grouped by one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakdown {
    pub column: &'static str,
    pub counts: Vec<(String, i64)>,
}

/// Count records grouped by `column` (most frequent first).
pub async fn breakdown(pool: &SqlitePool, column: &'static str) -> Result<Breakdown> {
    // Column names come from a fixed list, never from input.
    let sql = format!(
        "SELECT {col} AS value, COUNT(*) AS n FROM records GROUP BY {col} ORDER BY n DESC, value ASC",
        col = column
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    Ok(Breakdown {
        column,
        counts: rows
            .iter()
            .map(|row| (row.get::<String, _>("value"), row.get::<i64, _>("n")))
            .collect(),
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(&pool)
        .await?;
    let attachments: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE parent_path IS NOT NULL")
            .fetch_one(&pool)
            .await?;
    let marked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE marking IS NOT NULL")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docsum — Record Stats");
    println!("=====================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Records:      {}", total);
    println!("  Attachments:  {}", attachments);
    println!("  Marked:       {}", marked);

    for column in ["file_type", "extraction_status", "summary_status"] {
        let b = breakdown(&pool, column).await?;
        if b.counts.is_empty() {
            continue;
        }
        println!();
        println!("  By {}:", b.column);
        for (value, n) in &b.counts {
            println!("    {:<20} {:>8}", value, n);
        }
    }

    let checkpoints = sqlx::query("SELECT source, cursor, updated_at FROM checkpoints ORDER BY source")
        .fetch_all(&pool)
        .await?;
    if !checkpoints.is_empty() {
        println!();
        println!("  Scans:");
        for row in &checkpoints {
            let source: String = row.get("source");
            let updated_at: i64 = row.get("updated_at");
            println!("    {:<40} {}", source, format_ts_relative(updated_at));
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
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
