//! Snapshot statistics and health overview.
//!
//! Summarizes what the snapshot holds: table, column, edge and enum counts,
//! embedding coverage for the current model, and when and how it was last
//! ingested. Used by `shx stats` to confirm an ingestion did what it should.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SnapshotStats {
    pub tables: i64,
    pub columns: i64,
    pub foreign_keys: i64,
    pub enum_columns: i64,
    pub enum_values: i64,
    pub manual_overrides: i64,
    pub chunks: i64,
    /// Chunks with a vector whose hash matches the chunk text.
    pub embedded: i64,
    pub embedding_model: Option<String>,
    pub last_sync_time: Option<i64>,
    pub last_sync_mode: Option<String>,
    pub source: Option<String>,
}

impl SnapshotStats {
    pub async fn collect(pool: &SqlitePool) -> Result<Self> {
        let count = move |sql: &'static str| async move {
            sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await
        };

        let metadata: BTreeMap<String, String> =
            sqlx::query("SELECT key, value FROM sync_metadata")
                .fetch_all(pool)
                .await?
                .iter()
                .map(|row| (row.get("key"), row.get("value")))
                .collect();

        Ok(Self {
            tables: count("SELECT COUNT(*) FROM schema_tables").await?,
            columns: count("SELECT COUNT(*) FROM schema_columns").await?,
            foreign_keys: count("SELECT COUNT(*) FROM foreign_keys").await?,
            enum_columns: count(
                "SELECT COUNT(*) FROM (SELECT DISTINCT table_name, column_name FROM enum_values)",
            )
            .await?,
            enum_values: count("SELECT COUNT(*) FROM enum_values").await?,
            manual_overrides: count("SELECT COUNT(*) FROM manual_overrides").await?,
            chunks: count("SELECT COUNT(*) FROM schema_chunks").await?,
            embedded: count(
                "SELECT COUNT(*) FROM schema_chunks c JOIN chunk_vectors v ON v.chunk_id = c.id AND v.hash = c.hash",
            )
            .await?,
            embedding_model: metadata.get("embedding_model").cloned(),
            last_sync_time: metadata.get("last_sync_time").and_then(|t| t.parse().ok()),
            last_sync_mode: metadata.get("last_sync_mode").cloned(),
            source: metadata.get("source").cloned(),
        })
    }
}

/// Run the stats command: query the snapshot and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect_read_only(config).await?;
    let stats = SnapshotStats::collect(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Schema Harness — Snapshot Stats");
    println!("===============================");
    println!();
    println!("  Snapshot:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Tables:        {}", stats.tables);
    println!("  Columns:       {}", stats.columns);
    println!("  Foreign keys:  {}", stats.foreign_keys);
    println!(
        "  Enum columns:  {} ({} values, {} from overrides)",
        stats.enum_columns, stats.enum_values, stats.manual_overrides
    );
    println!("  Chunks:        {}", stats.chunks);
    println!(
        "  Embedded:      {} / {} ({}%)",
        stats.embedded,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.embedded * 100) / stats.chunks
        } else {
            0
        }
    );
    println!(
        "  Model:         {}",
        stats.embedding_model.as_deref().unwrap_or("none")
    );
    println!();
    println!(
        "  Last ingest:   {}",
        match stats.last_sync_time {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        }
    );
    if let Some(mode) = &stats.last_sync_mode {
        println!("  Mode:          {}", mode);
    }
    if let Some(source) = &stats.source {
        println!("  Source:        {}", source);
    }
    println!();

    Ok(())
}

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

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
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
