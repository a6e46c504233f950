use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every snapshot table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Structured store
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_tables (
            name TEXT PRIMARY KEY,
            owner TEXT,
            comment TEXT,
            primary_key_json TEXT NOT NULL DEFAULT '[]',
            row_count INTEGER,
            column_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_columns (
            table_name TEXT NOT NULL,
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            data_type TEXT NOT NULL,
            nullable INTEGER NOT NULL DEFAULT 1,
            comment TEXT,
            default_value TEXT,
            PRIMARY KEY (table_name, name),
            FOREIGN KEY (table_name) REFERENCES schema_tables(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_indexes (
            table_name TEXT NOT NULL,
            name TEXT NOT NULL,
            columns_json TEXT NOT NULL,
            is_unique INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (table_name, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS foreign_keys (
            source_table TEXT NOT NULL,
            source_columns TEXT NOT NULL,
            target_table TEXT NOT NULL,
            target_columns TEXT NOT NULL,
            constraint_name TEXT,
            join_condition TEXT NOT NULL,
            PRIMARY KEY (source_table, source_columns, target_table, target_columns)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enum_values (
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            position INTEGER NOT NULL,
            code TEXT NOT NULL,
            meaning TEXT NOT NULL,
            source TEXT NOT NULL,
            PRIMARY KEY (table_name, column_name, code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Merge inputs, kept so later partial runs can re-reconcile enums.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS extracted_enums (
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            position INTEGER NOT NULL,
            code TEXT NOT NULL,
            meaning TEXT NOT NULL,
            PRIMARY KEY (table_name, column_name, code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manual_overrides (
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            position INTEGER NOT NULL,
            code TEXT NOT NULL,
            meaning TEXT NOT NULL,
            PRIMARY KEY (table_name, column_name, code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector store
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_chunks (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            table_name TEXT NOT NULL,
            column_name TEXT,
            text TEXT NOT NULL,
            hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES schema_chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fk_target ON foreign_keys(target_table)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_table ON schema_chunks(table_name)")
        .execute(pool)
        .await?;

    Ok(())
}
