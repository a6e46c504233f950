//! Schema chunk rendering.
//!
//! Turns tables and columns into the [`SchemaChunk`] texts that get embedded:
//! one chunk per table and one per column. Chunk ids are derived from the
//! identifiers (`table:ORDERS`, `column:ORDERS.STATUS`) so they never change
//! between runs, and each chunk carries a SHA-256 hash of its text for
//! staleness detection.

use sha2::{Digest, Sha256};

use crate::models::{ChunkKind, Column, EnumSet, SchemaChunk, Table};

/// Columns listed inline in a table chunk before summarizing the rest.
const MAX_INLINE_COLUMNS: usize = 15;

pub fn table_chunk_id(table: &str) -> String {
    format!("table:{}", table)
}

pub fn column_chunk_id(table: &str, column: &str) -> String {
    format!("column:{}.{}", table, column)
}

/// Render a table as its embedding text.
pub fn render_table(table: &Table) -> String {
    let mut lines = vec![format!("Table: {}", table.name)];
    if let Some(owner) = &table.owner {
        lines.push(format!("Owner: {}", owner));
    }
    lines.push(format!(
        "Description: {}",
        table.comment.as_deref().unwrap_or("No description available")
    ));
    if !table.primary_key.is_empty() {
        lines.push(format!("Primary Key: {}", table.primary_key.join(", ")));
    }
    lines.push("Columns:".to_string());
    for column in table.columns.iter().take(MAX_INLINE_COLUMNS) {
        match &column.comment {
            Some(comment) => lines.push(format!("- {} ({}): {}", column.name, column.data_type, comment)),
            None => lines.push(format!("- {} ({})", column.name, column.data_type)),
        }
    }
    if table.columns.len() > MAX_INLINE_COLUMNS {
        lines.push(format!(
            "... and {} more columns",
            table.columns.len() - MAX_INLINE_COLUMNS
        ));
    }
    lines.push(format!(
        "Row Count: {}",
        table
            .row_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    ));
    lines.join("\n")
}

/// Render a column (and its enum values, if any) as its embedding text.
pub fn render_column(table: &str, column: &Column, enums: Option<&EnumSet>) -> String {
    let mut text = format!("Column {} in table {}: {}", column.name, table, column.data_type);
    if let Some(comment) = &column.comment {
        text.push_str(" - ");
        text.push_str(comment);
    }
    if let Some(set) = enums.filter(|s| !s.values.is_empty()) {
        let values: Vec<String> = set
            .values
            .iter()
            .map(|v| format!("{}={}", v.code, v.meaning))
            .collect();
        text.push_str(&format!("\nValues: {}", values.join(", ")));
    }
    text
}

/// All chunks for a set of tables, sorted by id.
///
/// `enum_lookup` resolves the merged enum set of a `(table, column)`.
pub fn build_chunks<'a>(
    tables: impl IntoIterator<Item = &'a Table>,
    enum_lookup: impl Fn(&str, &str) -> Option<&'a EnumSet>,
) -> Vec<SchemaChunk> {
    let mut chunks = Vec::new();
    for table in tables {
        chunks.push(make_chunk(
            table_chunk_id(&table.name),
            ChunkKind::Table,
            &table.name,
            None,
            render_table(table),
        ));
        for column in &table.columns {
            let text = render_column(&table.name, column, enum_lookup(&table.name, &column.name));
            chunks.push(make_chunk(
                column_chunk_id(&table.name, &column.name),
                ChunkKind::Column,
                &table.name,
                Some(&column.name),
                text,
            ));
        }
    }
    chunks.sort_by(|a, b| a.id.cmp(&b.id));
    chunks
}

fn make_chunk(
    id: String,
    kind: ChunkKind,
    table: &str,
    column: Option<&str>,
    text: String,
) -> SchemaChunk {
    let hash = hash_text(&text);
    SchemaChunk {
        id,
        kind,
        table_name: table.to_string(),
        column_name: column.map(|c| c.to_string()),
        text,
        hash,
    }
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
