//! Structured, indexed schema metadata.
//!
//! [`MetadataStore`] is an immutable in-memory view of the structured half of
//! the snapshot: tables with their ordered columns, foreign-key edges and enum
//! values. It is loaded once from SQLite (or built directly in tests) and
//! shared read-only behind an `Arc`, so any number of tool calls can read it
//! concurrently without locking.
//!
//! All lookups are case-insensitive: names are normalized with
//! [`normalize_ident`] before they hit the maps.

use std::collections::BTreeMap;

use sqlx::{Row, SqlitePool};

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::models::{
    normalize_ident, Column, EnumSet, EnumSource, EnumValue, ForeignKeyEdge, IndexInfo, Table,
};

#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    tables: BTreeMap<String, Table>,
    edges: Vec<ForeignKeyEdge>,
    enums: BTreeMap<(String, String), EnumSet>,
}

impl MetadataStore {
    /// Build a store from already-merged facts.
    ///
    /// Edges whose endpoints are not known tables are dropped, so every edge
    /// in the store references tables present in it.
    pub fn new(tables: Vec<Table>, edges: Vec<ForeignKeyEdge>, enums: Vec<EnumSet>) -> Self {
        let tables: BTreeMap<String, Table> = tables
            .into_iter()
            .map(|mut t| {
                t.normalize();
                (t.name.clone(), t)
            })
            .collect();

        let mut kept = Vec::with_capacity(edges.len());
        for edge in edges {
            if tables.contains_key(&edge.source_table) && tables.contains_key(&edge.target_table) {
                kept.push(edge);
            } else {
                tracing::warn!(
                    source = %edge.source_table,
                    target = %edge.target_table,
                    "dropping foreign key that references an unknown table"
                );
            }
        }
        kept.sort_by_key(|e| e.key());
        kept.dedup_by(|a, b| a.key() == b.key());

        let enums = enums
            .into_iter()
            .map(|e| ((e.table_name.clone(), e.column_name.clone()), e))
            .collect();

        Self {
            tables,
            edges: kept,
            enums,
        }
    }

    /// Load the structured store from the snapshot database.
    pub async fn load(pool: &SqlitePool) -> KnowledgeResult<Self> {
        let tables = read_tables(pool).await?;
        let edges = read_edges(pool).await?;
        let enums = read_enum_sets(pool, ENUM_VALUES_QUERY).await?;
        Ok(Self::new(tables, edges, enums))
    }

    pub fn get_table(&self, name: &str) -> KnowledgeResult<&Table> {
        self.tables
            .get(&normalize_ident(name))
            .ok_or_else(|| KnowledgeError::NotFound(format!("table '{}'", normalize_ident(name))))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(&normalize_ident(name))
    }

    /// Columns of `table` in declaration order.
    pub fn list_columns(&self, table: &str) -> KnowledgeResult<&[Column]> {
        Ok(&self.get_table(table)?.columns)
    }

    /// Ordered enum values of a column; empty when none are known.
    pub fn get_enum_values(&self, table: &str, column: &str) -> &[EnumValue] {
        self.get_enum_set(table, column)
            .map(|e| e.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn get_enum_set(&self, table: &str, column: &str) -> Option<&EnumSet> {
        self.enums
            .get(&(normalize_ident(table), normalize_ident(column)))
    }

    /// Every edge connecting `a` and `b`, in either direction.
    pub fn get_foreign_key_edges(&self, a: &str, b: &str) -> Vec<&ForeignKeyEdge> {
        let a = normalize_ident(a);
        let b = normalize_ident(b);
        self.edges
            .iter()
            .filter(|e| {
                (e.source_table == a && e.target_table == b)
                    || (e.source_table == b && e.target_table == a)
            })
            .collect()
    }

    /// Edges whose source is `table` (the table references its parents).
    pub fn outgoing_edges(&self, table: &str) -> Vec<&ForeignKeyEdge> {
        let table = normalize_ident(table);
        self.edges.iter().filter(|e| e.source_table == table).collect()
    }

    /// Edges whose target is `table` (children referencing it).
    pub fn incoming_edges(&self, table: &str) -> Vec<&ForeignKeyEdge> {
        let table = normalize_ident(table);
        self.edges.iter().filter(|e| e.target_table == table).collect()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn edges(&self) -> &[ForeignKeyEdge] {
        &self.edges
    }

    pub fn enum_sets(&self) -> impl Iterator<Item = &EnumSet> {
        self.enums.values()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Table names containing `query` as a substring, for "did you mean".
    pub fn similar_table_names(&self, query: &str, limit: usize) -> Vec<String> {
        let needle = normalize_ident(query);
        if needle.is_empty() {
            return Vec::new();
        }
        self.tables
            .keys()
            .filter(|name| name.contains(&needle) || needle.contains(name.as_str()))
            .take(limit)
            .cloned()
            .collect()
    }
}

pub(crate) const ENUM_VALUES_QUERY: &str = r#"
    SELECT table_name, column_name, code, meaning, source
    FROM enum_values
    ORDER BY table_name, column_name, position
"#;

pub(crate) const EXTRACTED_ENUMS_QUERY: &str = r#"
    SELECT table_name, column_name, code, meaning, 'check_constraint' AS source
    FROM extracted_enums
    ORDER BY table_name, column_name, position
"#;

pub(crate) const MANUAL_OVERRIDES_QUERY: &str = r#"
    SELECT table_name, column_name, code, meaning, 'manual' AS source
    FROM manual_overrides
    ORDER BY table_name, column_name, position
"#;

/// Every table with its ordered columns and indexes.
pub(crate) async fn read_tables(pool: &SqlitePool) -> KnowledgeResult<Vec<Table>> {
    let mut tables: BTreeMap<String, Table> = BTreeMap::new();

    let rows = sqlx::query(
        "SELECT name, owner, comment, primary_key_json, row_count FROM schema_tables ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    for row in &rows {
        let name: String = row.get("name");
        let pk_json: String = row.get("primary_key_json");
        tables.insert(
            name.clone(),
            Table {
                name,
                owner: row.get("owner"),
                comment: row.get("comment"),
                columns: Vec::new(),
                primary_key: serde_json::from_str(&pk_json).unwrap_or_default(),
                row_count: row.get("row_count"),
                indexes: Vec::new(),
            },
        );
    }

    let rows = sqlx::query(
        r#"
        SELECT table_name, name, data_type, nullable, comment, default_value
        FROM schema_columns
        ORDER BY table_name, position
        "#,
    )
    .fetch_all(pool)
    .await?;
    for row in &rows {
        let table_name: String = row.get("table_name");
        if let Some(table) = tables.get_mut(&table_name) {
            let nullable: i64 = row.get("nullable");
            table.columns.push(Column {
                name: row.get("name"),
                data_type: row.get("data_type"),
                nullable: nullable != 0,
                comment: row.get("comment"),
                default_value: row.get("default_value"),
            });
        }
    }

    let rows = sqlx::query(
        "SELECT table_name, name, columns_json, is_unique FROM schema_indexes ORDER BY table_name, name",
    )
    .fetch_all(pool)
    .await?;
    for row in &rows {
        let table_name: String = row.get("table_name");
        if let Some(table) = tables.get_mut(&table_name) {
            let columns_json: String = row.get("columns_json");
            let unique: i64 = row.get("is_unique");
            table.indexes.push(IndexInfo {
                name: row.get("name"),
                columns: serde_json::from_str(&columns_json).unwrap_or_default(),
                unique: unique != 0,
            });
        }
    }

    Ok(tables.into_values().collect())
}

/// Every stored edge, including ones whose endpoints are not loaded yet.
pub(crate) async fn read_edges(pool: &SqlitePool) -> KnowledgeResult<Vec<ForeignKeyEdge>> {
    let rows = sqlx::query(
        r#"
        SELECT source_table, source_columns, target_table, target_columns,
               constraint_name, join_condition
        FROM foreign_keys
        ORDER BY source_table, source_columns, target_table, target_columns
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| {
            let source_columns: String = row.get("source_columns");
            let target_columns: String = row.get("target_columns");
            ForeignKeyEdge {
                source_table: row.get("source_table"),
                source_columns: split_columns(&source_columns),
                target_table: row.get("target_table"),
                target_columns: split_columns(&target_columns),
                constraint_name: row.get("constraint_name"),
                join_condition: row.get("join_condition"),
            }
        })
        .collect())
}

/// Enum sets from one of the enum tables; `query` must select
/// `table_name, column_name, code, meaning, source` in position order.
pub(crate) async fn read_enum_sets(pool: &SqlitePool, query: &str) -> KnowledgeResult<Vec<EnumSet>> {
    let rows = sqlx::query(query).fetch_all(pool).await?;
    let mut enums: BTreeMap<(String, String), EnumSet> = BTreeMap::new();
    for row in &rows {
        let table_name: String = row.get("table_name");
        let column_name: String = row.get("column_name");
        let source: String = row.get("source");
        enums
            .entry((table_name.clone(), column_name.clone()))
            .or_insert_with(|| EnumSet {
                table_name,
                column_name,
                source: EnumSource::parse(&source),
                values: Vec::new(),
            })
            .values
            .push(EnumValue {
                code: row.get("code"),
                meaning: row.get("meaning"),
            });
    }
    Ok(enums.into_values().collect())
}

fn split_columns(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, columns: &[&str]) -> Table {
        Table {
            name: name.to_string(),
            owner: None,
            comment: None,
            columns: columns
                .iter()
                .map(|c| Column {
                    name: c.to_string(),
                    data_type: "NUMBER".to_string(),
                    nullable: true,
                    comment: None,
                    default_value: None,
                })
                .collect(),
            primary_key: vec![columns[0].to_string()],
            row_count: None,
            indexes: Vec::new(),
        }
    }

    fn store() -> MetadataStore {
        MetadataStore::new(
            vec![
                table("orders", &["id", "customer_id", "bill_to", "ship_to"]),
                table("addresses", &["id"]),
                table("customers", &["id"]),
            ],
            vec![
                ForeignKeyEdge::new("ORDERS", &["BILL_TO"], "ADDRESSES", &["ID"], None),
                ForeignKeyEdge::new("ORDERS", &["SHIP_TO"], "ADDRESSES", &["ID"], None),
                ForeignKeyEdge::new("ORDERS", &["CUSTOMER_ID"], "CUSTOMERS", &["ID"], None),
                ForeignKeyEdge::new("ORDERS", &["WAREHOUSE_ID"], "WAREHOUSES", &["ID"], None),
            ],
            vec![EnumSet {
                table_name: "ORDERS".into(),
                column_name: "STATUS".into(),
                source: EnumSource::Manual,
                values: vec![EnumValue {
                    code: "0".into(),
                    meaning: "Draft".into(),
                }],
            }],
        )
    }

    #[test]
    fn test_lookups_are_case_insensitive() {
        let store = store();
        assert_eq!(store.get_table("Orders").unwrap().name, "ORDERS");
        let columns = store.list_columns("orders").unwrap();
        assert_eq!(columns[1].name, "CUSTOMER_ID");
        assert_eq!(store.get_enum_values("orders", "status").len(), 1);
    }

    #[test]
    fn test_unknown_table_is_not_found() {
        let err = store().get_table("INVOICES").unwrap_err();
        assert!(matches!(err, KnowledgeError::NotFound(_)));
    }

    #[test]
    fn test_missing_enum_is_empty() {
        assert!(store().get_enum_values("ORDERS", "ID").is_empty());
    }

    #[test]
    fn test_parallel_edges_preserved_in_both_directions() {
        let store = store();
        assert_eq!(store.get_foreign_key_edges("ORDERS", "ADDRESSES").len(), 2);
        assert_eq!(store.get_foreign_key_edges("addresses", "orders").len(), 2);
        assert!(store.get_foreign_key_edges("CUSTOMERS", "ADDRESSES").is_empty());
    }

    #[test]
    fn test_dangling_edges_are_dropped() {
        let store = store();
        assert_eq!(store.edges().len(), 3);
        assert!(store.edges().iter().all(|e| e.target_table != "WAREHOUSES"));
    }

    #[test]
    fn test_similar_table_names() {
        let store = store();
        assert_eq!(store.similar_table_names("order", 5), vec!["ORDERS"]);
        assert!(store.similar_table_names("", 5).is_empty());
    }
}
