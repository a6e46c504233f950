//! Core data models used throughout Schema Harness.
//!
//! These types describe the relational schema facts that flow from extraction
//! through the merger into the snapshot, and the answers the query layer
//! builds from them. Identifiers are stored upper-case; see [`normalize_ident`].

use serde::{Deserialize, Serialize};

/// Canonical form of a table or column identifier.
///
/// Lookups are case-insensitive; everything written to the snapshot goes
/// through this function first.
pub fn normalize_ident(name: &str) -> String {
    name.trim().trim_matches('"').to_uppercase()
}

/// A table with its ordered columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        let wanted = normalize_ident(name);
        self.columns.iter().find(|c| c.name == wanted)
    }

    /// Upper-case every identifier in place.
    pub fn normalize(&mut self) {
        self.name = normalize_ident(&self.name);
        for column in &mut self.columns {
            column.name = normalize_ident(&column.name);
        }
        self.primary_key = self.primary_key.iter().map(|c| normalize_ident(c)).collect();
        for index in &mut self.indexes {
            index.name = normalize_ident(&index.name);
            index.columns = index.columns.iter().map(|c| normalize_ident(c)).collect();
        }
    }
}

/// A column of exactly one [`Table`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default, rename = "default")]
    pub default_value: Option<String>,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// A directed foreign-key relation `source.columns -> target.columns`.
///
/// Several edges may connect the same pair of tables through different
/// columns; they are distinct edges everywhere in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyEdge {
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    #[serde(default)]
    pub constraint_name: Option<String>,
    pub join_condition: String,
}

impl ForeignKeyEdge {
    pub fn new(
        source_table: &str,
        source_columns: &[&str],
        target_table: &str,
        target_columns: &[&str],
        constraint_name: Option<&str>,
    ) -> Self {
        let source_table = normalize_ident(source_table);
        let target_table = normalize_ident(target_table);
        let source_columns: Vec<String> = source_columns.iter().map(|c| normalize_ident(c)).collect();
        let target_columns: Vec<String> = target_columns.iter().map(|c| normalize_ident(c)).collect();
        let join_condition =
            render_join_condition(&source_table, &source_columns, &target_table, &target_columns);
        Self {
            source_table,
            source_columns,
            target_table,
            target_columns,
            constraint_name: constraint_name.map(normalize_ident),
            join_condition,
        }
    }

    /// Upsert key: `(source, target, columns)`.
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source_table: self.source_table.clone(),
            source_columns: self.source_columns.join(","),
            target_table: self.target_table.clone(),
            target_columns: self.target_columns.join(","),
        }
    }

    /// The table on the other end of the edge, seen from `table`.
    pub fn other_end(&self, table: &str) -> &str {
        if self.source_table == table {
            &self.target_table
        } else {
            &self.source_table
        }
    }
}

/// `CHILD.c1 = PARENT.p1 AND CHILD.c2 = PARENT.p2`
pub fn render_join_condition(
    source_table: &str,
    source_columns: &[String],
    target_table: &str,
    target_columns: &[String],
) -> String {
    source_columns
        .iter()
        .zip(target_columns.iter())
        .map(|(s, t)| format!("{}.{} = {}.{}", source_table, s, target_table, t))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey {
    pub source_table: String,
    pub source_columns: String,
    pub target_table: String,
    pub target_columns: String,
}

/// One `(code, meaning)` entry of an enumerated column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub code: String,
    pub meaning: String,
}

/// Where the values of an enumerated column came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumSource {
    CheckConstraint,
    Manual,
    Merged,
}

impl EnumSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnumSource::CheckConstraint => "check_constraint",
            EnumSource::Manual => "manual",
            EnumSource::Merged => "merged",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => EnumSource::Manual,
            "merged" => EnumSource::Merged,
            _ => EnumSource::CheckConstraint,
        }
    }
}

/// The ordered enum values of one `(table, column)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumSet {
    pub table_name: String,
    pub column_name: String,
    pub source: EnumSource,
    pub values: Vec<EnumValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Table,
    Column,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Table => "table",
            ChunkKind::Column => "column",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "table" => Some(ChunkKind::Table),
            "column" => Some(ChunkKind::Column),
            _ => None,
        }
    }
}

/// Embeddable text rendering of a table or a column, with a back-reference
/// to what it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChunk {
    /// `table:ORDERS` or `column:ORDERS.STATUS`; stable across runs.
    pub id: String,
    pub kind: ChunkKind,
    pub table_name: String,
    pub column_name: Option<String>,
    pub text: String,
    /// sha256 of `text`, used to skip re-embedding unchanged chunks.
    pub hash: String,
}

/// One hop of a [`JoinPath`], in walk order.
///
/// `from_table -> to_table` is the traversal direction; the edge keeps its
/// own FK direction, which may be the reverse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinStep {
    pub from_table: String,
    pub to_table: String,
    pub edge: ForeignKeyEdge,
}

/// A simple walk of foreign-key edges from `source` to `destination`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinPath {
    pub source: String,
    pub destination: String,
    pub steps: Vec<JoinStep>,
}

impl JoinPath {
    pub fn empty(table: &str) -> Self {
        Self {
            source: table.to_string(),
            destination: table.to_string(),
            steps: Vec::new(),
        }
    }

    pub fn hops(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Table sequence visited by the walk, source first.
    pub fn tables(&self) -> Vec<String> {
        let mut tables = vec![self.source.clone()];
        tables.extend(self.steps.iter().map(|s| s.to_table.clone()));
        tables
    }

    /// `SELECT *\nFROM A\nJOIN B ON ...` for the walk.
    pub fn sql_example(&self) -> String {
        let mut sql = format!("SELECT *\nFROM {}", self.source);
        for step in &self.steps {
            sql.push_str(&format!(
                "\nJOIN {} ON {}",
                step.to_table, step.edge.join_condition
            ));
        }
        sql
    }
}
