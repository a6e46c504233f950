//! Schema sources: where extracted facts come from.
//!
//! A [`SchemaSource`] connects to something that knows a relational schema
//! and returns an [`ExtractedSchema`]: tables with ordered columns, foreign
//! keys and raw CHECK constraint texts. Sources never write anything; every
//! failure to connect, authenticate or read surfaces as
//! [`KnowledgeError::IngestionSource`] so ingestion can abort before its
//! first write.
//!
//! | Descriptor | Source |
//! |---|---|
//! | `json:<path>` or `*.json` | [`JsonDumpSource`] |
//! | `sqlite:<path>` | [`SqliteSource`] |
//! | `postgres://...` / `postgresql://...` | [`PostgresSource`] |
//!
//! Enumerated columns are recovered from CHECK constraints of the form
//! `col IN ('A', 'B')` (and Postgres' rendering `col = ANY (ARRAY[...])`);
//! see [`parse_check_enum`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::models::{
    normalize_ident, Column, EnumSet, EnumSource, EnumValue, ForeignKeyEdge, IndexInfo, Table,
};

static CHECK_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)["'`]?(\w+)["'`]?\s+IN\s*\(\s*([^)]+?)\s*\)"#).expect("check IN regex")
});

static CHECK_ANY_ARRAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)["]?(\w+)["]?\s*\)?\s*=\s*ANY\s*\(\s*\(?\s*ARRAY\s*\[([^\]]*)\]"#)
        .expect("check ANY regex")
});

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^']*)'").expect("quoted value regex"));

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\b\d+(?:\.\d+)?\b").expect("number regex"));

/// A foreign key as extracted, before it becomes a [`ForeignKeyEdge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedForeignKey {
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    #[serde(default)]
    pub constraint_name: Option<String>,
}

impl ExtractedForeignKey {
    pub fn to_edge(&self) -> ForeignKeyEdge {
        let source: Vec<&str> = self.source_columns.iter().map(String::as_str).collect();
        let target: Vec<&str> = self.target_columns.iter().map(String::as_str).collect();
        ForeignKeyEdge::new(
            &self.source_table,
            &source,
            &self.target_table,
            &target,
            self.constraint_name.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConstraint {
    pub table_name: String,
    #[serde(default)]
    pub constraint_name: Option<String>,
    pub condition: String,
}

/// Enum values a source already knows with meanings (e.g. a lookup table
/// captured in a dump).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEnum {
    pub table_name: String,
    pub column_name: String,
    pub values: Vec<EnumValue>,
}

/// Everything one extraction run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSchema {
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub foreign_keys: Vec<ExtractedForeignKey>,
    #[serde(default)]
    pub check_constraints: Vec<CheckConstraint>,
    #[serde(default)]
    pub enums: Vec<ExtractedEnum>,
}

impl ExtractedSchema {
    /// Upper-case every identifier and keep only the `only` tables (when
    /// non-empty). Foreign keys and constraints follow their source table.
    pub fn normalized(mut self, only: &[String]) -> Self {
        for table in &mut self.tables {
            table.normalize();
        }
        for fk in &mut self.foreign_keys {
            fk.source_table = normalize_ident(&fk.source_table);
            fk.target_table = normalize_ident(&fk.target_table);
        }
        for check in &mut self.check_constraints {
            check.table_name = normalize_ident(&check.table_name);
        }
        for set in &mut self.enums {
            set.table_name = normalize_ident(&set.table_name);
            set.column_name = normalize_ident(&set.column_name);
        }

        if !only.is_empty() {
            let keep: BTreeSet<String> = only.iter().map(|t| normalize_ident(t)).collect();
            self.tables.retain(|t| keep.contains(&t.name));
            self.foreign_keys.retain(|fk| keep.contains(&fk.source_table));
            self.check_constraints.retain(|c| keep.contains(&c.table_name));
            self.enums.retain(|e| keep.contains(&e.table_name));
        }

        self.tables.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }

    pub fn edges(&self) -> Vec<ForeignKeyEdge> {
        self.foreign_keys.iter().map(|fk| fk.to_edge()).collect()
    }

    /// Extracted enum sets, one per column: explicit `enums` first, then
    /// sets recovered from CHECK constraints.
    ///
    /// Columns the table does not have are ignored; when a column has
    /// several sources the first one wins.
    pub fn check_enums(&self) -> Vec<EnumSet> {
        let tables: BTreeMap<&str, &Table> =
            self.tables.iter().map(|t| (t.name.as_str(), t)).collect();
        let mut sets: BTreeMap<(String, String), EnumSet> = BTreeMap::new();

        for set in &self.enums {
            let known = tables
                .get(set.table_name.as_str())
                .is_some_and(|t| t.column(&set.column_name).is_some());
            if known && !set.values.is_empty() {
                sets.entry((set.table_name.clone(), set.column_name.clone()))
                    .or_insert_with(|| EnumSet {
                        table_name: set.table_name.clone(),
                        column_name: set.column_name.clone(),
                        source: EnumSource::CheckConstraint,
                        values: set.values.clone(),
                    });
            }
        }

        for check in &self.check_constraints {
            let Some((column, codes)) = parse_check_enum(&check.condition) else {
                continue;
            };
            let column = normalize_ident(&column);
            let known = tables
                .get(check.table_name.as_str())
                .is_some_and(|t| t.column(&column).is_some());
            if !known {
                tracing::debug!(
                    table = %check.table_name,
                    column = %column,
                    "CHECK constraint names an unknown column, skipping"
                );
                continue;
            }
            sets.entry((check.table_name.clone(), column.clone()))
                .or_insert_with(|| EnumSet {
                    table_name: check.table_name.clone(),
                    column_name: column,
                    source: EnumSource::CheckConstraint,
                    values: codes
                        .into_iter()
                        .map(|code| EnumValue {
                            meaning: code.clone(),
                            code,
                        })
                        .collect(),
                });
        }
        sets.into_values().collect()
    }
}

/// Parse `col IN (v1, v2, ...)` (or `col = ANY (ARRAY[...])`) into the column
/// name and its codes.
///
/// Quoted values win over bare numbers; duplicate codes keep their first
/// position. Returns `None` for any other constraint shape.
pub fn parse_check_enum(condition: &str) -> Option<(String, Vec<String>)> {
    let caps = CHECK_IN
        .captures(condition)
        .or_else(|| CHECK_ANY_ARRAY.captures(condition))?;
    let column = caps.get(1)?.as_str().to_string();
    let list = caps.get(2)?.as_str();

    let mut values: Vec<String> = QUOTED
        .captures_iter(list)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    if values.is_empty() {
        values = NUMBER
            .find_iter(list)
            .map(|m| m.as_str().to_string())
            .collect();
    }

    let mut seen = BTreeSet::new();
    values.retain(|v| seen.insert(v.clone()));
    if values.is_empty() {
        None
    } else {
        Some((column, values))
    }
}

/// A schema source. Implementations must not write anything.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Human-readable description, free of credentials.
    fn describe(&self) -> String;

    /// Extract the schema, restricted to `only` when non-empty.
    async fn extract(&self, only: &[String]) -> KnowledgeResult<ExtractedSchema>;
}

/// Login for live sources. The password is never persisted or logged.
#[derive(Clone, Default)]
pub struct SourceCredentials {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Pick a source for a connection descriptor.
pub fn open_source(
    descriptor: &str,
    credentials: SourceCredentials,
) -> KnowledgeResult<Box<dyn SchemaSource>> {
    if let Some(path) = descriptor.strip_prefix("json:") {
        return Ok(Box::new(JsonDumpSource::new(path)));
    }
    if let Some(path) = descriptor.strip_prefix("sqlite:") {
        return Ok(Box::new(SqliteSource::new(path.trim_start_matches("//"))));
    }
    if descriptor.starts_with("postgres://") || descriptor.starts_with("postgresql://") {
        return Ok(Box::new(PostgresSource::new(descriptor, credentials)));
    }
    if descriptor.ends_with(".json") {
        return Ok(Box::new(JsonDumpSource::new(descriptor)));
    }
    Err(KnowledgeError::IngestionSource(format!(
        "unrecognized source '{}'; expected json:<path>, sqlite:<path> or postgres://...",
        descriptor
    )))
}

// ============ JSON dump ============

/// Reads a previously exported [`ExtractedSchema`] from a JSON file.
pub struct JsonDumpSource {
    path: PathBuf,
}

impl JsonDumpSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SchemaSource for JsonDumpSource {
    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }

    async fn extract(&self, only: &[String]) -> KnowledgeResult<ExtractedSchema> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            KnowledgeError::IngestionSource(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let schema: ExtractedSchema = serde_json::from_str(&content).map_err(|e| {
            KnowledgeError::IngestionSource(format!("invalid schema dump {}: {}", self.path.display(), e))
        })?;
        Ok(schema.normalized(only))
    }
}

// ============ SQLite ============

/// Live introspection of a SQLite database file, opened read-only.
pub struct SqliteSource {
    path: PathBuf,
}

impl SqliteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn connect(&self) -> KnowledgeResult<SqlitePool> {
        if !self.path.exists() {
            return Err(KnowledgeError::IngestionSource(format!(
                "database not found: {}",
                self.path.display()
            )));
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", self.path.display()))
            .map_err(source_err)?
            .read_only(true);
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(source_err)
    }
}

#[async_trait]
impl SchemaSource for SqliteSource {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    async fn extract(&self, only: &[String]) -> KnowledgeResult<ExtractedSchema> {
        let pool = self.connect().await?;
        let result = introspect_sqlite(&pool).await;
        pool.close().await;
        Ok(result?.normalized(only))
    }
}

async fn introspect_sqlite(pool: &SqlitePool) -> KnowledgeResult<ExtractedSchema> {
    let masters = sqlx::query(
        "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(source_err)?;

    let mut schema = ExtractedSchema::default();
    let mut primary_keys: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut pending_fks: Vec<(i64, String, String, String, Option<String>)> = Vec::new();

    for master in &masters {
        let name: String = master.get("name");
        let create_sql: Option<String> = master.get("sql");

        let column_rows = sqlx::query(
            r#"SELECT name, type, "notnull" AS not_null, dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(&name)
        .fetch_all(pool)
        .await
        .map_err(source_err)?;

        let mut pk: Vec<(i64, String)> = Vec::new();
        let columns: Vec<Column> = column_rows
            .iter()
            .map(|row| {
                let column_name: String = row.get("name");
                let pk_pos: i64 = row.get("pk");
                if pk_pos > 0 {
                    pk.push((pk_pos, column_name.clone()));
                }
                let not_null: i64 = row.get("not_null");
                Column {
                    name: column_name,
                    data_type: row.get("type"),
                    nullable: not_null == 0,
                    comment: None,
                    default_value: row.get("dflt_value"),
                }
            })
            .collect();
        pk.sort();
        let primary_key: Vec<String> = pk.into_iter().map(|(_, c)| c).collect();
        primary_keys.insert(normalize_ident(&name), primary_key.clone());

        let row_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM \"{}\"",
            name.replace('"', "\"\"")
        ))
        .fetch_one(pool)
        .await
        .map_err(source_err)?;

        let mut indexes = Vec::new();
        let index_rows = sqlx::query(
            r#"SELECT name, "unique" AS is_unique FROM pragma_index_list(?) ORDER BY name"#,
        )
        .bind(&name)
        .fetch_all(pool)
        .await
        .map_err(source_err)?;
        for index_row in &index_rows {
            let index_name: String = index_row.get("name");
            let unique: i64 = index_row.get("is_unique");
            let index_columns: Vec<String> =
                sqlx::query_scalar("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                    .bind(&index_name)
                    .fetch_all(pool)
                    .await
                    .map_err(source_err)?;
            indexes.push(IndexInfo {
                name: index_name,
                columns: index_columns,
                unique: unique != 0,
            });
        }

        let fk_rows = sqlx::query(
            r#"SELECT id, seq, "table" AS target, "from" AS source_column, "to" AS target_column FROM pragma_foreign_key_list(?) ORDER BY id, seq"#,
        )
        .bind(&name)
        .fetch_all(pool)
        .await
        .map_err(source_err)?;
        for fk in &fk_rows {
            pending_fks.push((
                fk.get("id"),
                name.clone(),
                fk.get("target"),
                fk.get("source_column"),
                fk.get("target_column"),
            ));
        }

        if let Some(sql) = &create_sql {
            for condition in check_clauses(sql) {
                schema.check_constraints.push(CheckConstraint {
                    table_name: name.clone(),
                    constraint_name: None,
                    condition,
                });
            }
        }

        schema.tables.push(Table {
            name,
            owner: None,
            comment: None,
            columns,
            primary_key,
            row_count: Some(row_count),
            indexes,
        });
    }

    // Group FK column pairs by (table, id); a missing target column means
    // "the referenced table's primary key".
    let mut grouped: BTreeMap<(String, i64), ExtractedForeignKey> = BTreeMap::new();
    for (id, source, target, source_column, target_column) in pending_fks {
        let fk = grouped
            .entry((source.clone(), id))
            .or_insert_with(|| ExtractedForeignKey {
                source_table: source,
                source_columns: Vec::new(),
                target_table: target.clone(),
                target_columns: Vec::new(),
                constraint_name: None,
            });
        fk.source_columns.push(source_column);
        if let Some(column) = target_column {
            fk.target_columns.push(column);
        }
    }
    for mut fk in grouped.into_values() {
        if fk.target_columns.is_empty() {
            fk.target_columns = primary_keys
                .get(&normalize_ident(&fk.target_table))
                .cloned()
                .unwrap_or_default();
        }
        schema.foreign_keys.push(fk);
    }

    Ok(schema)
}

/// The parenthesized expressions following each `CHECK` keyword.
fn check_clauses(create_sql: &str) -> Vec<String> {
    let upper = create_sql.to_ascii_uppercase();
    let mut clauses = Vec::new();
    let mut from = 0;
    while let Some(pos) = upper[from..].find("CHECK") {
        let start = from + pos + "CHECK".len();
        from = start;
        let Some(open) = create_sql[start..].find('(') else {
            break;
        };
        if !create_sql[start..start + open].trim().is_empty() {
            continue;
        }
        let body_start = start + open + 1;
        let mut depth = 1;
        let mut end = None;
        for (i, ch) in create_sql[body_start..].char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(body_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        if let Some(end) = end {
            clauses.push(create_sql[body_start..end].trim().to_string());
            from = end;
        }
    }
    clauses
}

// ============ Postgres ============

/// Live introspection of the current schema of a Postgres database.
pub struct PostgresSource {
    url: String,
    credentials: SourceCredentials,
}

impl PostgresSource {
    pub fn new(url: &str, credentials: SourceCredentials) -> Self {
        Self {
            url: url.to_string(),
            credentials,
        }
    }

    async fn connect(&self) -> KnowledgeResult<PgPool> {
        let mut options = PgConnectOptions::from_str(&self.url).map_err(source_err)?;
        if let Some(user) = &self.credentials.user {
            options = options.username(user);
        }
        if let Some(password) = &self.credentials.password {
            options = options.password(password);
        }
        PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(source_err)
    }
}

#[async_trait]
impl SchemaSource for PostgresSource {
    fn describe(&self) -> String {
        // Drop any `user:password@` part.
        match self.url.rsplit_once('@') {
            Some((_, host)) => format!("postgres://{}", host),
            None => self.url.clone(),
        }
    }

    async fn extract(&self, only: &[String]) -> KnowledgeResult<ExtractedSchema> {
        let pool = self.connect().await?;
        let result = introspect_postgres(&pool).await;
        pool.close().await;
        Ok(result?.normalized(only))
    }
}

async fn introspect_postgres(pool: &PgPool) -> KnowledgeResult<ExtractedSchema> {
    let mut tables: BTreeMap<String, Table> = BTreeMap::new();

    let rows = sqlx::query(
        r#"
        SELECT c.relname::text AS name,
               n.nspname::text AS owner,
               obj_description(c.oid, 'pg_class') AS comment,
               GREATEST(c.reltuples, 0)::bigint AS row_count
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('r', 'p') AND n.nspname = current_schema()
        ORDER BY c.relname
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(source_err)?;
    for row in &rows {
        let name: String = row.get("name");
        tables.insert(
            name.clone(),
            Table {
                name,
                owner: row.get("owner"),
                comment: row.get("comment"),
                columns: Vec::new(),
                primary_key: Vec::new(),
                row_count: row.get("row_count"),
                indexes: Vec::new(),
            },
        );
    }

    let rows = sqlx::query(
        r#"
        SELECT c.relname::text AS table_name,
               a.attname::text AS name,
               format_type(a.atttypid, a.atttypmod) AS data_type,
               NOT a.attnotnull AS nullable,
               col_description(a.attrelid, a.attnum) AS comment,
               pg_get_expr(d.adbin, d.adrelid) AS default_value
        FROM pg_attribute a
        JOIN pg_class c ON c.oid = a.attrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
        WHERE c.relkind IN ('r', 'p') AND n.nspname = current_schema()
          AND a.attnum > 0 AND NOT a.attisdropped
        ORDER BY c.relname, a.attnum
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(source_err)?;
    for row in &rows {
        let table_name: String = row.get("table_name");
        if let Some(table) = tables.get_mut(&table_name) {
            table.columns.push(Column {
                name: row.get("name"),
                data_type: row.get("data_type"),
                nullable: row.get("nullable"),
                comment: row.get("comment"),
                default_value: row.get("default_value"),
            });
        }
    }

    let rows = sqlx::query(
        r#"
        SELECT con.contype::text AS kind,
               con.conname::text AS constraint_name,
               src.relname::text AS source_table,
               tgt.relname::text AS target_table,
               sa.attname::text AS source_column,
               ta.attname::text AS target_column
        FROM pg_constraint con
        JOIN pg_namespace n ON n.oid = con.connamespace
        JOIN pg_class src ON src.oid = con.conrelid
        LEFT JOIN pg_class tgt ON tgt.oid = con.confrelid
        CROSS JOIN LATERAL unnest(con.conkey, COALESCE(con.confkey, con.conkey))
            WITH ORDINALITY AS k(src_att, tgt_att, ord)
        JOIN pg_attribute sa ON sa.attrelid = con.conrelid AND sa.attnum = k.src_att
        LEFT JOIN pg_attribute ta ON ta.attrelid = con.confrelid AND ta.attnum = k.tgt_att
        WHERE con.contype IN ('p', 'f') AND n.nspname = current_schema()
        ORDER BY con.conname, k.ord
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(source_err)?;

    let mut foreign_keys: BTreeMap<String, ExtractedForeignKey> = BTreeMap::new();
    for row in &rows {
        let kind: String = row.get("kind");
        let constraint_name: String = row.get("constraint_name");
        let source_table: String = row.get("source_table");
        let source_column: String = row.get("source_column");
        if kind == "p" {
            if let Some(table) = tables.get_mut(&source_table) {
                table.primary_key.push(source_column);
            }
            continue;
        }
        let target_table: Option<String> = row.get("target_table");
        let target_column: Option<String> = row.get("target_column");
        let (Some(target_table), Some(target_column)) = (target_table, target_column) else {
            continue;
        };
        let fk = foreign_keys
            .entry(format!("{}.{}", source_table, constraint_name))
            .or_insert_with(|| ExtractedForeignKey {
                source_table,
                source_columns: Vec::new(),
                target_table,
                target_columns: Vec::new(),
                constraint_name: Some(constraint_name),
            });
        fk.source_columns.push(source_column);
        fk.target_columns.push(target_column);
    }

    let rows = sqlx::query(
        r#"
        SELECT rel.relname::text AS table_name,
               con.conname::text AS constraint_name,
               pg_get_constraintdef(con.oid) AS condition
        FROM pg_constraint con
        JOIN pg_class rel ON rel.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = con.connamespace
        WHERE con.contype = 'c' AND n.nspname = current_schema()
        ORDER BY rel.relname, con.conname
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(source_err)?;
    let check_constraints = rows
        .iter()
        .map(|row| CheckConstraint {
            table_name: row.get("table_name"),
            constraint_name: row.get("constraint_name"),
            condition: row.get("condition"),
        })
        .collect();

    let rows = sqlx::query(
        r#"
        SELECT t.relname::text AS table_name,
               i.relname::text AS index_name,
               ix.indisunique AS is_unique,
               a.attname::text AS column_name
        FROM pg_index ix
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE n.nspname = current_schema()
        ORDER BY t.relname, i.relname, k.ord
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(source_err)?;
    for row in &rows {
        let table_name: String = row.get("table_name");
        let index_name: String = row.get("index_name");
        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };
        let column: String = row.get("column_name");
        match table.indexes.iter_mut().find(|i| i.name == index_name) {
            Some(index) => index.columns.push(column),
            None => table.indexes.push(IndexInfo {
                name: index_name,
                columns: vec![column],
                unique: row.get("is_unique"),
            }),
        }
    }

    Ok(ExtractedSchema {
        tables: tables.into_values().collect(),
        foreign_keys: foreign_keys.into_values().collect(),
        check_constraints,
        enums: Vec::new(),
    })
}

fn source_err(e: impl fmt::Display) -> KnowledgeError {
    KnowledgeError::IngestionSource(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_check_in_quoted() {
        let (column, values) = parse_check_enum("STATUS IN ('ACTIVE', 'INACTIVE')").unwrap();
        assert_eq!(column, "STATUS");
        assert_eq!(values, vec!["ACTIVE", "INACTIVE"]);
    }

    #[test]
    fn test_parse_check_in_quoted_column_and_numbers() {
        let (column, values) = parse_check_enum("\"TYPE\" in (1, 2, 3)").unwrap();
        assert_eq!(column, "TYPE");
        assert_eq!(values, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_parse_check_postgres_any_array() {
        let (column, values) = parse_check_enum(
            "CHECK ((status = ANY (ARRAY['draft'::text, 'sent'::text, 'draft'::text])))",
        )
        .unwrap();
        assert_eq!(column, "status");
        assert_eq!(values, vec!["draft", "sent"]);
    }

    #[test]
    fn test_parse_check_other_shapes() {
        assert!(parse_check_enum("AMOUNT > 0").is_none());
        assert!(parse_check_enum("STATUS IS NOT NULL").is_none());
    }

    #[test]
    fn test_check_clauses_balanced() {
        let sql = "CREATE TABLE t (a INT CHECK (a IN (1, 2)), b TEXT, CHECK (length(b) > 0))";
        assert_eq!(check_clauses(sql), vec!["a IN (1, 2)", "length(b) > 0"]);
    }

    #[test]
    fn test_check_enums_ignores_unknown_columns() {
        let schema = ExtractedSchema {
            tables: vec![Table {
                name: "ORDERS".into(),
                owner: None,
                comment: None,
                columns: vec![Column {
                    name: "STATUS".into(),
                    data_type: "NUMBER".into(),
                    nullable: false,
                    comment: None,
                    default_value: None,
                }],
                primary_key: Vec::new(),
                row_count: None,
                indexes: Vec::new(),
            }],
            foreign_keys: Vec::new(),
            check_constraints: vec![
                CheckConstraint {
                    table_name: "ORDERS".into(),
                    constraint_name: None,
                    condition: "status IN (0, 1)".into(),
                },
                CheckConstraint {
                    table_name: "ORDERS".into(),
                    constraint_name: None,
                    condition: "KIND IN ('A')".into(),
                },
            ],
            enums: Vec::new(),
        };
        let sets = schema.check_enums();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].column_name, "STATUS");
        assert_eq!(sets[0].values[1], EnumValue { code: "1".into(), meaning: "1".into() });
    }

    #[test]
    fn test_open_source_descriptors() {
        assert!(open_source("json:/tmp/x.json", SourceCredentials::default()).is_ok());
        assert!(open_source("dump.json", SourceCredentials::default()).is_ok());
        let pg = open_source("postgres://app:secret@db:5432/shop", SourceCredentials::default()).unwrap();
        assert_eq!(pg.describe(), "postgres://db:5432/shop");
        assert!(matches!(
            open_source("oracle://x", SourceCredentials::default()).err().unwrap(),
            KnowledgeError::IngestionSource(_)
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = SourceCredentials {
            user: Some("app".into()),
            password: Some("hunter2".into()),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_json_source_normalizes_and_filters() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("schema.json");
        std::fs::write(
            &path,
            r#"{
                "tables": [
                    {"name": "orders", "columns": [{"name": "id", "data_type": "NUMBER"}]},
                    {"name": "customers", "columns": [{"name": "id", "data_type": "NUMBER"}]}
                ],
                "foreign_keys": [
                    {"source_table": "orders", "source_columns": ["customer_id"],
                     "target_table": "customers", "target_columns": ["id"]}
                ]
            }"#,
        )
        .unwrap();

        let source = JsonDumpSource::new(&path);
        let all = source.extract(&[]).await.unwrap();
        assert_eq!(all.tables[0].name, "CUSTOMERS");
        assert_eq!(all.edges()[0].join_condition, "ORDERS.CUSTOMER_ID = CUSTOMERS.ID");

        let only = source.extract(&["Customers".to_string()]).await.unwrap();
        assert_eq!(only.tables.len(), 1);
        assert!(only.foreign_keys.is_empty());
    }

    #[tokio::test]
    async fn test_missing_json_is_source_error() {
        let err = JsonDumpSource::new("/nonexistent/schema.json")
            .extract(&[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ingestion_source_error");
    }

    #[tokio::test]
    async fn test_sqlite_introspection() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shop.db");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await.unwrap();
        for stmt in [
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, email TEXT NOT NULL)",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers(id), status INTEGER CHECK (status IN (0, 1, 2)))",
            "CREATE UNIQUE INDEX idx_customers_email ON customers(email)",
            "INSERT INTO customers (id, email) VALUES (1, 'a@example.com')",
        ] {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        pool.close().await;

        let schema = SqliteSource::new(&path).extract(&[]).await.unwrap();
        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["CUSTOMERS", "ORDERS"]);

        let customers = &schema.tables[0];
        assert_eq!(customers.primary_key, vec!["ID"]);
        assert_eq!(customers.row_count, Some(1));
        assert!(!customers.column("email").unwrap().nullable);
        assert!(customers.indexes.iter().any(|i| i.unique && i.columns == vec!["EMAIL"]));

        let edges = schema.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].join_condition, "ORDERS.CUSTOMER_ID = CUSTOMERS.ID");

        let enums = schema.check_enums();
        assert_eq!(enums.len(), 1);
        assert_eq!(enums[0].values.len(), 3);
    }
}
