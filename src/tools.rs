//! The six schema tools and their dispatch.
//!
//! Every transport (HTTP, MCP, the query subcommands of the CLI) goes
//! through [`dispatch`]: the tool name and JSON arguments are parsed into a
//! [`ToolCall`] variant with typed parameters, then executed against a
//! [`Knowledge`] handle. There is no registry and no dynamic lookup; adding a
//! tool means adding a variant.
//!
//! | Tool | Arguments |
//! |------|-----------|
//! | `search_db_schema` | `query`, `limit?` |
//! | `get_table_schema` | `table_name` |
//! | `get_enum_values` | `table_name`, `column_name` |
//! | `get_join_pattern` | `table_a`, `table_b` |
//! | `find_join_path` | `from_table`, `to_table`, `max_hops?` |
//! | `search_columns` | `query`, `data_type?`, `limit?` |
//!
//! "No relation" and "no path" are ordinary results with `found: false`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::KnowledgeError;
use crate::graph::JoinPathOutcome;
use crate::knowledge::Knowledge;
use crate::models::{normalize_ident, EnumSet, ForeignKeyEdge, Table};

const SUGGESTION_LIMIT: usize = 5;
const AVAILABLE_COLUMNS_LIMIT: usize = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSchemaParams {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableParams {
    pub table_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnumParams {
    pub table_name: String,
    pub column_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinPatternParams {
    pub table_a: String,
    pub table_b: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinPathParams {
    pub from_table: String,
    pub to_table: String,
    #[serde(default)]
    pub max_hops: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchColumnsParams {
    pub query: String,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One parsed tool invocation.
#[derive(Debug, Clone)]
pub enum ToolCall {
    SearchDbSchema(SearchSchemaParams),
    GetTableSchema(TableParams),
    GetEnumValues(EnumParams),
    GetJoinPattern(JoinPatternParams),
    FindJoinPath(JoinPathParams),
    SearchColumns(SearchColumnsParams),
}

impl ToolCall {
    /// Parse a tool name and its JSON arguments.
    pub fn parse(name: &str, args: Value) -> Result<Self, ToolError> {
        let args = if args.is_null() { json!({}) } else { args };
        Ok(match name {
            "search_db_schema" => ToolCall::SearchDbSchema(params(name, args)?),
            "get_table_schema" => ToolCall::GetTableSchema(params(name, args)?),
            "get_enum_values" => ToolCall::GetEnumValues(params(name, args)?),
            "get_join_pattern" => ToolCall::GetJoinPattern(params(name, args)?),
            "find_join_path" => ToolCall::FindJoinPath(params(name, args)?),
            "search_columns" => ToolCall::SearchColumns(params(name, args)?),
            other => return Err(ToolError::UnknownTool(other.to_string())),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SearchDbSchema(_) => "search_db_schema",
            ToolCall::GetTableSchema(_) => "get_table_schema",
            ToolCall::GetEnumValues(_) => "get_enum_values",
            ToolCall::GetJoinPattern(_) => "get_join_pattern",
            ToolCall::FindJoinPath(_) => "find_join_path",
            ToolCall::SearchColumns(_) => "search_columns",
        }
    }
}

fn params<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| {
        ToolError::from(KnowledgeError::InvalidArgument(format!("{}: {}", tool, e)))
    })
}

/// A failed tool call.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("no tool registered with name: {0}")]
    UnknownTool(String),

    /// A typed failure, optionally with hints for the caller (table-name
    /// suggestions, available columns).
    #[error("{error}")]
    Failed {
        error: KnowledgeError,
        details: Option<Value>,
    },
}

impl ToolError {
    fn with_details(error: KnowledgeError, details: Value) -> Self {
        ToolError::Failed {
            error,
            details: Some(details),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "not_found",
            ToolError::Failed { error, .. } => error.code(),
        }
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            ToolError::UnknownTool(_) => None,
            ToolError::Failed { details, .. } => details.as_ref(),
        }
    }

    /// `{"error": {"code", "message", ...details}}`.
    pub fn to_json(&self) -> Value {
        let mut error = json!({ "code": self.code(), "message": self.to_string() });
        if let (Some(Value::Object(extra)), Value::Object(map)) = (self.details(), &mut error) {
            for (key, value) in extra {
                map.insert(key.clone(), value.clone());
            }
        }
        json!({ "error": error })
    }
}

impl From<KnowledgeError> for ToolError {
    fn from(error: KnowledgeError) -> Self {
        ToolError::Failed {
            error,
            details: None,
        }
    }
}

/// A tool descriptor for `GET /tools/list` and MCP `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "search_db_schema",
            description: "Find the tables most relevant to a natural-language question",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What the data is about, e.g. 'customer orders'" },
                    "limit": { "type": "integer", "description": "Max tables", "default": 10 }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "get_table_schema",
            description: "Columns, types, comments, primary key and foreign keys of one table",
            parameters: json!({
                "type": "object",
                "properties": {
                    "table_name": { "type": "string", "description": "Table name (case-insensitive)" }
                },
                "required": ["table_name"]
            }),
        },
        ToolDefinition {
            name: "get_enum_values",
            description: "Known codes and their meanings for an enumerated column",
            parameters: json!({
                "type": "object",
                "properties": {
                    "table_name": { "type": "string" },
                    "column_name": { "type": "string" }
                },
                "required": ["table_name", "column_name"]
            }),
        },
        ToolDefinition {
            name: "get_join_pattern",
            description: "Direct foreign-key join conditions between two tables",
            parameters: json!({
                "type": "object",
                "properties": {
                    "table_a": { "type": "string" },
                    "table_b": { "type": "string" }
                },
                "required": ["table_a", "table_b"]
            }),
        },
        ToolDefinition {
            name: "find_join_path",
            description: "Shortest chain of foreign-key joins connecting two tables",
            parameters: json!({
                "type": "object",
                "properties": {
                    "from_table": { "type": "string" },
                    "to_table": { "type": "string" },
                    "max_hops": { "type": "integer", "description": "Max joins in the path", "default": 4 }
                },
                "required": ["from_table", "to_table"]
            }),
        },
        ToolDefinition {
            name: "search_columns",
            description: "Find columns by name or meaning; literal name matches rank first",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Column name or description" },
                    "data_type": { "type": "string", "description": "Only columns whose type contains this, e.g. 'DATE'" },
                    "limit": { "type": "integer", "description": "Max columns", "default": 20 }
                },
                "required": ["query"]
            }),
        },
    ]
}

/// Parse and run one tool call.
pub async fn dispatch(knowledge: &Knowledge, name: &str, args: Value) -> Result<Value, ToolError> {
    let call = ToolCall::parse(name, args)?;
    execute(knowledge, call).await
}

pub async fn execute(knowledge: &Knowledge, call: ToolCall) -> Result<Value, ToolError> {
    tracing::debug!(tool = call.name(), "tool call");
    match call {
        ToolCall::SearchDbSchema(p) => search_db_schema(knowledge, p).await,
        ToolCall::GetTableSchema(p) => get_table_schema(knowledge, p),
        ToolCall::GetEnumValues(p) => get_enum_values(knowledge, p),
        ToolCall::GetJoinPattern(p) => get_join_pattern(knowledge, p),
        ToolCall::FindJoinPath(p) => find_join_path(knowledge, p),
        ToolCall::SearchColumns(p) => search_columns(knowledge, p).await,
    }
}

fn require_query(query: &str) -> Result<(), ToolError> {
    if query.trim().is_empty() {
        return Err(KnowledgeError::InvalidArgument("query must not be empty".into()).into());
    }
    Ok(())
}

fn lookup_table<'k>(knowledge: &'k Knowledge, name: &str) -> Result<&'k Table, ToolError> {
    knowledge.store().get_table(name).map_err(|error| {
        let suggestions = knowledge
            .store()
            .similar_table_names(name, SUGGESTION_LIMIT);
        ToolError::with_details(error, json!({ "suggestions": suggestions }))
    })
}

async fn search_db_schema(knowledge: &Knowledge, p: SearchSchemaParams) -> Result<Value, ToolError> {
    require_query(&p.query)?;
    let retrieval = &knowledge.config().retrieval;
    let limit = retrieval.clamp_limit(p.limit, retrieval.default_limit);
    let results = knowledge.retrieval().search_schema(&p.query, limit).await?;
    let empty = results.is_empty();

    let mut body = json!({
        "query": p.query,
        "result_count": results.len(),
        "results": results,
    });
    if empty {
        body["message"] = json!("No tables matched; try different wording or search_columns");
    }
    Ok(body)
}

fn get_table_schema(knowledge: &Knowledge, p: TableParams) -> Result<Value, ToolError> {
    let store = knowledge.store();
    let table = lookup_table(knowledge, &p.table_name)?;

    let columns: Vec<Value> = table
        .columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "data_type": c.data_type,
                "nullable": c.nullable,
                "comment": c.comment,
                "default": c.default_value,
                "has_enum_values": store.get_enum_set(&table.name, &c.name).is_some(),
            })
        })
        .collect();

    let parents: Vec<Value> = store
        .outgoing_edges(&table.name)
        .into_iter()
        .map(|e| relationship(e, &e.target_table))
        .collect();
    let children: Vec<Value> = store
        .incoming_edges(&table.name)
        .into_iter()
        .map(|e| relationship(e, &e.source_table))
        .collect();

    Ok(json!({
        "table_name": table.name,
        "owner": table.owner,
        "description": table.comment,
        "primary_key": table.primary_key,
        "row_count": table.row_count,
        "column_count": table.columns.len(),
        "columns": columns,
        "indexes": table.indexes,
        "relationships": {
            "parents": parents,
            "children": children,
        },
    }))
}

fn relationship(edge: &ForeignKeyEdge, other: &str) -> Value {
    json!({
        "table_name": other,
        "source_columns": edge.source_columns,
        "target_columns": edge.target_columns,
        "join_condition": edge.join_condition,
        "constraint_name": edge.constraint_name,
    })
}

fn get_enum_values(knowledge: &Knowledge, p: EnumParams) -> Result<Value, ToolError> {
    let table = lookup_table(knowledge, &p.table_name)?;
    let Some(column) = table.column(&p.column_name) else {
        let available: Vec<&str> = table
            .columns
            .iter()
            .take(AVAILABLE_COLUMNS_LIMIT)
            .map(|c| c.name.as_str())
            .collect();
        return Err(ToolError::with_details(
            KnowledgeError::NotFound(format!(
                "column '{}.{}'",
                table.name,
                normalize_ident(&p.column_name)
            )),
            json!({ "available_columns": available }),
        ));
    };

    match knowledge.store().get_enum_set(&table.name, &column.name) {
        Some(set) => Ok(json!({
            "table_name": set.table_name,
            "column_name": set.column_name,
            "column_type": column.data_type,
            "source": set.source,
            "value_count": set.values.len(),
            "values": set.values,
            "usage_hint": usage_hint(set),
        })),
        None => Ok(json!({
            "table_name": table.name,
            "column_name": column.name,
            "column_type": column.data_type,
            "source": Value::Null,
            "value_count": 0,
            "values": [],
            "message": format!(
                "No enumerated values known for {}.{}; add them to the overrides file",
                table.name, column.name
            ),
        })),
    }
}

fn usage_hint(set: &EnumSet) -> String {
    let Some(first) = set.values.first() else {
        return String::new();
    };
    let literal = if first.code.parse::<f64>().is_ok() {
        first.code.clone()
    } else {
        format!("'{}'", first.code.replace('\'', "''"))
    };
    format!(
        "WHERE {}.{} = {} -- {}",
        set.table_name, set.column_name, literal, first.meaning
    )
}

fn get_join_pattern(knowledge: &Knowledge, p: JoinPatternParams) -> Result<Value, ToolError> {
    let a = lookup_table(knowledge, &p.table_a)?;
    let b = lookup_table(knowledge, &p.table_b)?;
    let edges = knowledge.store().get_foreign_key_edges(&a.name, &b.name);

    if edges.is_empty() {
        return Ok(json!({
            "found": false,
            "table_a": a.name,
            "table_b": b.name,
            "message": format!(
                "No direct foreign key between {} and {}; use find_join_path for multi-hop joins",
                a.name, b.name
            ),
        }));
    }

    let relationships: Vec<Value> = edges
        .iter()
        .map(|e| {
            json!({
                "relationship_type": "direct_fk",
                "parent_table": e.target_table,
                "child_table": e.source_table,
                "join_condition": e.join_condition,
                "constraint_name": e.constraint_name,
                "sql_example": format!(
                    "SELECT *\nFROM {}\nJOIN {} ON {}",
                    e.source_table, e.target_table, e.join_condition
                ),
            })
        })
        .collect();

    Ok(json!({
        "found": true,
        "table_a": a.name,
        "table_b": b.name,
        "relationships": relationships,
    }))
}

fn find_join_path(knowledge: &Knowledge, p: JoinPathParams) -> Result<Value, ToolError> {
    let retrieval = &knowledge.config().retrieval;
    let max_hops = p.max_hops.unwrap_or(retrieval.max_hops);

    let outcome = knowledge
        .resolver()
        .find_path(&p.from_table, &p.to_table, max_hops)
        .map_err(|error| {
            let name = match &error {
                KnowledgeError::UnknownTable(name) => name.clone(),
                _ => p.from_table.clone(),
            };
            let suggestions = knowledge
                .store()
                .similar_table_names(&name, SUGGESTION_LIMIT);
            ToolError::with_details(error, json!({ "suggestions": suggestions }))
        })?;

    match outcome {
        JoinPathOutcome::Found(path) => {
            let steps: Vec<Value> = path
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    json!({
                        "step": i + 1,
                        "from_table": step.from_table,
                        "to_table": step.to_table,
                        "join_condition": step.edge.join_condition,
                        "constraint_name": step.edge.constraint_name,
                    })
                })
                .collect();
            Ok(json!({
                "found": true,
                "from_table": path.source,
                "to_table": path.destination,
                "hops": path.hops(),
                "path": path.tables(),
                "steps": steps,
                "sql_example": path.sql_example(),
            }))
        }
        JoinPathOutcome::NoPathFound {
            source,
            destination,
            max_hops,
        } => {
            let graph = knowledge.graph();
            Ok(json!({
                "found": false,
                "from_table": source,
                "to_table": destination,
                "max_hops": max_hops,
                "message": format!(
                    "No join path from {} to {} within {} hops",
                    source, destination, max_hops
                ),
                "related_from": graph.related_tables(&source, retrieval.related_hops, retrieval.related_limit),
                "related_to": graph.related_tables(&destination, retrieval.related_hops, retrieval.related_limit),
            }))
        }
    }
}

async fn search_columns(knowledge: &Knowledge, p: SearchColumnsParams) -> Result<Value, ToolError> {
    require_query(&p.query)?;
    let retrieval = &knowledge.config().retrieval;
    let limit = retrieval.clamp_limit(p.limit, retrieval.column_limit);
    let results = knowledge
        .retrieval()
        .search_columns(&p.query, p.data_type.as_deref(), limit)
        .await?;

    Ok(json!({
        "query": p.query,
        "data_type_filter": p.data_type,
        "result_count": results.len(),
        "results": results,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::build_chunks;
    use crate::config::{Config, DbConfig, EmbeddingConfig, IngestConfig, RetrievalConfig, ServerConfig};
    use crate::embedding::Embedder;
    use crate::index::SemanticIndex;
    use crate::models::{Column, EnumSource, EnumValue};
    use crate::store::MetadataStore;

    fn column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.into(),
            data_type: data_type.into(),
            nullable: false,
            comment: None,
            default_value: None,
        }
    }

    fn table(name: &str, comment: &str, columns: Vec<Column>) -> Table {
        Table {
            name: name.into(),
            owner: Some("SALES".into()),
            comment: Some(comment.into()),
            columns,
            primary_key: vec!["ID".into()],
            row_count: None,
            indexes: Vec::new(),
        }
    }

    async fn knowledge() -> Knowledge {
        let tables = vec![
            table("CUSTOMERS", "People who buy things", vec![column("ID", "NUMBER"), column("EMAIL", "VARCHAR2(200)")]),
            table("ORDERS", "Customer orders", vec![
                column("ID", "NUMBER"),
                column("CUSTOMER_ID", "NUMBER"),
                column("STATUS", "NUMBER(1)"),
                column("CREATED_AT", "DATE"),
            ]),
            table("ORDER_ITEMS", "Lines of an order", vec![column("ID", "NUMBER"), column("ORDER_ID", "NUMBER")]),
            table("AUDIT_LOG", "Unrelated audit trail", vec![column("ID", "NUMBER")]),
        ];
        let edges = vec![
            ForeignKeyEdge::new("ORDER_ITEMS", &["ORDER_ID"], "ORDERS", &["ID"], Some("FK_ITEMS_ORDER")),
            ForeignKeyEdge::new("ORDERS", &["CUSTOMER_ID"], "CUSTOMERS", &["ID"], Some("FK_ORDERS_CUSTOMER")),
        ];
        let status = EnumSet {
            table_name: "ORDERS".into(),
            column_name: "STATUS".into(),
            source: EnumSource::Manual,
            values: [("0", "Draft"), ("1", "Pending"), ("2", "Approved"), ("9", "Cancelled")]
                .iter()
                .map(|(c, m)| EnumValue {
                    code: c.to_string(),
                    meaning: m.to_string(),
                })
                .collect(),
        };
        let store = MetadataStore::new(tables, edges, vec![status]);

        let embedding = EmbeddingConfig {
            provider: "hash".into(),
            ..Default::default()
        };
        let embedder = Embedder::from_config(&embedding).unwrap();
        let chunks = build_chunks(store.tables(), |t, c| store.get_enum_set(t, c));
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        let index = SemanticIndex::new(Some("hash".into()), chunks.into_iter().zip(vectors).collect());

        let config = Config {
            db: DbConfig {
                path: "unused.sqlite".into(),
            },
            retrieval: RetrievalConfig::default(),
            embedding,
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        };
        Knowledge::from_parts(config, store, index, embedder)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_rejected() {
        let k = knowledge().await;
        let err = dispatch(&k, "drop_table", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_missing_argument_is_bad_request() {
        let k = knowledge().await;
        let err = dispatch(&k, "get_table_schema", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[tokio::test]
    async fn test_table_schema_includes_relationships() {
        let k = knowledge().await;
        let result = dispatch(&k, "get_table_schema", json!({ "table_name": "orders" }))
            .await
            .unwrap();
        assert_eq!(result["table_name"], "ORDERS");
        assert_eq!(result["columns"].as_array().unwrap().len(), 4);
        assert_eq!(result["columns"][2]["has_enum_values"], true);
        assert_eq!(result["relationships"]["parents"][0]["table_name"], "CUSTOMERS");
        assert_eq!(result["relationships"]["children"][0]["table_name"], "ORDER_ITEMS");
    }

    #[tokio::test]
    async fn test_unknown_table_carries_suggestions() {
        let k = knowledge().await;
        let err = dispatch(&k, "get_table_schema", json!({ "table_name": "ORDER" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
        let body = err.to_json();
        let suggestions = body["error"]["suggestions"].as_array().unwrap();
        assert!(suggestions.contains(&json!("ORDERS")));
        assert!(suggestions.contains(&json!("ORDER_ITEMS")));
    }

    #[tokio::test]
    async fn test_enum_values_keep_override_order() {
        let k = knowledge().await;
        let result = dispatch(
            &k,
            "get_enum_values",
            json!({ "table_name": "ORDERS", "column_name": "STATUS" }),
        )
        .await
        .unwrap();
        let codes: Vec<&str> = result["values"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["code"].as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["0", "1", "2", "9"]);
        assert_eq!(result["source"], "manual");
        assert_eq!(result["usage_hint"], "WHERE ORDERS.STATUS = 0 -- Draft");
    }

    #[tokio::test]
    async fn test_enum_values_for_plain_and_unknown_columns() {
        let k = knowledge().await;
        let plain = dispatch(
            &k,
            "get_enum_values",
            json!({ "table_name": "ORDERS", "column_name": "CREATED_AT" }),
        )
        .await
        .unwrap();
        assert_eq!(plain["values"], json!([]));
        assert_eq!(plain["column_type"], "DATE");

        let err = dispatch(
            &k,
            "get_enum_values",
            json!({ "table_name": "ORDERS", "column_name": "NOPE" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_json()["error"]["available_columns"][0], "ID");
    }

    #[tokio::test]
    async fn test_join_pattern_direct_and_missing() {
        let k = knowledge().await;
        let found = dispatch(
            &k,
            "get_join_pattern",
            json!({ "table_a": "CUSTOMERS", "table_b": "ORDERS" }),
        )
        .await
        .unwrap();
        assert_eq!(found["found"], true);
        assert_eq!(found["relationships"][0]["parent_table"], "CUSTOMERS");
        assert_eq!(found["relationships"][0]["child_table"], "ORDERS");

        let missing = dispatch(
            &k,
            "get_join_pattern",
            json!({ "table_a": "CUSTOMERS", "table_b": "ORDER_ITEMS" }),
        )
        .await
        .unwrap();
        assert_eq!(missing["found"], false);
    }

    #[tokio::test]
    async fn test_find_join_path_two_hops_and_bounded() {
        let k = knowledge().await;
        let found = dispatch(
            &k,
            "find_join_path",
            json!({ "from_table": "ORDER_ITEMS", "to_table": "CUSTOMERS" }),
        )
        .await
        .unwrap();
        assert_eq!(found["hops"], 2);
        assert_eq!(found["path"], json!(["ORDER_ITEMS", "ORDERS", "CUSTOMERS"]));
        assert_eq!(found["steps"][0]["join_condition"], "ORDER_ITEMS.ORDER_ID = ORDERS.ID");

        let bounded = dispatch(
            &k,
            "find_join_path",
            json!({ "from_table": "CUSTOMERS", "to_table": "ORDER_ITEMS", "max_hops": 1 }),
        )
        .await
        .unwrap();
        assert_eq!(bounded["found"], false);
        assert_eq!(bounded["related_from"], json!(["ORDERS", "ORDER_ITEMS"]));
    }

    #[tokio::test]
    async fn test_find_join_path_unknown_endpoint() {
        let k = knowledge().await;
        let err = dispatch(
            &k,
            "find_join_path",
            json!({ "from_table": "ORDERS", "to_table": "INVOICES" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "unknown_table");
    }

    #[tokio::test]
    async fn test_search_columns_exact_first() {
        let k = knowledge().await;
        let result = dispatch(&k, "search_columns", json!({ "query": "email" }))
            .await
            .unwrap();
        assert_eq!(result["results"][0]["column_name"], "EMAIL");
        assert_eq!(result["results"][0]["match_type"], "exact");
    }

    #[tokio::test]
    async fn test_search_schema_finds_table_and_rejects_empty_query() {
        let k = knowledge().await;
        let result = dispatch(&k, "search_db_schema", json!({ "query": "customer orders", "limit": 2 }))
            .await
            .unwrap();
        assert!(result["result_count"].as_u64().unwrap() <= 2);
        assert_eq!(result["results"][0]["table_name"], "ORDERS");

        let err = dispatch(&k, "search_db_schema", json!({ "query": "  " }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[test]
    fn test_definitions_cover_every_call() {
        let names: Vec<&str> = tool_definitions().iter().map(|d| d.name).collect();
        for name in &names {
            let err = ToolCall::parse(name, json!({}));
            // Every tool has required arguments, so an empty object is a
            // parse failure rather than an unknown tool.
            assert!(matches!(err, Err(ToolError::Failed { .. })), "{}", name);
        }
        assert_eq!(names.len(), 6);
    }
}
