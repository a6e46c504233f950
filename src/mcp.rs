//! MCP JSON-RPC protocol bridge.
//!
//! Exposes the six schema tools over MCP, either as a Streamable HTTP
//! endpoint nested in the axum server (`/mcp`) or over stdin/stdout for
//! clients that spawn `shx serve stdio` themselves.
//!
//! Tool failures are returned as `CallToolResult::error` with the JSON error
//! envelope as text; only an unknown tool name is a JSON-RPC error.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};

use crate::knowledge::Knowledge;
use crate::tools::{dispatch, tool_definitions, ToolDefinition, ToolError};

/// Bridges the tool surface to the MCP JSON-RPC protocol.
///
/// Each MCP session receives a clone; the snapshot behind [`Knowledge`] is
/// shared, so cloning is cheap.
#[derive(Clone)]
pub struct McpBridge {
    knowledge: Knowledge,
}

impl McpBridge {
    pub fn new(knowledge: Knowledge) -> Self {
        Self { knowledge }
    }

    fn to_mcp_tool(def: ToolDefinition) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match def.parameters {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: Cow::Borrowed(def.name),
            title: None,
            description: Some(Cow::Borrowed(def.description)),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "schema-harness".to_string(),
                title: Some("Schema Harness".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Schema Harness answers questions about a relational schema without database \
                 access. Use search_db_schema to find relevant tables, get_table_schema for \
                 columns and keys, get_enum_values before filtering on coded columns, and \
                 find_join_path to learn how to join two tables."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = tool_definitions()
            .into_iter()
            .map(Self::to_mcp_tool)
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        tool_definitions()
            .into_iter()
            .find(|d| d.name == name)
            .map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match dispatch(&self.knowledge, &request.name, args).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(ToolError::UnknownTool(name)) => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", name),
                None,
            )),
            Err(e) => {
                let text = serde_json::to_string_pretty(&e.to_json()).unwrap_or_default();
                Ok(CallToolResult::error(vec![Content::text(text)]))
            }
        }
    }
}

/// Serve MCP over stdin/stdout until the client disconnects.
///
/// Stdout carries the protocol; all logging must go to stderr.
pub async fn run_stdio(knowledge: Knowledge) -> anyhow::Result<()> {
    tracing::info!("MCP server on stdio");
    let service = McpBridge::new(knowledge)
        .serve(rmcp::transport::stdio())
        .await?;
    service.waiting().await?;
    Ok(())
}
