//! HTTP server for the schema tools.
//!
//! Serves the same six tools two ways: a plain JSON API for scripts and
//! editors that speak HTTP, and MCP Streamable HTTP at `/mcp` for MCP
//! clients. Both read one shared, immutable [`Knowledge`] snapshot.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List the tools with their parameter schemas |
//! | `POST` | `/tools/{name}` | Call a tool with a JSON object body |
//! | `GET`  | `/health` | Health check (version and snapshot size) |
//! | `*`    | `/mcp` | MCP Streamable HTTP endpoint |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "table 'ORDER' not found", "suggestions": ["ORDERS"] } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request`, `embeddings_disabled`, `index_model_mismatch` | 400 |
//! | `not_found`, `unknown_table` | 404 |
//! | `timeout` | 408 |
//! | anything else | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.
//!
//! # Cursor Integration
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "schema-harness": {
//!       "command": "shx",
//!       "args": ["--config", "/path/to/shx.toml", "serve", "stdio"]
//!     }
//!   }
//! }
//! ```

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::knowledge::Knowledge;
use crate::mcp::McpBridge;
use crate::tools::{dispatch, tool_definitions, ToolDefinition, ToolError};

#[derive(Clone)]
struct AppState {
    knowledge: Knowledge,
}

/// Build the router: tool routes, health check and the `/mcp` endpoint.
pub fn router(knowledge: Knowledge) -> Router {
    let bridge = McpBridge::new(knowledge.clone());
    let mcp = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .nest_service("/mcp", mcp)
        .layer(cors)
        .with_state(AppState { knowledge })
}

/// Serve HTTP on `bind` until Ctrl-C.
pub async fn run_server(knowledge: Knowledge, bind: &str) -> anyhow::Result<()> {
    let app = router(knowledge);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind = %bind, "HTTP server listening (MCP at /mcp)");
    println!("Schema Harness listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

// ============ Error response ============

struct AppError(ToolError);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.code() {
            "bad_request" | "embeddings_disabled" | "index_model_mismatch" => StatusCode::BAD_REQUEST,
            "not_found" | "unknown_table" => StatusCode::NOT_FOUND,
            "timeout" => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "tool call failed");
        }
        (status, Json(self.0.to_json())).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    tables: usize,
    chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tables: state.knowledge.store().table_count(),
        chunks: state.knowledge.index().len(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDefinition>,
}

async fn handle_list_tools() -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: tool_definitions(),
    })
}

// ============ POST /tools/{name} ============

/// Returns `404` for an unknown tool or table, `400` for bad arguments,
/// `408` when the query embedding times out.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = dispatch(&state.knowledge, &name, params)
        .await
        .map_err(AppError)?;
    Ok(Json(serde_json::json!({ "result": result })))
}
