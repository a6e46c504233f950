//! # Schema Harness CLI (`shx`)
//!
//! The `shx` binary initializes a snapshot, ingests a schema into it, runs
//! the schema tools from the command line, and serves them over HTTP or MCP.
//!
//! ## Usage
//!
//! ```bash
//! shx --config ./config/shx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shx init` | Create the SQLite snapshot and its tables |
//! | `shx ingest --source <descriptor>` | Extract a schema and merge it into the snapshot |
//! | `shx stats` | Summarize the snapshot |
//! | `shx search "<query>"` | `search_db_schema` |
//! | `shx columns "<query>"` | `search_columns` |
//! | `shx table <name>` | `get_table_schema` |
//! | `shx enums <table> <column>` | `get_enum_values` |
//! | `shx join <a> <b>` | `get_join_pattern` |
//! | `shx path <from> <to>` | `find_join_path` |
//! | `shx serve http` | HTTP API plus MCP at `/mcp` |
//! | `shx serve stdio` | MCP over stdin/stdout |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest from Postgres; the password comes from $SHX_SOURCE_PASSWORD
//! shx ingest --source postgres://db.internal:5432/sales --user reader
//!
//! # Rebuild from a JSON dump with hand-written enum meanings
//! shx ingest --source json:./schema.json --overrides ./config/enums.yaml --clear
//!
//! # How do order lines relate to customers?
//! shx path ORDER_ITEMS CUSTOMERS
//! ```

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use schema_harness::config::{self, Config};
use schema_harness::ingest::{run_ingest, IngestOptions};
use schema_harness::knowledge::Knowledge;
use schema_harness::tools::dispatch;
use schema_harness::{mcp, migrate, server, stats};

/// Schema Harness CLI: verified schema facts for AI coding assistants,
/// without live database access.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/shx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "shx",
    about = "Schema Harness — a read-only schema knowledge engine for AI coding assistants",
    version,
    long_about = "Schema Harness extracts tables, columns, foreign keys and enum values from a \
    database into a local snapshot once, then answers schema questions (relevant tables, join \
    paths, enum meanings) from that snapshot via a CLI, an HTTP API and MCP."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shx.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the snapshot database.
    ///
    /// Creates the SQLite file and all tables. Idempotent.
    Init,

    /// Extract a schema and merge it into the snapshot.
    ///
    /// Source formats: `json:<path>`, `sqlite:<path>`, `postgres://host/db`.
    /// The password for live sources is read from the environment variable
    /// named by `ingest.password_env`, or from stdin with `--password-stdin`.
    Ingest {
        /// Connection descriptor of the source database.
        #[arg(long)]
        source: String,

        /// Login user for live sources.
        #[arg(long)]
        user: Option<String>,

        /// Read the password from the first line of stdin.
        #[arg(long)]
        password_stdin: bool,

        /// Drop everything in the snapshot before loading.
        #[arg(long)]
        clear: bool,

        /// Do not call the embedding provider; changed chunks stay stale.
        #[arg(long)]
        skip_embeddings: bool,

        /// Manual enum overrides (YAML or TOML); overrides `ingest.overrides`.
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Show what would change without writing or embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show snapshot statistics.
    Stats,

    /// Find tables relevant to a question.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Find columns by name or meaning.
    Columns {
        query: String,
        /// Only columns whose type contains this (e.g. `DATE`).
        #[arg(long = "type")]
        data_type: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show one table's columns, keys and relationships.
    Table { name: String },

    /// Show the known codes of an enumerated column.
    Enums { table: String, column: String },

    /// Show direct foreign-key joins between two tables.
    Join { table_a: String, table_b: String },

    /// Find the shortest join path between two tables.
    Path {
        from: String,
        to: String,
        #[arg(long)]
        max_hops: Option<usize>,
    },

    /// Serve the tools.
    Serve {
        #[command(subcommand)]
        transport: ServeTransport,
    },
}

#[derive(Subcommand)]
enum ServeTransport {
    /// HTTP API on `[server].bind`, with MCP Streamable HTTP at `/mcp`.
    Http,
    /// MCP over stdin/stdout.
    Stdio,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run one tool through the same dispatch the servers use and print its
/// JSON result.
async fn run_tool(cfg: &Config, name: &str, args: Value) -> anyhow::Result<()> {
    let knowledge = Knowledge::load(cfg).await?;
    match dispatch(&knowledge, name, args).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => anyhow::bail!("{}", serde_json::to_string_pretty(&e.to_json())?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Snapshot initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest {
            source,
            user,
            password_stdin,
            clear,
            skip_embeddings,
            overrides,
            dry_run,
        } => {
            let opts = IngestOptions {
                source,
                user,
                password_stdin,
                clear,
                skip_embeddings,
                overrides,
                dry_run,
            };
            run_ingest(&cfg, &opts).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Search { query, limit } => {
            run_tool(&cfg, "search_db_schema", json!({ "query": query, "limit": limit })).await?;
        }
        Commands::Columns {
            query,
            data_type,
            limit,
        } => {
            run_tool(
                &cfg,
                "search_columns",
                json!({ "query": query, "data_type": data_type, "limit": limit }),
            )
            .await?;
        }
        Commands::Table { name } => {
            run_tool(&cfg, "get_table_schema", json!({ "table_name": name })).await?;
        }
        Commands::Enums { table, column } => {
            run_tool(
                &cfg,
                "get_enum_values",
                json!({ "table_name": table, "column_name": column }),
            )
            .await?;
        }
        Commands::Join { table_a, table_b } => {
            run_tool(
                &cfg,
                "get_join_pattern",
                json!({ "table_a": table_a, "table_b": table_b }),
            )
            .await?;
        }
        Commands::Path { from, to, max_hops } => {
            run_tool(
                &cfg,
                "find_join_path",
                json!({ "from_table": from, "to_table": to, "max_hops": max_hops }),
            )
            .await?;
        }
        Commands::Serve { transport } => {
            let knowledge = Knowledge::load(&cfg).await?;
            match transport {
                ServeTransport::Http => server::run_server(knowledge, &cfg.server.bind).await?,
                ServeTransport::Stdio => mcp::run_stdio(knowledge).await?,
            }
        }
    }

    Ok(())
}
