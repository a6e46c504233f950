//! # Schema Harness
//!
//! A read-only schema knowledge engine for AI coding assistants.
//!
//! Schema Harness gives assistants verified facts about a relational schema
//! (tables, columns, foreign keys, enum codes, join conditions) without
//! giving them a database connection. Credentials are only used by an
//! offline ingestion step that writes a local SQLite snapshot; everything
//! served afterwards is answered from that snapshot.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Schema source│──▶│ Merger        │──▶│ SQLite       │
//! │ PG/SQLite/JSON│  │ +overrides    │   │ snapshot     │
//! └──────────────┘   │ +embeddings   │   └──────┬───────┘
//!                    └───────────────┘          │ read-only
//!                                               ▼
//!                          ┌────────────────────────────────┐
//!                          │ Knowledge: store, graph, index │
//!                          └───────┬───────────────┬────────┘
//!                                  ▼               ▼
//!                            ┌──────────┐    ┌───────────┐
//!                            │ CLI (shx)│    │ HTTP / MCP│
//!                            └──────────┘    └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! shx init
//! shx ingest --source postgres://db.internal/sales --user reader
//! shx search "customer orders"
//! shx path ORDER_ITEMS CUSTOMERS
//! shx serve stdio
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed failures |
//! | [`models`] | Tables, columns, edges, enums, chunks, join paths |
//! | [`store`] | Structured metadata lookups |
//! | [`graph`] | Foreign-key graph and join-path resolution |
//! | [`index`] | Vector index over schema chunks |
//! | [`search`] | Table and column retrieval |
//! | [`knowledge`] | The shared read-only snapshot handle |
//! | [`extract`] | Schema sources |
//! | [`overrides`] | Manual enum override files |
//! | [`merge`] | Reconciling extractions into the snapshot |
//! | [`ingest`] | `shx ingest` |
//! | [`tools`] | The six tool operations |
//! | [`server`], [`mcp`] | HTTP and MCP transports |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod graph;
pub mod index;
pub mod ingest;
pub mod knowledge;
pub mod mcp;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod overrides;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
pub mod tools;
