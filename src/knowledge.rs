//! The read-only knowledge handle shared by every transport.
//!
//! [`Knowledge`] bundles one loaded snapshot (store, graph, index) with the
//! query embedder and retrieval settings. It is built once at startup and
//! cloned into each transport; clones share the same `Arc`s, nothing in it is
//! mutable, and no tool call ever reaches the source database.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db;
use crate::embedding::Embedder;
use crate::graph::{JoinPathResolver, SchemaGraph};
use crate::index::SemanticIndex;
use crate::search::RetrievalEngine;
use crate::store::MetadataStore;

#[derive(Clone)]
pub struct Knowledge {
    config: Arc<Config>,
    store: Arc<MetadataStore>,
    graph: Arc<SchemaGraph>,
    index: Arc<SemanticIndex>,
    embedder: Embedder,
}

impl Knowledge {
    /// Open the snapshot read-only and load it into memory.
    ///
    /// The SQLite pool is closed again before returning; serving never holds
    /// the snapshot file open.
    pub async fn load(config: &Config) -> Result<Self> {
        let pool = db::connect_read_only(config).await?;
        let store = MetadataStore::load(&pool)
            .await
            .context("Failed to load structured store")?;
        let index = SemanticIndex::load(&pool)
            .await
            .context("Failed to load semantic index")?;
        pool.close().await;

        let embedder = match Embedder::from_config(&config.embedding) {
            Ok(embedder) => embedder,
            Err(e) => {
                tracing::warn!(error = %e, "embedding provider unavailable, semantic search disabled");
                Embedder::disabled()
            }
        };

        let knowledge = Self::from_parts(config.clone(), store, index, embedder);
        tracing::info!(
            tables = knowledge.store.table_count(),
            edges = knowledge.graph.edge_count(),
            chunks = knowledge.index.len(),
            model = knowledge.index.model().unwrap_or("none"),
            "snapshot loaded"
        );
        Ok(knowledge)
    }

    /// Assemble a handle from in-memory parts; the graph is derived from the
    /// store's edges.
    pub fn from_parts(
        config: Config,
        store: MetadataStore,
        index: SemanticIndex,
        embedder: Embedder,
    ) -> Self {
        let graph = SchemaGraph::build(&store);
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            graph: Arc::new(graph),
            index: Arc::new(index),
            embedder,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn graph(&self) -> &SchemaGraph {
        &self.graph
    }

    pub fn index(&self) -> &SemanticIndex {
        &self.index
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn retrieval(&self) -> RetrievalEngine<'_> {
        RetrievalEngine::new(
            &self.store,
            &self.index,
            &self.embedder,
            &self.config.retrieval,
        )
    }

    pub fn resolver(&self) -> JoinPathResolver<'_> {
        JoinPathResolver::new(&self.graph)
    }
}
