//! Hybrid retrieval over the schema snapshot.
//!
//! [`RetrievalEngine`] turns a natural-language query into ranked tables or
//! columns by combining two signals:
//!
//! 1. **Vector**: the query is embedded and matched against the
//!    [`SemanticIndex`]; each hit is mapped back to its owning table/column
//!    through the [`MetadataStore`].
//! 2. **Literal** (columns only): column names equal to, or containing, the
//!    query. A literal match always outranks a purely semantic one, whatever
//!    the raw similarity says.
//!
//! # Column ranking
//!
//! ```text
//! (match tier desc, similarity desc, table asc, column asc)
//! tier: exact = 2, substring = 1, semantic = 0
//! ```
//!
//! The `*_with_vector` variants take an already-computed query embedding;
//! the async entry points embed the query first (bounded by
//! `embedding.query_timeout_secs`).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::chunk::{column_chunk_id, render_column};
use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::index::SemanticIndex;
use crate::models::{normalize_ident, ChunkKind, Column, Table};
use crate::store::MetadataStore;

const SNIPPET_CHARS: usize = 240;

/// A table returned by [`RetrievalEngine::search_schema`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableHit {
    pub table_name: String,
    pub score: f64,
    pub snippet: String,
    pub column_count: usize,
    pub has_comment: bool,
}

/// How a column matched a column search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Substring,
    Semantic,
}

impl MatchType {
    fn tier(self) -> u8 {
        match self {
            MatchType::Exact => 2,
            MatchType::Substring => 1,
            MatchType::Semantic => 0,
        }
    }
}

/// A column returned by [`RetrievalEngine::search_columns`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnHit {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub match_type: MatchType,
    pub score: f64,
    pub snippet: String,
}

pub struct RetrievalEngine<'k> {
    store: &'k MetadataStore,
    index: &'k SemanticIndex,
    embedder: &'k Embedder,
    config: &'k RetrievalConfig,
}

impl<'k> RetrievalEngine<'k> {
    pub fn new(
        store: &'k MetadataStore,
        index: &'k SemanticIndex,
        embedder: &'k Embedder,
        config: &'k RetrievalConfig,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            config,
        }
    }

    /// Tables most relevant to `query`, best first.
    pub async fn search_schema(&self, query: &str, top_k: usize) -> KnowledgeResult<Vec<TableHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embed_query(query).await?;
        Ok(self.search_schema_with_vector(&vector, top_k))
    }

    /// Columns most relevant to `query`, best first, optionally restricted
    /// to columns whose declared type contains `data_type`.
    ///
    /// With embeddings disabled, an empty index, or an index built with
    /// another model, only literal name matches are returned.
    pub async fn search_columns(
        &self,
        query: &str,
        data_type: Option<&str>,
        top_k: usize,
    ) -> KnowledgeResult<Vec<ColumnHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = if self.embedder.is_enabled() && !self.index.is_empty() {
            match self.embed_query(query).await {
                Ok(vector) => Some(vector),
                Err(KnowledgeError::IndexModelMismatch { index, query: model }) => {
                    tracing::warn!(
                        index = %index,
                        configured = %model,
                        "index built with another model, column search is literal only"
                    );
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            tracing::debug!("no semantic index available, column search is literal only");
            None
        };
        Ok(self.search_columns_with_vector(query, data_type, top_k, vector.as_deref()))
    }

    async fn embed_query(&self, query: &str) -> KnowledgeResult<Vec<f32>> {
        if !self.embedder.is_enabled() {
            return Err(KnowledgeError::EmbeddingsDisabled);
        }
        if let Some(model) = self.index.model() {
            if model != self.embedder.model_name() {
                return Err(KnowledgeError::IndexModelMismatch {
                    index: model.to_string(),
                    query: self.embedder.model_name().to_string(),
                });
            }
        }
        self.embedder.embed_query(query).await
    }

    pub fn search_schema_with_vector(&self, vector: &[f32], top_k: usize) -> Vec<TableHit> {
        let candidates = self.index.search(vector, self.config.candidate_k.max(top_k));

        // Candidates arrive best-first, so the first chunk seen for a table
        // carries its best score.
        let mut best: BTreeMap<&str, TableHit> = BTreeMap::new();
        for hit in candidates {
            let Ok(table) = self.store.get_table(&hit.chunk.table_name) else {
                continue;
            };
            best.entry(table.name.as_str()).or_insert_with(|| TableHit {
                table_name: table.name.clone(),
                score: hit.score,
                snippet: snippet(&hit.chunk.text),
                column_count: table.columns.len(),
                has_comment: table.comment.is_some(),
            });
        }

        let mut hits: Vec<TableHit> = best.into_values().collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.table_name.cmp(&b.table_name))
        });
        hits.truncate(top_k);
        hits
    }

    pub fn search_columns_with_vector(
        &self,
        query: &str,
        data_type: Option<&str>,
        top_k: usize,
        vector: Option<&[f32]>,
    ) -> Vec<ColumnHit> {
        let needle = literal_needle(query);
        let type_filter = data_type.map(|t| t.trim().to_uppercase()).filter(|t| !t.is_empty());
        let type_ok = |column: &Column| {
            type_filter
                .as_deref()
                .map_or(true, |t| column.data_type.to_uppercase().contains(t))
        };

        let mut candidates: BTreeMap<(&str, &str), (MatchType, &Table, &Column)> = BTreeMap::new();

        if !needle.is_empty() {
            for table in self.store.tables() {
                for column in table.columns.iter().filter(|c| type_ok(*c)) {
                    let match_type = if column.name == needle {
                        MatchType::Exact
                    } else if column.name.contains(&needle) {
                        MatchType::Substring
                    } else {
                        continue;
                    };
                    candidates.insert(
                        (table.name.as_str(), column.name.as_str()),
                        (match_type, table, column),
                    );
                }
            }
        }

        if let Some(vector) = vector {
            let k = self.config.candidate_k.max(top_k);
            for hit in self.index.search_kind(vector, k, ChunkKind::Column) {
                let Some(column_name) = hit.chunk.column_name.as_deref() else {
                    continue;
                };
                let Ok(table) = self.store.get_table(&hit.chunk.table_name) else {
                    continue;
                };
                let Some(column) = table.column(column_name).filter(|c| type_ok(*c)) else {
                    continue;
                };
                candidates
                    .entry((table.name.as_str(), column.name.as_str()))
                    .or_insert((MatchType::Semantic, table, column));
            }
        }

        let mut hits: Vec<ColumnHit> = candidates
            .into_values()
            .map(|(match_type, table, column)| {
                let score = vector
                    .and_then(|v| self.index.similarity(&column_chunk_id(&table.name, &column.name), v))
                    .unwrap_or(0.0);
                let enums = self.store.get_enum_set(&table.name, &column.name);
                ColumnHit {
                    table_name: table.name.clone(),
                    column_name: column.name.clone(),
                    data_type: column.data_type.clone(),
                    match_type,
                    score,
                    snippet: snippet(&render_column(&table.name, column, enums)),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.match_type
                .tier()
                .cmp(&a.match_type.tier())
                .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
                .then_with(|| a.table_name.cmp(&b.table_name))
                .then_with(|| a.column_name.cmp(&b.column_name))
        });
        hits.truncate(top_k);
        hits
    }
}

/// Column-name form of a query: `"customer email"` -> `CUSTOMER_EMAIL`.
fn literal_needle(query: &str) -> String {
    normalize_ident(query)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(SNIPPET_CHARS).collect();
    cut.push_str("...");
    cut
}
