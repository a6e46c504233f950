//! In-memory vector index over schema chunks.
//!
//! Populated once per ingestion pass and loaded read-only for serving; there
//! is no online mutation. Search is brute-force cosine similarity, which is
//! plenty for schema-sized corpora (thousands of chunks, not millions).

use std::cmp::Ordering;
use std::collections::HashMap;

use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::error::KnowledgeResult;
use crate::models::{ChunkKind, SchemaChunk};

#[derive(Debug, Clone)]
struct IndexedChunk {
    chunk: SchemaChunk,
    vector: Vec<f32>,
}

/// A search hit: the chunk and its cosine similarity to the query.
#[derive(Debug, Clone, Copy)]
pub struct ScoredChunk<'a> {
    pub chunk: &'a SchemaChunk,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SemanticIndex {
    /// Embedding model every vector in the index was produced by.
    model: Option<String>,
    entries: Vec<IndexedChunk>,
    by_id: HashMap<String, usize>,
}

impl SemanticIndex {
    pub fn new(model: Option<String>, entries: Vec<(SchemaChunk, Vec<f32>)>) -> Self {
        let mut entries: Vec<IndexedChunk> = entries
            .into_iter()
            .map(|(chunk, vector)| IndexedChunk { chunk, vector })
            .collect();
        entries.sort_by(|a, b| a.chunk.id.cmp(&b.chunk.id));
        entries.dedup_by(|a, b| a.chunk.id == b.chunk.id);
        let by_id = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.chunk.id.clone(), i))
            .collect();
        Self {
            model,
            entries,
            by_id,
        }
    }

    /// Load every chunk whose stored vector was computed from its current text
    /// by the snapshot's embedding model.
    pub async fn load(pool: &SqlitePool) -> KnowledgeResult<Self> {
        let model: Option<String> =
            sqlx::query_scalar("SELECT value FROM sync_metadata WHERE key = 'embedding_model'")
                .fetch_optional(pool)
                .await?;

        let Some(model) = model else {
            return Ok(Self::default());
        };

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.kind, c.table_name, c.column_name, c.text, c.hash, v.embedding
            FROM schema_chunks c
            JOIN chunk_vectors v ON v.chunk_id = c.id AND v.hash = c.hash
            WHERE v.model = ?
            ORDER BY c.id
            "#,
        )
        .bind(&model)
        .fetch_all(pool)
        .await?;

        let entries = rows
            .iter()
            .filter_map(|row| {
                let kind: String = row.get("kind");
                let blob: Vec<u8> = row.get("embedding");
                Some((
                    SchemaChunk {
                        id: row.get("id"),
                        kind: ChunkKind::parse(&kind)?,
                        table_name: row.get("table_name"),
                        column_name: row.get("column_name"),
                        text: row.get("text"),
                        hash: row.get("hash"),
                    },
                    blob_to_vec(&blob),
                ))
            })
            .collect();

        Ok(Self::new(Some(model), entries))
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `top_k` chunks by descending similarity, ties broken by chunk id.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<ScoredChunk<'_>> {
        self.search_filtered(query, top_k, |_| true)
    }

    /// Like [`search`](Self::search) but only over chunks of one kind.
    pub fn search_kind(&self, query: &[f32], top_k: usize, kind: ChunkKind) -> Vec<ScoredChunk<'_>> {
        self.search_filtered(query, top_k, |c| c.kind == kind)
    }

    fn search_filtered(
        &self,
        query: &[f32],
        top_k: usize,
        keep: impl Fn(&SchemaChunk) -> bool,
    ) -> Vec<ScoredChunk<'_>> {
        let mut scored: Vec<ScoredChunk<'_>> = self
            .entries
            .iter()
            .filter(|e| keep(&e.chunk))
            .map(|e| ScoredChunk {
                chunk: &e.chunk,
                score: cosine_similarity(query, &e.vector) as f64,
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(top_k);
        scored
    }

    /// Similarity of one specific chunk to the query, if it is indexed.
    pub fn similarity(&self, chunk_id: &str, query: &[f32]) -> Option<f64> {
        self.by_id
            .get(chunk_id)
            .map(|&i| cosine_similarity(query, &self.entries[i].vector) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, kind: ChunkKind) -> SchemaChunk {
        SchemaChunk {
            id: id.to_string(),
            kind,
            table_name: "T".to_string(),
            column_name: None,
            text: id.to_string(),
            hash: String::new(),
        }
    }

    fn index() -> SemanticIndex {
        SemanticIndex::new(
            Some("test".into()),
            vec![
                (chunk("table:B", ChunkKind::Table), vec![1.0, 0.0]),
                (chunk("table:A", ChunkKind::Table), vec![1.0, 0.0]),
                (chunk("column:A.X", ChunkKind::Column), vec![0.6, 0.8]),
                (chunk("table:C", ChunkKind::Table), vec![0.0, 1.0]),
            ],
        )
    }

    #[test]
    fn test_search_orders_by_score_then_id() {
        let index = index();
        let hits = index.search(&[1.0, 0.0], 3);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["table:A", "table:B", "column:A.X"]);
        assert!((hits[2].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_search_kind_filters() {
        let index = index();
        let hits = index.search_kind(&[1.0, 0.0], 10, ChunkKind::Column);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "column:A.X");
    }

    #[test]
    fn test_similarity_lookup() {
        let index = index();
        assert!((index.similarity("table:C", &[0.0, 1.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!(index.similarity("table:Z", &[0.0, 1.0]).is_none());
        assert_eq!(index.len(), 4);
        assert_eq!(index.model(), Some("test"));
    }

    #[test]
    fn test_empty_index() {
        let index = SemanticIndex::default();
        assert!(index.is_empty());
        assert!(index.search(&[1.0], 5).is_empty());
    }
}
