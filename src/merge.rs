//! Ingestion merger: reconciles extracted facts and manual overrides into the
//! snapshot.
//!
//! A merge runs in three phases so that nothing is written unless every step
//! succeeded:
//!
//! 1. **Plan** ([`plan_merge`]): pure and in memory. Combines the current
//!    snapshot with the new extraction according to [`MergeMode`],
//!    reconciles enum values, regenerates chunk texts and decides which
//!    chunks need embedding (text hash or model changed).
//! 2. **Embed** ([`embed_chunks`]): batches of pending chunks are sent to the
//!    provider with at most `embedding.concurrency` batches in flight. Any
//!    failure aborts the merge.
//! 3. **Apply** ([`IngestionMerger::apply`]): one SQLite transaction; all or
//!    nothing.
//!
//! # Modes
//!
//! - `Incremental` upserts extracted tables by name and edges by
//!   `(source, source columns, target, target columns)`. Tables and edges
//!   absent from the extraction are kept: a run restricted to a few tables
//!   must not forget the rest of the schema.
//! - `Clear` drops every stored fact first and loads the extraction alone.
//!
//! # Enum precedence
//!
//! Per `(table, column)`, override codes replace extracted codes with the
//! same value and new override codes are added; extracted codes without an
//! override survive. The merged order is the override list order followed by
//! the remaining extracted codes in extracted order. When both sides give a
//! code different real meanings the override wins and a [`MergeConflict`] is
//! reported. A CHECK constraint only knows codes (its "meaning" is the code
//! itself), so it never conflicts.
//!
//! Running the same merge twice leaves the structured store unchanged: every
//! write is keyed by identifier and every list is written in a canonical
//! order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunk::build_chunks;
use crate::embedding::{vec_to_blob, Embedder};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::extract::ExtractedSchema;
use crate::models::{EnumSet, EnumSource, EnumValue, ForeignKeyEdge, SchemaChunk, Table};
use crate::store::{
    read_edges, read_enum_sets, read_tables, MetadataStore, EXTRACTED_ENUMS_QUERY,
    MANUAL_OVERRIDES_QUERY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    Incremental,
    Clear,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Incremental => "incremental",
            MergeMode::Clear => "clear",
        }
    }
}

/// An override and an extracted value gave one code different meanings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeConflict {
    pub table_name: String,
    pub column_name: String,
    pub code: String,
    pub extracted_meaning: String,
    pub override_meaning: String,
}

/// New facts for one merge.
#[derive(Debug, Clone, Default)]
pub struct MergeInput {
    pub extracted: ExtractedSchema,
    pub overrides: Vec<EnumSet>,
}

/// What the snapshot holds before the merge.
#[derive(Debug, Clone, Default)]
pub struct ExistingState {
    pub tables: Vec<Table>,
    pub edges: Vec<ForeignKeyEdge>,
    pub extracted_enums: Vec<EnumSet>,
    pub overrides: Vec<EnumSet>,
    pub chunk_ids: BTreeSet<String>,
    /// chunk id -> (text hash, model) of its stored vector.
    pub vectors: BTreeMap<String, (String, String)>,
}

impl ExistingState {
    pub async fn load(pool: &SqlitePool) -> KnowledgeResult<Self> {
        let chunk_ids: Vec<String> = sqlx::query_scalar("SELECT id FROM schema_chunks ORDER BY id")
            .fetch_all(pool)
            .await?;
        let vector_rows = sqlx::query("SELECT chunk_id, hash, model FROM chunk_vectors")
            .fetch_all(pool)
            .await?;
        Ok(Self {
            tables: read_tables(pool).await?,
            edges: read_edges(pool).await?,
            extracted_enums: read_enum_sets(pool, EXTRACTED_ENUMS_QUERY).await?,
            overrides: read_enum_sets(pool, MANUAL_OVERRIDES_QUERY).await?,
            chunk_ids: chunk_ids.into_iter().collect(),
            vectors: vector_rows
                .iter()
                .map(|row| (row.get("chunk_id"), (row.get("hash"), row.get("model"))))
                .collect(),
        })
    }
}

/// Everything a merge will write, computed before any write happens.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub mode: MergeMode,
    /// Tables from this extraction; their columns and indexes are replaced.
    pub upsert_tables: Vec<Table>,
    pub upsert_edges: Vec<ForeignKeyEdge>,
    /// Extracted enum sets of the upserted tables.
    pub extracted_enums: Vec<EnumSet>,
    /// Override sets applied in this run (known table and column only).
    pub overrides: Vec<EnumSet>,
    /// Final structured state, merged enums included.
    pub store: MetadataStore,
    /// Every chunk of the final state, sorted by id.
    pub chunks: Vec<SchemaChunk>,
    /// Chunks without a current vector for the target model.
    pub pending: Vec<SchemaChunk>,
    /// Stored chunk ids that no longer describe anything.
    pub removed_chunks: Vec<String>,
    pub conflicts: Vec<MergeConflict>,
    /// `TABLE.COLUMN` of overrides that match nothing in the snapshot.
    pub skipped_overrides: Vec<String>,
}

impl MergePlan {
    pub fn column_count(&self) -> usize {
        self.upsert_tables.iter().map(|t| t.columns.len()).sum()
    }
}

/// Outcome of an applied merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub mode: MergeMode,
    pub tables_upserted: usize,
    pub columns_upserted: usize,
    pub foreign_keys_upserted: usize,
    pub total_tables: usize,
    pub total_foreign_keys: usize,
    pub enum_columns: usize,
    pub conflicts: Vec<MergeConflict>,
    pub skipped_overrides: Vec<String>,
    pub chunks_total: usize,
    pub chunks_embedded: usize,
    pub chunks_unchanged: usize,
    /// Chunks whose vector is missing or outdated because embedding was skipped.
    pub chunks_stale: usize,
    pub chunks_removed: usize,
}

/// Reconcile one column's extracted and override values.
pub fn reconcile_enum(
    extracted: Option<&EnumSet>,
    manual: Option<&EnumSet>,
) -> (Option<EnumSet>, Vec<MergeConflict>) {
    match (extracted, manual) {
        (None, None) => (None, Vec::new()),
        (Some(e), None) => (
            Some(EnumSet {
                source: EnumSource::CheckConstraint,
                ..e.clone()
            }),
            Vec::new(),
        ),
        (None, Some(m)) => (
            Some(EnumSet {
                source: EnumSource::Manual,
                ..m.clone()
            }),
            Vec::new(),
        ),
        (Some(e), Some(m)) => {
            let mut conflicts = Vec::new();
            let override_codes: BTreeSet<&str> = m.values.iter().map(|v| v.code.as_str()).collect();
            for value in &m.values {
                let Some(extracted) = e.values.iter().find(|x| x.code == value.code) else {
                    continue;
                };
                let has_meaning = extracted.meaning != extracted.code;
                if has_meaning && extracted.meaning != value.meaning {
                    conflicts.push(MergeConflict {
                        table_name: m.table_name.clone(),
                        column_name: m.column_name.clone(),
                        code: value.code.clone(),
                        extracted_meaning: extracted.meaning.clone(),
                        override_meaning: value.meaning.clone(),
                    });
                }
            }

            let mut values: Vec<EnumValue> = m.values.clone();
            values.extend(
                e.values
                    .iter()
                    .filter(|v| !override_codes.contains(v.code.as_str()))
                    .cloned(),
            );
            (
                Some(EnumSet {
                    table_name: m.table_name.clone(),
                    column_name: m.column_name.clone(),
                    source: EnumSource::Merged,
                    values,
                }),
                conflicts,
            )
        }
    }
}

/// Compute the full merge without touching storage.
///
/// `model` is the embedding model vectors must come from; `None` means no
/// embedding will happen in this run, and only text changes make a chunk
/// pending.
pub fn plan_merge(
    existing: ExistingState,
    input: MergeInput,
    mode: MergeMode,
    model: Option<&str>,
) -> MergePlan {
    let extracted_enums = input.extracted.check_enums();
    let upsert_edges = {
        let mut edges = input.extracted.edges();
        edges.sort_by_key(|e| e.key());
        edges.dedup_by(|a, b| a.key() == b.key());
        edges
    };
    let mut upsert_tables = input.extracted.tables;
    for table in &mut upsert_tables {
        table.normalize();
    }
    upsert_tables.sort_by(|a, b| a.name.cmp(&b.name));
    upsert_tables.dedup_by(|a, b| a.name == b.name);
    let touched: BTreeSet<String> = upsert_tables.iter().map(|t| t.name.clone()).collect();

    let (base_tables, base_edges, base_extracted, base_overrides) = match mode {
        MergeMode::Clear => (Vec::new(), Vec::new(), Vec::new(), Vec::new()),
        MergeMode::Incremental => (
            existing.tables,
            existing.edges,
            existing.extracted_enums,
            existing.overrides,
        ),
    };

    let mut tables: BTreeMap<String, Table> =
        base_tables.into_iter().map(|t| (t.name.clone(), t)).collect();
    for table in &upsert_tables {
        tables.insert(table.name.clone(), table.clone());
    }

    let mut edges: BTreeMap<_, ForeignKeyEdge> =
        base_edges.into_iter().map(|e| (e.key(), e)).collect();
    for edge in &upsert_edges {
        edges.insert(edge.key(), edge.clone());
    }

    let mut final_extracted: BTreeMap<(String, String), EnumSet> = base_extracted
        .into_iter()
        .filter(|e| !touched.contains(&e.table_name))
        .map(|e| ((e.table_name.clone(), e.column_name.clone()), e))
        .collect();
    for set in &extracted_enums {
        final_extracted.insert((set.table_name.clone(), set.column_name.clone()), set.clone());
    }

    let column_known = |table: &str, column: &str| {
        tables
            .get(table)
            .is_some_and(|t| t.column(column).is_some())
    };

    let mut overrides = Vec::new();
    let mut skipped_overrides = Vec::new();
    for set in input.overrides {
        if column_known(&set.table_name, &set.column_name) {
            overrides.push(set);
        } else {
            tracing::warn!(
                table = %set.table_name,
                column = %set.column_name,
                "override matches no known column, skipping"
            );
            skipped_overrides.push(format!("{}.{}", set.table_name, set.column_name));
        }
    }
    let mut final_overrides: BTreeMap<(String, String), EnumSet> = base_overrides
        .into_iter()
        .map(|e| ((e.table_name.clone(), e.column_name.clone()), e))
        .collect();
    for set in &overrides {
        final_overrides.insert((set.table_name.clone(), set.column_name.clone()), set.clone());
    }

    let keys: BTreeSet<&(String, String)> =
        final_extracted.keys().chain(final_overrides.keys()).collect();
    let mut merged = Vec::new();
    let mut conflicts = Vec::new();
    for key in keys {
        if !column_known(&key.0, &key.1) {
            continue;
        }
        let (set, mut found) = reconcile_enum(final_extracted.get(key), final_overrides.get(key));
        for conflict in &found {
            tracing::warn!(
                table = %conflict.table_name,
                column = %conflict.column_name,
                code = %conflict.code,
                extracted = %conflict.extracted_meaning,
                manual = %conflict.override_meaning,
                "enum meaning conflict, override wins"
            );
        }
        conflicts.append(&mut found);
        merged.extend(set);
    }

    let store = MetadataStore::new(
        tables.into_values().collect(),
        edges.into_values().collect(),
        merged,
    );

    let chunks = build_chunks(store.tables(), |t, c| store.get_enum_set(t, c));
    let live: BTreeSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
    let removed_chunks: Vec<String> = match mode {
        MergeMode::Clear => Vec::new(),
        MergeMode::Incremental => existing
            .chunk_ids
            .iter()
            .chain(existing.vectors.keys())
            .filter(|id| !live.contains(id.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    };

    let pending = chunks
        .iter()
        .filter(|chunk| {
            let current = mode == MergeMode::Incremental
                && existing
                    .vectors
                    .get(&chunk.id)
                    .is_some_and(|(hash, m)| {
                        *hash == chunk.hash && model.map_or(true, |want| want == m)
                    });
            !current
        })
        .cloned()
        .collect();

    MergePlan {
        mode,
        upsert_tables,
        upsert_edges,
        extracted_enums,
        overrides,
        store,
        chunks,
        pending,
        removed_chunks,
        conflicts,
        skipped_overrides,
    }
}

/// Embed `chunks` in batches with at most `concurrency` batches in flight.
///
/// Returns `(chunk id, vector)` in chunk order. The first failing batch
/// cancels the rest and fails the whole call.
pub async fn embed_chunks(
    embedder: &Embedder,
    chunks: &[SchemaChunk],
    concurrency: usize,
) -> KnowledgeResult<Vec<(String, Vec<f32>)>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut workers: JoinSet<KnowledgeResult<(usize, Vec<String>, Vec<Vec<f32>>)>> = JoinSet::new();
    let batch_size = embedder.config().batch_size.max(1);

    for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| KnowledgeError::EmbeddingProvider(e.to_string()))?;
        let embedder = embedder.clone();
        let ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        workers.spawn(async move {
            let _permit = permit;
            tracing::debug!(batch = batch_no, size = texts.len(), "embedding batch");
            let vectors = embedder.embed_batch(&texts).await?;
            Ok((batch_no, ids, vectors))
        });
    }

    let mut batches = Vec::new();
    while let Some(joined) = workers.join_next().await {
        let outcome = joined
            .map_err(|e| KnowledgeError::EmbeddingProvider(format!("embedding worker failed: {}", e)))
            .and_then(|r| r);
        match outcome {
            Ok(batch) => batches.push(batch),
            Err(e) => {
                workers.abort_all();
                return Err(e);
            }
        }
    }

    batches.sort_by_key(|(n, _, _)| *n);
    let embedded: Vec<(String, Vec<f32>)> = batches
        .into_iter()
        .flat_map(|(_, ids, vectors)| ids.into_iter().zip(vectors))
        .collect();

    if let Some((id, _)) = embedded.iter().find(|(_, v)| v.is_empty()) {
        return Err(KnowledgeError::EmbeddingProvider(format!(
            "empty embedding returned for {}",
            id
        )));
    }
    Ok(embedded)
}

/// Applies merges to one snapshot. Callers must be the only writer.
pub struct IngestionMerger<'a> {
    pool: &'a SqlitePool,
    embedder: Option<&'a Embedder>,
}

impl<'a> IngestionMerger<'a> {
    /// `embedder` is `None` when this run must not embed.
    pub fn new(pool: &'a SqlitePool, embedder: Option<&'a Embedder>) -> Self {
        Self {
            pool,
            embedder: embedder.filter(|e| e.is_enabled()),
        }
    }

    pub async fn plan(&self, input: MergeInput, mode: MergeMode) -> KnowledgeResult<MergePlan> {
        let existing = ExistingState::load(self.pool).await?;
        Ok(plan_merge(
            existing,
            input,
            mode,
            self.embedder.map(|e| e.model_name()),
        ))
    }

    /// Plan, embed and apply in one go.
    pub async fn merge(
        &self,
        input: MergeInput,
        mode: MergeMode,
        source: &str,
    ) -> KnowledgeResult<MergeReport> {
        let plan = self.plan(input, mode).await?;
        self.apply(plan, source).await
    }

    /// Embed the plan's pending chunks, then write everything in one
    /// transaction.
    pub async fn apply(&self, plan: MergePlan, source: &str) -> KnowledgeResult<MergeReport> {
        let (vectors, model) = match self.embedder {
            Some(embedder) if !plan.pending.is_empty() => {
                let concurrency = embedder.config().concurrency;
                let vectors = embed_chunks(embedder, &plan.pending, concurrency).await?;
                (vectors, Some(embedder.model_name().to_string()))
            }
            Some(embedder) => (Vec::new(), Some(embedder.model_name().to_string())),
            None => (Vec::new(), None),
        };

        self.write(&plan, &vectors, model.as_deref(), source).await?;

        let embedded = vectors.len();
        let report = MergeReport {
            mode: plan.mode,
            tables_upserted: plan.upsert_tables.len(),
            columns_upserted: plan.column_count(),
            foreign_keys_upserted: plan.upsert_edges.len(),
            total_tables: plan.store.table_count(),
            total_foreign_keys: plan.store.edges().len(),
            enum_columns: plan.store.enum_sets().count(),
            conflicts: plan.conflicts,
            skipped_overrides: plan.skipped_overrides,
            chunks_total: plan.chunks.len(),
            chunks_embedded: embedded,
            chunks_unchanged: plan.chunks.len() - plan.pending.len(),
            chunks_stale: plan.pending.len() - embedded,
            chunks_removed: plan.removed_chunks.len(),
        };
        tracing::info!(
            mode = plan.mode.as_str(),
            tables = report.total_tables,
            embedded = report.chunks_embedded,
            conflicts = report.conflicts.len(),
            "merge committed"
        );
        Ok(report)
    }

    async fn write(
        &self,
        plan: &MergePlan,
        vectors: &[(String, Vec<f32>)],
        model: Option<&str>,
        source: &str,
    ) -> KnowledgeResult<()> {
        let mut tx = self.pool.begin().await?;

        if plan.mode == MergeMode::Clear {
            for table in [
                "chunk_vectors",
                "schema_chunks",
                "enum_values",
                "extracted_enums",
                "manual_overrides",
                "foreign_keys",
                "schema_indexes",
                "schema_columns",
                "schema_tables",
            ] {
                sqlx::query(&format!("DELETE FROM {}", table))
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for table in &plan.upsert_tables {
            let pk_json = serde_json::to_string(&table.primary_key).unwrap_or_else(|_| "[]".into());
            sqlx::query(
                r#"
                INSERT INTO schema_tables (name, owner, comment, primary_key_json, row_count, column_count)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    owner = excluded.owner,
                    comment = excluded.comment,
                    primary_key_json = excluded.primary_key_json,
                    row_count = excluded.row_count,
                    column_count = excluded.column_count
                "#,
            )
            .bind(&table.name)
            .bind(&table.owner)
            .bind(&table.comment)
            .bind(&pk_json)
            .bind(table.row_count)
            .bind(table.columns.len() as i64)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM schema_columns WHERE table_name = ?")
                .bind(&table.name)
                .execute(&mut *tx)
                .await?;
            for (position, column) in table.columns.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO schema_columns (table_name, name, position, data_type, nullable, comment, default_value)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&table.name)
                .bind(&column.name)
                .bind(position as i64)
                .bind(&column.data_type)
                .bind(column.nullable as i64)
                .bind(&column.comment)
                .bind(&column.default_value)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query("DELETE FROM schema_indexes WHERE table_name = ?")
                .bind(&table.name)
                .execute(&mut *tx)
                .await?;
            for index in &table.indexes {
                let columns_json =
                    serde_json::to_string(&index.columns).unwrap_or_else(|_| "[]".into());
                sqlx::query(
                    "INSERT OR REPLACE INTO schema_indexes (table_name, name, columns_json, is_unique) VALUES (?, ?, ?, ?)",
                )
                .bind(&table.name)
                .bind(&index.name)
                .bind(&columns_json)
                .bind(index.unique as i64)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query("DELETE FROM extracted_enums WHERE table_name = ?")
                .bind(&table.name)
                .execute(&mut *tx)
                .await?;
        }

        for edge in &plan.upsert_edges {
            sqlx::query(
                r#"
                INSERT INTO foreign_keys (source_table, source_columns, target_table, target_columns, constraint_name, join_condition)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_table, source_columns, target_table, target_columns) DO UPDATE SET
                    constraint_name = excluded.constraint_name,
                    join_condition = excluded.join_condition
                "#,
            )
            .bind(&edge.source_table)
            .bind(edge.source_columns.join(","))
            .bind(&edge.target_table)
            .bind(edge.target_columns.join(","))
            .bind(&edge.constraint_name)
            .bind(&edge.join_condition)
            .execute(&mut *tx)
            .await?;
        }

        for set in &plan.extracted_enums {
            insert_enum_rows(&mut tx, "extracted_enums", set, None).await?;
        }

        for set in &plan.overrides {
            sqlx::query("DELETE FROM manual_overrides WHERE table_name = ? AND column_name = ?")
                .bind(&set.table_name)
                .bind(&set.column_name)
                .execute(&mut *tx)
                .await?;
            insert_enum_rows(&mut tx, "manual_overrides", set, None).await?;
        }

        // Merged enums are derived data: rewrite them whole.
        sqlx::query("DELETE FROM enum_values").execute(&mut *tx).await?;
        for set in plan.store.enum_sets() {
            insert_enum_rows(&mut tx, "enum_values", set, Some(set.source)).await?;
        }

        for id in &plan.removed_chunks {
            sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM schema_chunks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        for chunk in &plan.chunks {
            sqlx::query(
                r#"
                INSERT INTO schema_chunks (id, kind, table_name, column_name, text, hash)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    kind = excluded.kind,
                    table_name = excluded.table_name,
                    column_name = excluded.column_name,
                    text = excluded.text,
                    hash = excluded.hash
                "#,
            )
            .bind(&chunk.id)
            .bind(chunk.kind.as_str())
            .bind(&chunk.table_name)
            .bind(&chunk.column_name)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(model) = model {
            let hashes: BTreeMap<&str, &str> = plan
                .pending
                .iter()
                .map(|c| (c.id.as_str(), c.hash.as_str()))
                .collect();
            for (chunk_id, vector) in vectors {
                let hash = hashes.get(chunk_id.as_str()).copied().unwrap_or_default();
                sqlx::query(
                    r#"
                    INSERT INTO chunk_vectors (chunk_id, model, dims, hash, embedding)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(chunk_id) DO UPDATE SET
                        model = excluded.model,
                        dims = excluded.dims,
                        hash = excluded.hash,
                        embedding = excluded.embedding
                    "#,
                )
                .bind(chunk_id)
                .bind(model)
                .bind(vector.len() as i64)
                .bind(hash)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut metadata = vec![
            ("last_sync_time", now.to_string()),
            ("last_sync_mode", plan.mode.as_str().to_string()),
            ("source", source.to_string()),
        ];
        if let Some(model) = model {
            metadata.push(("embedding_model", model.to_string()));
        }
        for (key, value) in metadata {
            sqlx::query(
                r#"
                INSERT INTO sync_metadata (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn insert_enum_rows(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    set: &EnumSet,
    source: Option<EnumSource>,
) -> KnowledgeResult<()> {
    for (position, value) in set.values.iter().enumerate() {
        let sql = match source {
            Some(_) => format!(
                "INSERT INTO {} (table_name, column_name, position, code, meaning, source) VALUES (?, ?, ?, ?, ?, ?)",
                table
            ),
            None => format!(
                "INSERT INTO {} (table_name, column_name, position, code, meaning) VALUES (?, ?, ?, ?, ?)",
                table
            ),
        };
        let mut query = sqlx::query(&sql)
            .bind(&set.table_name)
            .bind(&set.column_name)
            .bind(position as i64)
            .bind(&value.code)
            .bind(&value.meaning);
        if let Some(source) = source {
            query = query.bind(source.as_str());
        }
        query.execute(&mut **tx).await?;
    }
    Ok(())
}
