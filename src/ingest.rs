//! Ingestion pipeline orchestration.
//!
//! Coordinates one offline run: source → extraction → overrides → merge plan
//! → embedding → single-transaction apply. Any extraction or embedding
//! failure aborts the run before the snapshot is touched.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db;
use crate::embedding::Embedder;
use crate::extract::{open_source, SourceCredentials};
use crate::merge::{IngestionMerger, MergeInput, MergeMode, MergePlan, MergeReport};
use crate::migrate;
use crate::overrides::load_overrides;

/// Options of one `shx ingest` run.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Connection descriptor: `json:<path>`, `sqlite:<path>` or `postgres://...`.
    pub source: String,
    pub user: Option<String>,
    /// Read the source password from the first line of stdin instead of the
    /// environment.
    pub password_stdin: bool,
    pub clear: bool,
    pub skip_embeddings: bool,
    /// Overrides file; takes precedence over `ingest.overrides`.
    pub overrides: Option<PathBuf>,
    pub dry_run: bool,
}

impl IngestOptions {
    pub fn mode(&self) -> MergeMode {
        if self.clear {
            MergeMode::Clear
        } else {
            MergeMode::Incremental
        }
    }
}

/// What a run did. A dry run carries the plan; a real run its report.
pub enum IngestOutcome {
    DryRun(MergePlan),
    Applied(MergeReport),
}

pub async fn run_ingest(config: &Config, opts: &IngestOptions) -> Result<IngestOutcome> {
    let credentials = read_credentials(config, opts)?;
    let source = open_source(&opts.source, credentials)?;
    let described = source.describe();
    tracing::info!(source = %described, mode = opts.mode().as_str(), "extracting schema");

    let extracted = source
        .extract(&config.ingest.tables)
        .await
        .with_context(|| format!("Extraction from {} failed", described))?;

    let overrides = match opts.overrides.as_ref().or(config.ingest.overrides.as_ref()) {
        Some(path) => load_overrides(path)?,
        None => Vec::new(),
    };

    let embedder = if opts.skip_embeddings || opts.dry_run || !config.embedding.is_enabled() {
        None
    } else {
        Some(
            Embedder::from_config(&config.embedding)
                .context("Failed to initialize embedding provider")?,
        )
    };

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let merger = IngestionMerger::new(&pool, embedder.as_ref());
    let input = MergeInput {
        extracted,
        overrides,
    };

    let outcome = if opts.dry_run {
        let plan = merger.plan(input, opts.mode()).await?;
        print_plan(&described, &plan);
        IngestOutcome::DryRun(plan)
    } else {
        let plan = merger.plan(input, opts.mode()).await?;
        let report = merger
            .apply(plan, &described)
            .await
            .context("Ingestion aborted; the snapshot was not modified")?;
        print_report(&described, &report);
        IngestOutcome::Applied(report)
    };

    pool.close().await;
    Ok(outcome)
}

fn read_credentials(config: &Config, opts: &IngestOptions) -> Result<SourceCredentials> {
    let password = if opts.password_stdin {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read password from stdin")?;
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    } else {
        std::env::var(&config.ingest.password_env).ok()
    };
    Ok(SourceCredentials {
        user: opts.user.clone(),
        password,
    })
}

fn print_plan(source: &str, plan: &MergePlan) {
    println!("ingest {} (dry-run, {})", source, plan.mode.as_str());
    println!("  tables: {}", plan.upsert_tables.len());
    println!("  columns: {}", plan.column_count());
    println!("  foreign keys: {}", plan.upsert_edges.len());
    println!("  enum columns: {}", plan.store.enum_sets().count());
    println!("  conflicts: {}", plan.conflicts.len());
    for conflict in &plan.conflicts {
        println!(
            "    {}.{} code {}: '{}' -> '{}'",
            conflict.table_name,
            conflict.column_name,
            conflict.code,
            conflict.extracted_meaning,
            conflict.override_meaning
        );
    }
    if !plan.skipped_overrides.is_empty() {
        println!("  skipped overrides: {}", plan.skipped_overrides.join(", "));
    }
    println!("  chunks to embed: {}", plan.pending.len());
    println!("  chunks unchanged: {}", plan.chunks.len() - plan.pending.len());
}

fn print_report(source: &str, report: &MergeReport) {
    println!("ingest {} ({})", source, report.mode.as_str());
    println!("  tables: {}", report.tables_upserted);
    println!("  columns: {}", report.columns_upserted);
    println!("  foreign keys: {}", report.foreign_keys_upserted);
    println!("  enum columns: {}", report.enum_columns);
    println!("  conflicts: {}", report.conflicts.len());
    for conflict in &report.conflicts {
        println!(
            "    {}.{} code {}: '{}' -> '{}'",
            conflict.table_name,
            conflict.column_name,
            conflict.code,
            conflict.extracted_meaning,
            conflict.override_meaning
        );
    }
    if !report.skipped_overrides.is_empty() {
        println!("  skipped overrides: {}", report.skipped_overrides.join(", "));
    }
    println!("  chunks embedded: {}", report.chunks_embedded);
    println!("  chunks unchanged: {}", report.chunks_unchanged);
    if report.chunks_stale > 0 {
        println!("  chunks stale: {} (embeddings skipped)", report.chunks_stale);
    }
    if report.chunks_removed > 0 {
        println!("  chunks removed: {}", report.chunks_removed);
    }
    println!("  snapshot: {} tables, {} foreign keys", report.total_tables, report.total_foreign_keys);
    println!("ok");
}
