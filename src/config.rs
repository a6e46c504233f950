use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_column_limit")]
    pub column_limit: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default = "default_related_hops")]
    pub related_hops: usize,
    #[serde(default = "default_related_limit")]
    pub related_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            column_limit: default_column_limit(),
            candidate_k: default_candidate_k(),
            max_hops: default_max_hops(),
            related_hops: default_related_hops(),
            related_limit: default_related_limit(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_max_limit() -> usize {
    50
}
fn default_column_limit() -> usize {
    20
}
fn default_candidate_k() -> usize {
    80
}
fn default_max_hops() -> usize {
    4
}
fn default_related_hops() -> usize {
    2
}
fn default_related_limit() -> usize {
    5
}

impl RetrievalConfig {
    /// Resolve a caller-supplied limit against the default and the hard cap.
    pub fn clamp_limit(&self, requested: Option<usize>, default: usize) -> usize {
        requested.unwrap_or(default).clamp(1, self.max_limit)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Provider to use when the primary one cannot be constructed (`local`).
    #[serde(default)]
    pub fallback: Option<String>,
    /// Embedding batches in flight during ingestion.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            fallback: None,
            concurrency: default_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_query_timeout_secs() -> u64 {
    10
}
fn default_concurrency() -> usize {
    4
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// A copy of this config pointed at the fallback provider, if any.
    pub fn fallback_config(&self) -> Option<EmbeddingConfig> {
        let provider = self.fallback.clone()?;
        Some(EmbeddingConfig {
            provider,
            model: None,
            dims: None,
            fallback: None,
            ..self.clone()
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Manual-override file (YAML or TOML).
    #[serde(default)]
    pub overrides: Option<PathBuf>,
    /// Restrict extraction to these tables; such runs are partial.
    #[serde(default)]
    pub tables: Vec<String>,
    /// Environment variable holding the source database password.
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            overrides: None,
            tables: Vec::new(),
            password_env: default_password_env(),
        }
    }
}

fn default_password_env() -> String {
    "SHX_SOURCE_PASSWORD".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate retrieval
    let r = &config.retrieval;
    if r.default_limit < 1 || r.column_limit < 1 {
        anyhow::bail!("retrieval.default_limit and retrieval.column_limit must be >= 1");
    }
    if r.max_limit < r.default_limit {
        anyhow::bail!("retrieval.max_limit must be >= retrieval.default_limit");
    }
    if r.max_hops < 1 {
        anyhow::bail!("retrieval.max_hops must be >= 1");
    }

    // Validate embedding
    let e = &config.embedding;
    if e.concurrency < 1 {
        anyhow::bail!("embedding.concurrency must be >= 1");
    }
    if e.batch_size < 1 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }
    match e.provider.as_str() {
        "openai" | "ollama" => {
            if e.dims.is_none() || e.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
            }
            if e.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
        }
        "disabled" | "local" | "hash" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, local, or hash.",
            other
        ),
    }
    if let Some(fallback) = &e.fallback {
        if !matches!(fallback.as_str(), "local" | "hash") {
            anyhow::bail!("embedding.fallback must be 'local' or 'hash', got '{}'", fallback);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_takes_defaults() {
        let config = parse("[db]\npath = \"./data/shx.sqlite\"\n").unwrap();
        assert_eq!(config.retrieval.default_limit, 10);
        assert_eq!(config.retrieval.max_limit, 50);
        assert_eq!(config.retrieval.max_hops, 4);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert_eq!(config.ingest.password_env, "SHX_SOURCE_PASSWORD");
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"bogus\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_clamp_limit() {
        let r = RetrievalConfig::default();
        assert_eq!(r.clamp_limit(None, 10), 10);
        assert_eq!(r.clamp_limit(Some(500), 10), 50);
        assert_eq!(r.clamp_limit(Some(0), 10), 1);
    }

    #[test]
    fn test_fallback_config_drops_primary_model() {
        let config = parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 512\nfallback = \"local\"\n",
        )
        .unwrap();
        let fallback = config.embedding.fallback_config().unwrap();
        assert_eq!(fallback.provider, "local");
        assert!(fallback.model.is_none());
        assert!(fallback.fallback.is_none());
    }
}
