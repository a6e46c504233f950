//! Embedding providers.
//!
//! [`Embedder`] is the only type the rest of the crate talks to. It wraps one
//! [`Provider`] selected by `[embedding] provider`:
//!
//! | `provider` | Backend |
//! |------------|---------|
//! | `disabled` | refuses every call |
//! | `openai` | `POST https://api.openai.com/v1/embeddings`, key from `OPENAI_API_KEY` |
//! | `ollama` | `POST {url}/api/embed` |
//! | `local` | fastembed in process (feature `local-embeddings-fastembed`) |
//! | `hash` | token feature hashing; deterministic, no model, no network |
//!
//! If the primary provider cannot be constructed and `embedding.fallback` is
//! set, the fallback is used instead. Query embeddings are bounded by
//! `embedding.query_timeout_secs`.
//!
//! # Retries
//!
//! HTTP providers retry 429, 5xx and connection failures with exponential
//! backoff (1s, 2s, 4s, ... capped at 32s) up to `max_retries` times. Any
//! other 4xx fails at once.
//!
//! The vector helpers ([`vec_to_blob`], [`blob_to_vec`],
//! [`cosine_similarity`]) are shared with the snapshot and the index.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::{KnowledgeError, KnowledgeResult};

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_HASH_DIMS: usize = 256;
#[cfg(feature = "local-embeddings-fastembed")]
const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

fn provider_err(message: impl Into<String>) -> KnowledgeError {
    KnowledgeError::EmbeddingProvider(message.into())
}

/// A constructed embedding backend.
pub enum Provider {
    Disabled,
    OpenAi {
        model: String,
        dims: usize,
        api_key: String,
        client: reqwest::Client,
    },
    Ollama {
        model: String,
        dims: usize,
        url: String,
        client: reqwest::Client,
    },
    #[cfg(feature = "local-embeddings-fastembed")]
    Local { model: String, dims: usize },
    Hash { dims: usize },
}

impl Provider {
    /// Build the provider named by `config.provider`.
    ///
    /// Fails when required settings are missing: `model`/`dims` for the HTTP
    /// providers, `OPENAI_API_KEY` for OpenAI, a known model for `local`.
    pub fn new(config: &EmbeddingConfig) -> KnowledgeResult<Self> {
        match config.provider.as_str() {
            "disabled" => Ok(Provider::Disabled),
            "openai" => {
                let (model, dims) = model_and_dims(config)?;
                let api_key = std::env::var("OPENAI_API_KEY")
                    .map_err(|_| provider_err("OPENAI_API_KEY environment variable not set"))?;
                Ok(Provider::OpenAi {
                    model,
                    dims,
                    api_key,
                    client: http_client(config)?,
                })
            }
            "ollama" => {
                let (model, dims) = model_and_dims(config)?;
                let url = config
                    .url
                    .as_deref()
                    .unwrap_or(DEFAULT_OLLAMA_URL)
                    .trim_end_matches('/')
                    .to_string();
                Ok(Provider::Ollama {
                    model,
                    dims,
                    url,
                    client: http_client(config)?,
                })
            }
            "hash" => Ok(Provider::Hash {
                dims: config.dims.filter(|d| *d > 0).unwrap_or(DEFAULT_HASH_DIMS),
            }),
            #[cfg(feature = "local-embeddings-fastembed")]
            "local" => {
                let model = config
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
                local_model(&model)?;
                let dims = config.dims.unwrap_or_else(|| local_dims(&model));
                Ok(Provider::Local { model, dims })
            }
            #[cfg(not(feature = "local-embeddings-fastembed"))]
            "local" => Err(provider_err(
                "the local provider requires --features local-embeddings-fastembed",
            )),
            other => Err(provider_err(format!("unknown embedding provider: {}", other))),
        }
    }

    /// Model identifier stored next to every vector.
    pub fn model_name(&self) -> &str {
        match self {
            Provider::Disabled => "disabled",
            Provider::OpenAi { model, .. } | Provider::Ollama { model, .. } => model,
            #[cfg(feature = "local-embeddings-fastembed")]
            Provider::Local { model, .. } => model,
            Provider::Hash { .. } => "hash",
        }
    }

    pub fn dims(&self) -> usize {
        match self {
            Provider::Disabled => 0,
            Provider::OpenAi { dims, .. } | Provider::Ollama { dims, .. } => *dims,
            #[cfg(feature = "local-embeddings-fastembed")]
            Provider::Local { dims, .. } => *dims,
            Provider::Hash { dims } => *dims,
        }
    }

    async fn embed(
        &self,
        config: &EmbeddingConfig,
        texts: &[String],
    ) -> KnowledgeResult<Vec<Vec<f32>>> {
        match self {
            Provider::Disabled => Err(KnowledgeError::EmbeddingsDisabled),
            Provider::OpenAi {
                model,
                dims,
                api_key,
                client,
            } => {
                let mut body = json!({ "model": model, "input": texts });
                if model.starts_with("text-embedding-3") {
                    body["dimensions"] = json!(dims);
                }
                let response = post_with_retry(config, "OpenAI", || {
                    client.post(OPENAI_URL).bearer_auth(api_key).json(&body)
                })
                .await?;
                parse_openai_response(&response)
            }
            Provider::Ollama {
                model, url, client, ..
            } => {
                let endpoint = format!("{}/api/embed", url);
                let body = json!({ "model": model, "input": texts });
                let response =
                    post_with_retry(config, "Ollama", || client.post(&endpoint).json(&body)).await?;
                parse_ollama_response(&response)
            }
            #[cfg(feature = "local-embeddings-fastembed")]
            Provider::Local { model, .. } => embed_local(model, config.batch_size, texts).await,
            Provider::Hash { dims } => Ok(texts.iter().map(|t| hash_embedding(*dims, t)).collect()),
        }
    }
}

fn model_and_dims(config: &EmbeddingConfig) -> KnowledgeResult<(String, usize)> {
    let model = config.model.clone().ok_or_else(|| {
        provider_err(format!("embedding.model required for provider '{}'", config.provider))
    })?;
    let dims = config.dims.filter(|d| *d > 0).ok_or_else(|| {
        provider_err(format!("embedding.dims required for provider '{}'", config.provider))
    })?;
    Ok((model, dims))
}

fn http_client(config: &EmbeddingConfig) -> KnowledgeResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| provider_err(format!("cannot build HTTP client: {}", e)))
}

/// Send the request built by `request` until it succeeds, fails with a
/// non-retryable status, or `max_retries` is exhausted.
async fn post_with_retry<F>(
    config: &EmbeddingConfig,
    service: &str,
    request: F,
) -> KnowledgeResult<Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error = format!("{} request was never sent", service);

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(service, attempt, delay_secs = delay.as_secs(), "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) if response.status().is_success() => {
                return response
                    .json()
                    .await
                    .map_err(|e| provider_err(format!("{} returned invalid JSON: {}", service, e)));
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{} API error {}: {}", service, status, body);
                if status != reqwest::StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                    break;
                }
            }
            Err(e) => {
                last_error = format!("{} request failed: {}", service, e);
            }
        }
    }

    Err(provider_err(last_error))
}

fn json_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|items| items.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

/// `data[].embedding`, reordered by `data[].index`.
fn parse_openai_response(json: &Value) -> KnowledgeResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| provider_err("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let vector = item
            .get("embedding")
            .and_then(json_vector)
            .ok_or_else(|| provider_err("invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map_or(position, |i| i as usize);
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &Value) -> KnowledgeResult<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(Value::as_array)
        .ok_or_else(|| provider_err("invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| json_vector(e).ok_or_else(|| provider_err("invalid Ollama response: embedding is not an array")))
        .collect()
}

#[cfg(feature = "local-embeddings-fastembed")]
fn local_model(name: &str) -> KnowledgeResult<fastembed::EmbeddingModel> {
    use fastembed::EmbeddingModel;
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        other => Err(provider_err(format!(
            "unknown local embedding model '{}'; supported: all-minilm-l6-v2, bge-small-en-v1.5, \
             bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn local_dims(name: &str) -> usize {
    match name {
        "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        _ => 384,
    }
}

/// Runs on the blocking pool; the model is downloaded on first use and
/// cached by fastembed.
#[cfg(feature = "local-embeddings-fastembed")]
async fn embed_local(
    model: &str,
    batch_size: usize,
    texts: &[String],
) -> KnowledgeResult<Vec<Vec<f32>>> {
    let kind = local_model(model)?;
    let texts = texts.to_vec();
    tokio::task::spawn_blocking(move || {
        let mut model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(kind).with_show_download_progress(false),
        )
        .map_err(|e| provider_err(format!("cannot load local embedding model: {}", e)))?;
        model
            .embed(texts, Some(batch_size))
            .map_err(|e| provider_err(format!("local embedding failed: {}", e)))
    })
    .await
    .map_err(|e| provider_err(format!("local embedding task failed: {}", e)))?
}

/// Lower-cased alphanumeric tokens; `_` and punctuation separate tokens, so
/// `ORDER_ITEMS` contributes `order` and `items`.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Signed feature hashing of [`tokens`] into `dims` buckets, L2-normalized.
/// Texts sharing tokens get a positive cosine similarity.
fn hash_embedding(dims: usize, text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for token in tokens(text) {
        let digest = Sha256::digest(token.as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let idx = (u64::from_le_bytes(bucket) % dims as u64) as usize;
        v[idx] += if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

// ============ Embedder ============

/// The configured provider plus the settings that drive it.
///
/// Cheap to clone; ingestion hands clones to its embedding workers.
#[derive(Clone)]
pub struct Embedder {
    config: EmbeddingConfig,
    provider: Arc<Provider>,
}

impl Embedder {
    /// Select a provider for `config`, falling back to `embedding.fallback`
    /// (with a warning) when the primary cannot be constructed.
    pub fn from_config(config: &EmbeddingConfig) -> KnowledgeResult<Self> {
        let primary_err = match Provider::new(config) {
            Ok(provider) => {
                return Ok(Self {
                    config: config.clone(),
                    provider: Arc::new(provider),
                })
            }
            Err(e) => e,
        };
        let Some(fallback) = config.fallback_config() else {
            return Err(primary_err);
        };
        tracing::warn!(
            primary = %config.provider,
            fallback = %fallback.provider,
            error = %primary_err,
            "primary embedding provider unavailable, using fallback"
        );
        let provider = Provider::new(&fallback)?;
        Ok(Self {
            config: fallback,
            provider: Arc::new(provider),
        })
    }

    /// An embedder that refuses every request.
    pub fn disabled() -> Self {
        Self {
            config: EmbeddingConfig::default(),
            provider: Arc::new(Provider::Disabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(*self.provider, Provider::Disabled)
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// Embed a batch; the result has exactly one vector per text.
    pub async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        let vectors = self.provider.embed(&self.config, texts).await?;
        if vectors.len() != texts.len() {
            return Err(provider_err(format!(
                "expected {} vectors, provider returned {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    /// Embed one query, failing with [`KnowledgeError::EmbeddingTimeout`]
    /// once `embedding.query_timeout_secs` elapses.
    pub async fn embed_query(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let secs = self.config.query_timeout_secs;
        let texts = [text.to_string()];
        let vectors = tokio::time::timeout(Duration::from_secs(secs), self.embed_batch(&texts))
            .await
            .map_err(|_| KnowledgeError::EmbeddingTimeout(secs))??;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| provider_err("empty embedding response"))
    }
}

// ============ Vector helpers ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use schema_harness::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB back into a float vector; a trailing partial value is
/// ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "hash".into(),
            dims: Some(64),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_mismatched() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_tokens_split_identifiers() {
        assert_eq!(
            tokens("Column EMAIL_ADDRESS in table CUSTOMERS: VARCHAR2").collect::<Vec<_>>(),
            vec!["column", "email", "address", "in", "table", "customers", "varchar2"]
        );
    }

    #[test]
    fn test_hash_embedding_is_deterministic_and_normalized() {
        let a = hash_embedding(64, "customer email");
        let b = hash_embedding(64, "customer email");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedding_shared_tokens_are_similar() {
        let query = hash_embedding(256, "email");
        let email = hash_embedding(256, "Column EMAIL in table CUSTOMERS");
        let qty = hash_embedding(256, "Column QTY in table ORDER_ITEMS");
        assert!(cosine_similarity(&query, &email) > cosine_similarity(&query, &qty));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        assert!(hash_embedding(8, "").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_parse_openai_response_respects_index() {
        let json = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = json!({ "embeddings": [[0.5, 0.5], [1.0, 0.0]] });
        assert_eq!(
            parse_ollama_response(&json).unwrap(),
            vec![vec![0.5, 0.5], vec![1.0, 0.0]]
        );
        assert!(parse_ollama_response(&json!({ "embeddings": [1.0] })).is_err());
        assert!(parse_ollama_response(&json!({})).is_err());
    }

    #[test]
    fn test_blob_ignores_trailing_bytes() {
        let mut blob = vec_to_blob(&[1.0, 2.0]);
        blob.push(0xff);
        assert_eq!(blob_to_vec(&blob), vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_embedder_hash_query() {
        let embedder = Embedder::from_config(&hash_config()).unwrap();
        assert_eq!(embedder.model_name(), "hash");
        assert_eq!(embedder.dims(), 64);
        let v = embedder.embed_query("orders").await.unwrap();
        assert_eq!(v.len(), 64);
    }

    #[tokio::test]
    async fn test_disabled_embedder_reports_disabled() {
        let embedder = Embedder::from_config(&EmbeddingConfig::default()).unwrap();
        assert!(!embedder.is_enabled());
        let err = embedder.embed_query("orders").await.unwrap_err();
        assert!(matches!(err, KnowledgeError::EmbeddingsDisabled));
    }

    /// Accepts connections on a local port and never answers them.
    async fn silent_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_query_embedding_times_out() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(8),
            url: Some(silent_endpoint().await),
            query_timeout_secs: 1,
            ..EmbeddingConfig::default()
        };
        let embedder = Embedder::from_config(&config).unwrap();
        let err = embedder.embed_query("orders").await.unwrap_err();
        assert!(matches!(err, KnowledgeError::EmbeddingTimeout(1)));
        assert_eq!(err.code(), "timeout");
    }

    #[test]
    fn test_fallback_used_when_primary_cannot_start() {
        // Ollama without model/dims cannot be constructed.
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            fallback: Some("hash".into()),
            ..EmbeddingConfig::default()
        };
        let embedder = Embedder::from_config(&config).unwrap();
        assert_eq!(embedder.model_name(), "hash");
        assert_eq!(embedder.config().provider, "hash");
    }

    #[test]
    fn test_no_fallback_surfaces_provider_error() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            ..EmbeddingConfig::default()
        };
        let err = Embedder::from_config(&config).err().unwrap();
        assert!(matches!(err, KnowledgeError::EmbeddingProvider(_)));
    }

    #[test]
    fn test_ollama_url_is_trimmed() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            url: Some("http://gpu-box:11434/".into()),
            ..EmbeddingConfig::default()
        };
        match Provider::new(&config).unwrap() {
            Provider::Ollama { url, .. } => assert_eq!(url, "http://gpu-box:11434"),
            _ => panic!("expected the Ollama provider"),
        }
    }
}
