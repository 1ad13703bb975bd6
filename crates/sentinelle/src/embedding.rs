//! Embedding providers for text and images.
//!
//! | Config value | Text | Image |
//! |--------------|------|-------|
//! | `"disabled"` | no embedder (`None`) | no embedder (`None`) |
//! | `"local"` | [`LocalTextEmbedder`] (fastembed, `all-minilm-l6-v2` by default) | [`LocalImageEmbedder`] (fastembed, `clip-vit-b-32`) |
//! | `"openai"` | [`OpenAiEmbedder`] (`POST {url}/embeddings`) | n/a |
//! | `"ollama"` | [`OllamaEmbedder`] (`POST {url}/api/embed`) | n/a |
//!
//! Every returned vector is checked against the configured dimension and
//! L2-normalized.
//!
//! Local models are loaded lazily on first use behind a
//! [`tokio::sync::OnceCell`] and kept for the life of the embedder.
//! Inference runs on the blocking pool.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use sentinelle_core::vector::l2_normalize;

use crate::config::{ImageEmbeddingConfig, TextEmbeddingConfig};
use crate::retry::send_json_with_retry;

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// Embed encoded image bytes (PNG, JPEG, ...).
    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>>;
}

/// Embed a single text.
pub async fn embed_one(embedder: &dyn TextEmbedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Check count and dimension, then L2-normalize.
fn finish(mut vectors: Vec<Vec<f32>>, expected: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        bail!(
            "embedding count mismatch: expected {}, got {}",
            expected,
            vectors.len()
        );
    }
    for v in &mut vectors {
        if v.len() != dims {
            bail!("embedding dimension mismatch: expected {}, got {}", dims, v.len());
        }
        l2_normalize(v);
    }
    Ok(vectors)
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn as_f32_array(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid {} response: embedding is not an array", what))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow::anyhow!("Invalid {} response: non-numeric component", what))
        })
        .collect()
}

// ============ OpenAI ============

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    api_key_env: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &TextEmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key_env: config.api_key_env.clone(),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl TextEmbedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var(&self.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.api_key_env))?;
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/embeddings", self.base_url);
        let json = send_json_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
        })
        .await?;
        finish(parse_openai_response(&json)?, texts.len(), self.dims)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
pub fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, as_f32_array(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Local Ollama instance, `POST /api/embed`.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &TextEmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl TextEmbedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/api/embed", self.url);
        let json = send_json_with_retry("Ollama", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await?;
        finish(parse_ollama_response(&json)?, texts.len(), self.dims)
    }
}

pub fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| as_f32_array(e, "Ollama"))
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => bail!(
            "Unknown local text model: '{}'. Supported: all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, multilingual-e5-small",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_image_model(name: &str) -> Result<fastembed::ImageEmbeddingModel> {
    match name {
        "clip-vit-b-32" => Ok(fastembed::ImageEmbeddingModel::ClipVitB32),
        other => bail!("Unknown local image model: '{}'. Supported: clip-vit-b-32", other),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
type Shared<T> = Arc<std::sync::Mutex<T>>;

/// fastembed text model, loaded once on first use.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalTextEmbedder {
    name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    cell: tokio::sync::OnceCell<Shared<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalTextEmbedder {
    pub fn new(config: &TextEmbeddingConfig) -> Result<Self> {
        Ok(Self {
            name: config.model.clone(),
            model: config_to_fastembed_model(&config.model)?,
            dims: config.dims,
            cell: tokio::sync::OnceCell::new(),
        })
    }

    async fn handle(&self) -> Result<Shared<fastembed::TextEmbedding>> {
        let model = self.model.clone();
        let handle = self
            .cell
            .get_or_try_init(|| async move {
                tracing::info!(model = ?model, "loading local text embedding model");
                tokio::task::spawn_blocking(move || {
                    fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                    .map(|m| Arc::new(std::sync::Mutex::new(m)))
                    .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))
                })
                .await?
            })
            .await?;
        Ok(handle.clone())
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl TextEmbedder for LocalTextEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let handle = self.handle().await?;
        let texts = texts.to_vec();
        let count = texts.len();
        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = handle
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(texts, None)
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await??;
        finish(vectors, count, self.dims)
    }
}

/// fastembed image model, loaded once on first use.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalImageEmbedder {
    name: String,
    model: fastembed::ImageEmbeddingModel,
    dims: usize,
    cell: tokio::sync::OnceCell<Shared<fastembed::ImageEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalImageEmbedder {
    pub fn new(config: &ImageEmbeddingConfig) -> Result<Self> {
        Ok(Self {
            name: config.model.clone(),
            model: config_to_fastembed_image_model(&config.model)?,
            dims: config.dims,
            cell: tokio::sync::OnceCell::new(),
        })
    }

    async fn handle(&self) -> Result<Shared<fastembed::ImageEmbedding>> {
        let model = self.model.clone();
        let handle = self
            .cell
            .get_or_try_init(|| async move {
                tracing::info!(model = ?model, "loading local image embedding model");
                tokio::task::spawn_blocking(move || {
                    fastembed::ImageEmbedding::try_new(
                        fastembed::ImageInitOptions::new(model).with_show_download_progress(false),
                    )
                    .map(|m| Arc::new(std::sync::Mutex::new(m)))
                    .map_err(|e| anyhow::anyhow!("Failed to initialize local image model: {}", e))
                })
                .await?
            })
            .await?;
        Ok(handle.clone())
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl ImageEmbedder for LocalImageEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>> {
        let handle = self.handle().await?;
        let bytes = image.to_vec();
        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = handle
                .lock()
                .map_err(|_| anyhow::anyhow!("local image model lock poisoned"))?;
            model
                .embed_bytes(&[bytes.as_slice()], None)
                .map_err(|e| anyhow::anyhow!("Local image embedding failed: {}", e))
        })
        .await??;
        finish(vectors, 1, self.dims)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty image embedding response"))
    }
}

// ============ Factories ============

/// Build the configured text embedder. `"disabled"` yields `None`.
pub fn create_text_embedder(config: &TextEmbeddingConfig) -> Result<Option<Arc<dyn TextEmbedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAiEmbedder::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaEmbedder::new(config)?))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Some(Arc::new(LocalTextEmbedder::new(config)?))),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown text embedding provider: {}", other),
    }
}

/// Build the configured image embedder. `"disabled"` yields `None`.
pub fn create_image_embedder(
    config: &ImageEmbeddingConfig,
) -> Result<Option<Arc<dyn ImageEmbedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Some(Arc::new(LocalImageEmbedder::new(config)?))),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local image embeddings require --features local-embeddings-fastembed"),
        other => bail!("Unknown image embedding provider: {}", other),
    }
}
