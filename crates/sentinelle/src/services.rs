//! Wiring from [`Config`] to a ready [`Pipeline`].

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use sentinelle_core::archivist::{Archivist, RetrievalParams};
use sentinelle_core::pipeline::Pipeline;
use sentinelle_core::schema::Schema;
use sentinelle_core::store::memory::InMemoryStore;
use sentinelle_core::store::VectorStore;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_image_embedder, create_text_embedder, ImageEmbedder, TextEmbedder};
use crate::extract::ModalityExtractor;
use crate::judge::LlmJudge;
use crate::qdrant_store::QdrantStore;
use crate::sqlite_store::SqliteStore;

/// Everything a command needs, built once per process.
pub struct Services {
    pub archivist: Archivist,
    pub pipeline: Pipeline,
    pub text_embedder: Option<Arc<dyn TextEmbedder>>,
    pub image_embedder: Option<Arc<dyn ImageEmbedder>>,
}

pub fn schema_from(config: &Config) -> Schema {
    Schema::with_names(
        &config.collections.knowledge,
        &config.collections.imagery,
        &config.collections.reputation,
        config.embedding.text.dims,
        config.embedding.image.dims,
    )
}

pub fn retrieval_params(config: &Config) -> RetrievalParams {
    RetrievalParams {
        history_scan_limit: config.retrieval.history_scan_limit,
        notes_limit: config.retrieval.notes_limit,
        image_limit: config.retrieval.image_limit,
        text_limit: config.retrieval.text_limit,
        lexical_mode: config.retrieval.lexical_mode,
    }
}

/// Open the configured vector store backend.
pub async fn open_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    let timeout = Duration::from_secs(config.store.timeout_secs);
    let store: Arc<dyn VectorStore> = match config.store.backend.as_str() {
        "memory" => Arc::new(InMemoryStore::new()),
        "sqlite" => {
            let pool = db::connect(&config.store.path, timeout).await?;
            Arc::new(
                SqliteStore::open(pool, timeout)
                    .await
                    .context("Failed to prepare SQLite store")?,
            )
        }
        "qdrant" => {
            let api_key = std::env::var(&config.store.api_key_env)
                .ok()
                .filter(|k| !k.is_empty());
            Arc::new(QdrantStore::new(&config.store.url, api_key.as_deref(), timeout)?)
        }
        other => anyhow::bail!("Unknown store backend: {}", other),
    };
    tracing::debug!(backend = %config.store.backend, "vector store opened");
    Ok(store)
}

pub async fn build(config: &Config) -> Result<Services> {
    let store = open_store(config).await?;
    let archivist = Archivist::new(store, schema_from(config), retrieval_params(config));

    let text_embedder = create_text_embedder(&config.embedding.text)?;
    let image_embedder = create_image_embedder(&config.embedding.image)?;
    if let Some(e) = &text_embedder {
        tracing::info!(model = e.model_name(), dims = e.dims(), "text embedder ready");
    }
    if let Some(e) = &image_embedder {
        tracing::info!(model = e.model_name(), dims = e.dims(), "image embedder ready");
    }
    let extractor = ModalityExtractor::from_config(
        &config.extraction,
        text_embedder.clone(),
        image_embedder.clone(),
    )?;
    let judge = LlmJudge::new(config.judge.clone());
    if !judge.is_configured() {
        tracing::warn!(
            api_key_env = %config.judge.api_key_env,
            "decision backend not configured; verdicts will be degraded"
        );
    }

    let pipeline = Pipeline::new(archivist.clone(), Arc::new(extractor), Arc::new(judge));
    Ok(Services {
        archivist,
        pipeline,
        text_embedder,
        image_embedder,
    })
}
