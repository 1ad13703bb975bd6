//! TOML configuration.
//!
//! Every field has a default, so an empty file is a valid configuration
//! (SQLite store, local embeddings, OpenAI judge). [`load_config`] reads the
//! file, applies environment overrides and validates the result.
//!
//! # Environment
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `QDRANT_URL` | overrides `store.url` |
//! | `LLM_MODEL` | overrides `judge.model` |
//! | `store.api_key_env` (default `QDRANT_API_KEY`) | Qdrant API key |
//! | `judge.api_key_env` (default `OPENAI_API_KEY`) | judge API key |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use sentinelle_core::schema::{
    DEFAULT_IMAGERY_COLLECTION, DEFAULT_IMAGE_DIMS, DEFAULT_KNOWLEDGE_COLLECTION,
    DEFAULT_REPUTATION_COLLECTION, DEFAULT_TEXT_DIMS,
};
use sentinelle_core::store::LexicalMode;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub collections: CollectionsConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub extraction: ExtractionConfig,
    pub judge: JudgeConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// `"sqlite"`, `"qdrant"` or `"memory"`.
    pub backend: String,
    /// SQLite database file.
    pub path: PathBuf,
    /// Qdrant base URL.
    pub url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: PathBuf::from("./data/sentinelle.sqlite"),
            url: "http://localhost:6333".to_string(),
            api_key_env: "QDRANT_API_KEY".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectionsConfig {
    pub knowledge: String,
    pub imagery: String,
    pub reputation: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            knowledge: DEFAULT_KNOWLEDGE_COLLECTION.to_string(),
            imagery: DEFAULT_IMAGERY_COLLECTION.to_string(),
            reputation: DEFAULT_REPUTATION_COLLECTION.to_string(),
        }
    }
}

impl CollectionsConfig {
    fn names(&self) -> [(&'static str, &str); 3] {
        [
            ("collections.knowledge", &self.knowledge),
            ("collections.imagery", &self.imagery),
            ("collections.reputation", &self.reputation),
        ]
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub history_scan_limit: usize,
    pub notes_limit: usize,
    pub image_limit: usize,
    pub text_limit: usize,
    pub lexical_mode: LexicalMode,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            history_scan_limit: 100,
            notes_limit: 5,
            image_limit: 5,
            text_limit: 5,
            lexical_mode: LexicalMode::All,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub text: TextEmbeddingConfig,
    pub image: ImageEmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TextEmbeddingConfig {
    /// `"disabled"`, `"local"`, `"openai"` or `"ollama"`.
    pub provider: String,
    pub model: String,
    pub dims: usize,
    /// Base URL for `openai` (default `https://api.openai.com/v1`) and
    /// `ollama` (default `http://localhost:11434`).
    pub url: Option<String>,
    pub api_key_env: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for TextEmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "all-minilm-l6-v2".to_string(),
            dims: DEFAULT_TEXT_DIMS,
            url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl TextEmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImageEmbeddingConfig {
    /// `"disabled"` or `"local"`.
    pub provider: String,
    pub model: String,
    pub dims: usize,
}

impl Default for ImageEmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "clip-vit-b-32".to_string(),
            dims: DEFAULT_IMAGE_DIMS,
        }
    }
}

impl ImageEmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    /// `"disabled"` or `"tesseract"`.
    pub ocr: String,
    /// `"disabled"` or `"openai"`.
    pub asr: String,
    /// ASR language hint (ISO-639-1).
    pub language: String,
    /// Tesseract language pack(s), e.g. `"eng"` or `"eng+fra"`.
    pub ocr_language: String,
    pub tesseract_bin: String,
    pub asr_model: String,
    pub asr_base_url: String,
    pub asr_api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr: "disabled".to_string(),
            asr: "disabled".to_string(),
            language: "en".to_string(),
            ocr_language: "eng".to_string(),
            tesseract_bin: "tesseract".to_string(),
            asr_model: "whisper-1".to_string(),
            asr_base_url: "https://api.openai.com/v1".to_string(),
            asr_api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JudgeConfig {
    /// `"disabled"` or `"openai"` (any OpenAI-compatible endpoint).
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7341".to_string(),
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Read, override from the environment, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Apply `QDRANT_URL` and `LLM_MODEL`. Empty values are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("QDRANT_URL").filter(|v| !v.is_empty()) {
        config.store.url = url;
    }
    if let Some(model) = lookup("LLM_MODEL").filter(|v| !v.is_empty()) {
        config.judge.model = model;
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Store
    match config.store.backend.as_str() {
        "sqlite" | "qdrant" | "memory" => {}
        other => bail!(
            "Unknown store backend: '{}'. Must be sqlite, qdrant, or memory.",
            other
        ),
    }
    if config.store.timeout_secs == 0 {
        bail!("store.timeout_secs must be > 0");
    }

    // Collections
    let names = config.collections.names();
    for (key, name) in names {
        if name.is_empty() {
            bail!("{} must not be empty", key);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            bail!("{} must contain only [A-Za-z0-9_-], got '{}'", key, name);
        }
    }
    let normalized: Vec<String> = names.iter().map(|(_, n)| n.replace('-', "_")).collect();
    if normalized[0] == normalized[1]
        || normalized[0] == normalized[2]
        || normalized[1] == normalized[2]
    {
        bail!("collection names must be distinct");
    }

    // Retrieval
    let r = &config.retrieval;
    for (key, value) in [
        ("retrieval.history_scan_limit", r.history_scan_limit),
        ("retrieval.notes_limit", r.notes_limit),
        ("retrieval.image_limit", r.image_limit),
        ("retrieval.text_limit", r.text_limit),
    ] {
        if value < 1 {
            bail!("{} must be >= 1", key);
        }
    }

    // Embedding. Dimensions declare the collection schema, so they are
    // required even when a provider is disabled.
    match config.embedding.text.provider.as_str() {
        "disabled" | "local" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown text embedding provider: '{}'. Must be disabled, local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.text.dims == 0 {
        bail!("embedding.text.dims must be > 0");
    }
    if config.embedding.text.is_enabled() && config.embedding.text.model.is_empty() {
        bail!(
            "embedding.text.model must be specified when provider is '{}'",
            config.embedding.text.provider
        );
    }
    if config.embedding.text.is_enabled() && config.embedding.text.timeout_secs == 0 {
        bail!("embedding.text.timeout_secs must be > 0");
    }

    match config.embedding.image.provider.as_str() {
        "disabled" | "local" => {}
        other => bail!(
            "Unknown image embedding provider: '{}'. Must be disabled or local.",
            other
        ),
    }
    if config.embedding.image.dims == 0 {
        bail!("embedding.image.dims must be > 0");
    }

    // Extraction
    match config.extraction.ocr.as_str() {
        "disabled" | "tesseract" => {}
        other => bail!("Unknown OCR engine: '{}'. Must be disabled or tesseract.", other),
    }
    match config.extraction.asr.as_str() {
        "disabled" | "openai" => {}
        other => bail!("Unknown ASR engine: '{}'. Must be disabled or openai.", other),
    }
    if config.extraction.timeout_secs == 0 {
        bail!("extraction.timeout_secs must be > 0");
    }

    // Judge
    match config.judge.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!("Unknown judge provider: '{}'. Must be disabled or openai.", other),
    }
    if !(0.0..=2.0).contains(&config.judge.temperature) {
        bail!("judge.temperature must be in [0.0, 2.0]");
    }
    if config.judge.timeout_secs == 0 {
        bail!("judge.timeout_secs must be > 0");
    }

    // Server
    if config.server.max_body_bytes == 0 {
        bail!("server.max_body_bytes must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_valid(content: &str) -> Config {
        let config = parse_config(content).unwrap();
        validate(&config).unwrap();
        config
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = parse_valid("");
        assert_eq!(config.store.backend, "sqlite");
        assert_eq!(config.store.timeout_secs, 10);
        assert_eq!(config.collections.knowledge, "gbv_knowledge_base");
        assert_eq!(config.retrieval.history_scan_limit, 100);
        assert_eq!(config.retrieval.lexical_mode, LexicalMode::All);
        assert_eq!(config.embedding.text.dims, 384);
        assert_eq!(config.embedding.image.dims, 512);
        assert_eq!(config.extraction.asr, "disabled");
        assert_eq!(config.judge.model, "gpt-4o-mini");
        assert!((config.judge.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.server.bind, "127.0.0.1:7341");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse_valid(
            r#"
            [store]
            backend = "qdrant"

            [retrieval]
            lexical_mode = "any"
            text_limit = 8

            [embedding.text]
            provider = "ollama"
            model = "nomic-embed-text"
            dims = 768
            "#,
        );
        assert_eq!(config.store.backend, "qdrant");
        assert_eq!(config.store.url, "http://localhost:6333");
        assert_eq!(config.retrieval.lexical_mode, LexicalMode::Any);
        assert_eq!(config.retrieval.text_limit, 8);
        assert_eq!(config.retrieval.image_limit, 5);
        assert_eq!(config.embedding.text.dims, 768);
        assert_eq!(config.embedding.image.provider, "local");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |name| match name {
            "QDRANT_URL" => Some("http://qdrant:6333".to_string()),
            "LLM_MODEL" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.store.url, "http://qdrant:6333");
        assert_eq!(config.judge.model, "gpt-4o-mini");
    }

    #[test]
    fn test_rejects_unknown_providers() {
        for content in [
            "[store]\nbackend = \"redis\"",
            "[embedding.text]\nprovider = \"cohere\"",
            "[embedding.image]\nprovider = \"openai\"",
            "[extraction]\nocr = \"easyocr\"",
            "[judge]\nprovider = \"anthropic\"",
        ] {
            let config = parse_config(content).unwrap();
            assert!(validate(&config).is_err(), "accepted: {}", content);
        }
    }

    #[test]
    fn test_rejects_bad_bounds() {
        for content in [
            "[retrieval]\nnotes_limit = 0",
            "[store]\ntimeout_secs = 0",
            "[judge]\ntemperature = 2.5",
            "[judge]\ntimeout_secs = 0",
            "[embedding.text]\ndims = 0",
        ] {
            let config = parse_config(content).unwrap();
            assert!(validate(&config).is_err(), "accepted: {}", content);
        }
    }

    #[test]
    fn test_collection_name_rules() {
        let bad_chars = parse_config("[collections]\nknowledge = \"kb space\"").unwrap();
        assert!(validate(&bad_chars).is_err());

        let dup = parse_config("[collections]\nknowledge = \"a-b\"\nimagery = \"a_b\"").unwrap();
        assert!(validate(&dup).is_err());

        let digit_sqlite = parse_config("[collections]\nknowledge = \"1kb\"").unwrap();
        assert!(validate(&digit_sqlite).is_ok());

        let digit_qdrant =
            parse_config("[store]\nbackend = \"qdrant\"\n[collections]\nknowledge = \"1kb\"")
                .unwrap();
        assert!(validate(&digit_qdrant).is_ok());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
