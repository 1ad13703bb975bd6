//! Multimodal signal extraction.
//!
//! [`ModalityExtractor`] implements [`SignalExtractor`] over four optional
//! collaborators: an OCR engine, a transcriber, a text embedder and an image
//! embedder. A collaborator that is not configured is `None` and its
//! modality is simply absent. A configured collaborator that fails is
//! logged as `ExtractionDegraded` and its modality falls back to `""` or
//! `None`.
//!
//! OCR and ASR run concurrently, then the two embeddings run concurrently
//! over the combined text and the image bytes.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use sentinelle_core::models::{CombinedSignal, ModerationRequest, RawModalities, SignalVectors};
use sentinelle_core::signal::{combine_texts, log_degraded, SignalExtractor};

use crate::config::ExtractionConfig;
use crate::embedding::{embed_one, ImageEmbedder, TextEmbedder};
use crate::retry::send_json_with_retry;

/// Image bytes in, recognized text out.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String>;
}

/// Audio bytes in, transcript out.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

// ============ Tesseract ============

/// Runs `tesseract stdin stdout -l <lang>` per image.
pub struct TesseractOcr {
    bin: String,
    language: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            bin: config.tesseract_bin.clone(),
            language: config.ocr_language.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn run(&self, image: &[u8]) -> Result<String> {
        let mut child = tokio::process::Command::new(&self.bin)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.bin))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image: &[u8]) -> Result<String> {
        tokio::time::timeout(self.timeout, self.run(image))
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", self.bin, self.timeout))?
    }
}

// ============ OpenAI transcription ============

const ASR_MAX_RETRIES: u32 = 2;

/// Whisper-compatible `POST {base}/audio/transcriptions`.
pub struct OpenAiTranscriber {
    url: String,
    model: String,
    language: String,
    api_key_env: String,
    client: reqwest::Client,
}

impl OpenAiTranscriber {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            url: format!(
                "{}/audio/transcriptions",
                config.asr_base_url.trim_end_matches('/')
            ),
            model: config.asr_model.clone(),
            language: config.language.clone(),
            api_key_env: config.asr_api_key_env.clone(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }

    fn form(&self, audio: &[u8]) -> reqwest::multipart::Form {
        let file = reqwest::multipart::Part::bytes(audio.to_vec()).file_name("audio.wav");
        reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let api_key = std::env::var(&self.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.api_key_env))?;
        let json = send_json_with_retry("Transcription", ASR_MAX_RETRIES, || {
            self.client
                .post(&self.url)
                .bearer_auth(&api_key)
                .multipart(self.form(audio))
        })
        .await?;
        parse_transcription(&json)
    }
}

pub fn parse_transcription(json: &serde_json::Value) -> Result<String> {
    json.get("text")
        .and_then(|t| t.as_str())
        .map(|t| t.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid transcription response: missing text"))
}

// ============ Extractor ============

#[derive(Default, Clone)]
pub struct ModalityExtractor {
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub asr: Option<Arc<dyn Transcriber>>,
    pub text_embedder: Option<Arc<dyn TextEmbedder>>,
    pub image_embedder: Option<Arc<dyn ImageEmbedder>>,
}

impl ModalityExtractor {
    /// Build the OCR and ASR adapters named in `config`; embedders are
    /// supplied by the caller.
    pub fn from_config(
        config: &ExtractionConfig,
        text_embedder: Option<Arc<dyn TextEmbedder>>,
        image_embedder: Option<Arc<dyn ImageEmbedder>>,
    ) -> Result<Self> {
        let ocr: Option<Arc<dyn OcrEngine>> = match config.ocr.as_str() {
            "disabled" => None,
            "tesseract" => Some(Arc::new(TesseractOcr::new(config))),
            other => bail!("Unknown OCR engine: {}", other),
        };
        let asr: Option<Arc<dyn Transcriber>> = match config.asr.as_str() {
            "disabled" => None,
            "openai" => Some(Arc::new(OpenAiTranscriber::new(config)?)),
            other => bail!("Unknown ASR provider: {}", other),
        };
        Ok(Self {
            ocr,
            asr,
            text_embedder,
            image_embedder,
        })
    }

    async fn ocr_text(&self, image: Option<&[u8]>) -> String {
        let (Some(engine), Some(image)) = (&self.ocr, image) else {
            return String::new();
        };
        match engine.recognize(image).await {
            Ok(text) => text,
            Err(e) => {
                log_degraded("ocr", &e);
                String::new()
            }
        }
    }

    async fn asr_text(&self, audio: Option<&[u8]>) -> String {
        let (Some(asr), Some(audio)) = (&self.asr, audio) else {
            return String::new();
        };
        match asr.transcribe(audio).await {
            Ok(text) => text,
            Err(e) => {
                log_degraded("asr", &e);
                String::new()
            }
        }
    }

    async fn text_vector(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.text_embedder.as_ref()?;
        if text.is_empty() {
            return None;
        }
        match embed_one(embedder.as_ref(), text).await {
            Ok(v) => Some(v),
            Err(e) => {
                log_degraded("text_embedding", &e);
                None
            }
        }
    }

    async fn image_vector(&self, image: Option<&[u8]>) -> Option<Vec<f32>> {
        let embedder = self.image_embedder.as_ref()?;
        let image = image?;
        match embedder.embed(image).await {
            Ok(v) => Some(v),
            Err(e) => {
                log_degraded("image_embedding", &e);
                None
            }
        }
    }
}

#[async_trait]
impl SignalExtractor for ModalityExtractor {
    async fn extract(&self, request: &ModerationRequest) -> CombinedSignal {
        let image = request.image.as_deref();
        let text = request.text.clone().unwrap_or_default();

        let (ocr_text, asr_text) = tokio::join!(
            self.ocr_text(image),
            self.asr_text(request.audio.as_deref())
        );
        let combined_text = combine_texts(&text, &ocr_text, &asr_text);

        let (text_vec, image_vec) =
            tokio::join!(self.text_vector(&combined_text), self.image_vector(image));

        tracing::debug!(
            user_id = %request.user_id,
            ocr_chars = ocr_text.len(),
            asr_chars = asr_text.len(),
            text_vector = text_vec.is_some(),
            image_vector = image_vec.is_some(),
            "signal extracted"
        );

        CombinedSignal {
            user_id: request.user_id.clone(),
            raw: RawModalities {
                text,
                ocr_text,
                asr_text,
            },
            combined_text,
            vectors: SignalVectors {
                text: text_vec,
                image: image_vec,
            },
        }
    }
}
