//! Signal extraction contract.
//!
//! The extractor turns a [`ModerationRequest`] into a [`CombinedSignal`]:
//! per-modality text (raw, OCR, ASR), one combined text, and optional text
//! and image embeddings. OCR, ASR, and embedding models are external
//! collaborators; a failure in any of them degrades that modality to empty
//! text or an absent vector and never fails the pipeline.

use async_trait::async_trait;

use crate::models::{CombinedSignal, ModerationRequest};

/// Produces the combined signal for one request. Infallible by contract.
#[async_trait]
pub trait SignalExtractor: Send + Sync {
    async fn extract(&self, request: &ModerationRequest) -> CombinedSignal;
}

/// Join the non-empty, trimmed texts in fixed order (raw, OCR, ASR) with a
/// single space.
///
/// ```rust
/// use sentinelle_core::signal::combine_texts;
///
/// assert_eq!(combine_texts("", "block this", ""), "block this");
/// assert_eq!(combine_texts(" hi ", "", "there"), "hi there");
/// ```
pub fn combine_texts(raw: &str, ocr: &str, asr: &str) -> String {
    [raw, ocr, asr]
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log a modality that fell back to its empty state.
pub fn log_degraded(modality: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(modality, error = %error, "ExtractionDegraded: continuing without modality");
}
