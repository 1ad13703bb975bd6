//! Core data models used throughout SentinELLE.
//!
//! Stored records are `Record<P>`: an id, one vector and a typed payload.
//! The three payload types map one-to-one onto the three collections.
//! The remaining types are the values that flow through the pipeline:
//! the moderation request, the combined signal, and the context object.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One stored point: id, vector and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<P> {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: P,
}

impl<P> Record<P> {
    /// Build a record with a freshly assigned v4 id.
    pub fn new(vector: Vec<f32>, payload: P) -> Self {
        Self {
            id: Uuid::new_v4(),
            vector,
            payload,
        }
    }
}

/// A moderation-relevant fact, definition or slang entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A reference image signature known to be policy-violating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToxicImage {
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub label: String,
}

/// One historical moderation event tied to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationEvent {
    pub user_id: String,
    #[serde(default)]
    pub toxicity_score: f64,
    #[serde(default)]
    pub summary: String,
}

/// A payload paired with the similarity score the backend assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<P> {
    pub score: f32,
    pub payload: P,
}

/// What a caller submits for moderation.
#[derive(Debug, Clone, Default)]
pub struct ModerationRequest {
    pub user_id: String,
    pub text: Option<String>,
    pub image: Option<Vec<u8>>,
    pub audio: Option<Vec<u8>>,
}

/// Per-modality text before combination.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawModalities {
    pub text: String,
    pub ocr_text: String,
    pub asr_text: String,
}

/// Optional embeddings of the combined signal.
///
/// `None` means "not computed" (no input, or extraction failed). It is never
/// replaced by a zero vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalVectors {
    pub text: Option<Vec<f32>>,
    pub image: Option<Vec<f32>>,
}

/// Output of the signal extractor, consumed by the archivist and the judge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CombinedSignal {
    pub user_id: String,
    pub raw: RawModalities,
    pub combined_text: String,
    #[serde(skip)]
    pub vectors: SignalVectors,
}

/// Aggregated reputation history for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserHistory {
    pub flags: usize,
    pub toxicity_score: f64,
    pub notes: Vec<String>,
}

/// One toxic-imagery neighbour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMatch {
    pub score: f32,
    pub label: String,
    pub caption: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSimilarity {
    pub matches: Vec<ImageMatch>,
}

/// One knowledge-base hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextHit {
    pub score: f32,
    pub text: String,
    pub tags: Vec<String>,
}

/// The bounded context object handed to the decision step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchivistContext {
    pub history: UserHistory,
    pub image_similarity: ImageSimilarity,
    pub text_context: Vec<TextHit>,
}
