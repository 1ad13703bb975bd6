//! Context engine: retrieval and aggregation across the three collections.
//!
//! The archivist operates entirely through the [`VectorStore`] trait. It
//! turns a [`CombinedSignal`] into a bounded [`ArchivistContext`]:
//!
//! 1. **History**: exact-match scan of the reputation ledger on `user_id`
//!    (a hard key, not a fuzzy signal), aggregated into a flag count, the
//!    mean toxicity score rounded to 2 decimals, and up to 5 notes.
//! 2. **Image similarity**: k-nearest neighbours in the image space, no
//!    threshold (interpretation belongs to the decision step).
//! 3. **Text context**: hybrid knowledge-base retrieval: vector search
//!    scoped by a full-text filter, or either signal alone.
//!
//! The three retrievals are independent and run concurrently in
//! [`Archivist::gather_context`]. Logical absence (unknown user, no image
//! vector, empty collection) folds into zero-valued shapes; any store failure
//! propagates as [`Error::StoreUnavailable`].

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{
    ArchivistContext, CombinedSignal, ImageMatch, ImageSimilarity, KnowledgeEntry, Record,
    ReputationEvent, TextHit, ToxicImage, UserHistory,
};
use crate::schema::{self, Schema};
use crate::store::{KnowledgeQuery, LexicalFilter, LexicalMode, VectorStore};
use crate::vector::cmp_score_desc;

/// Retrieval bounds, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Maximum reputation events scanned per user.
    pub history_scan_limit: usize,
    /// Maximum summaries kept in `history.notes`.
    pub notes_limit: usize,
    /// Default `limit` for image similarity.
    pub image_limit: usize,
    /// Default `limit` for text context.
    pub text_limit: usize,
    pub lexical_mode: LexicalMode,
}

impl Default for RetrievalParams {
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

/// Read/write facade over the moderation collections.
#[derive(Clone)]
pub struct Archivist {
    store: Arc<dyn VectorStore>,
    schema: Schema,
    params: RetrievalParams,
}

impl Archivist {
    pub fn new(store: Arc<dyn VectorStore>, schema: Schema, params: RetrievalParams) -> Self {
        Self {
            store,
            schema,
            params,
        }
    }

    /// Idempotently provision the three collections.
    pub async fn ensure_collections(&self) -> Result<Vec<String>> {
        schema::ensure_collections(self.store.as_ref(), &self.schema).await
    }

    /// Aggregate a user's reputation events.
    ///
    /// Zero matches (or an empty `user_id`) yields
    /// `{flags: 0, toxicity_score: 0.0, notes: []}`.
    pub async fn retrieve_history(&self, user_id: &str) -> Result<UserHistory> {
        if user_id.is_empty() {
            return Ok(UserHistory::default());
        }
        let events = self
            .store
            .scroll_reputation(
                &self.schema.reputation,
                user_id,
                self.params.history_scan_limit,
            )
            .await?;
        let history = aggregate_history(&events, self.params.notes_limit);
        tracing::debug!(user_id, flags = history.flags, "history retrieved");
        Ok(history)
    }

    /// Nearest toxic-imagery records. `None` short-circuits without a store
    /// call.
    pub async fn retrieve_image_similarity(
        &self,
        image_vector: Option<&[f32]>,
        limit: usize,
    ) -> Result<ImageSimilarity> {
        let Some(vector) = image_vector else {
            return Ok(ImageSimilarity::default());
        };
        if limit == 0 {
            return Ok(ImageSimilarity::default());
        }

        let mut hits = self
            .store
            .search_images(&self.schema.imagery, vector, limit)
            .await?;
        hits.sort_by(|a, b| cmp_score_desc(a.score, b.score));
        hits.truncate(limit);

        let matches: Vec<ImageMatch> = hits
            .into_iter()
            .map(|h| ImageMatch {
                score: h.score,
                label: h.payload.label,
                caption: h.payload.caption,
            })
            .collect();
        tracing::debug!(hits = matches.len(), "image similarity retrieved");
        Ok(ImageSimilarity { matches })
    }

    /// Hybrid knowledge-base retrieval.
    ///
    /// | `query_text` has words | `text_vector` | Strategy |
    /// |---|---|---|
    /// | yes | yes | vector search scoped by the full-text filter |
    /// | yes | no | full-text filter scan |
    /// | no | yes | vector search |
    /// | no | no | `[]`, no store call |
    pub async fn retrieve_text_context(
        &self,
        query_text: &str,
        text_vector: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<TextHit>> {
        let lexical = LexicalFilter::from_text(query_text, self.params.lexical_mode);
        if (lexical.is_none() && text_vector.is_none()) || limit == 0 {
            return Ok(Vec::new());
        }

        let query = KnowledgeQuery {
            vector: text_vector,
            lexical,
            limit,
        };
        let mut hits = self
            .store
            .search_knowledge(&self.schema.knowledge, &query)
            .await?;
        hits.sort_by(|a, b| cmp_score_desc(a.score, b.score));
        hits.truncate(limit);

        let hits: Vec<TextHit> = hits
            .into_iter()
            .map(|h| TextHit {
                score: h.score,
                text: h.payload.text,
                tags: h.payload.tags,
            })
            .collect();
        tracing::debug!(hits = hits.len(), "text context retrieved");
        Ok(hits)
    }

    /// Run the three retrievals concurrently.
    ///
    /// Either all three complete (or short-circuit) or the whole call fails
    /// with the first error; the remaining retrievals are dropped.
    pub async fn gather_context(&self, signal: &CombinedSignal) -> Result<ArchivistContext> {
        let (history, image_similarity, text_context) = futures::try_join!(
            self.retrieve_history(&signal.user_id),
            self.retrieve_image_similarity(signal.vectors.image.as_deref(), self.params.image_limit),
            self.retrieve_text_context(
                &signal.combined_text,
                signal.vectors.text.as_deref(),
                self.params.text_limit,
            ),
        )?;
        Ok(ArchivistContext {
            history,
            image_similarity,
            text_context,
        })
    }

    /// Append one knowledge-base entry. Returns its new id.
    pub async fn upsert_kb(
        &self,
        text: &str,
        text_vector: Vec<f32>,
        tags: Vec<String>,
    ) -> Result<uuid::Uuid> {
        if text.trim().is_empty() {
            return Err(Error::InvalidRecord("knowledge text must not be empty".into()));
        }
        self.schema.knowledge.check_dims(&text_vector)?;
        let record = Record::new(
            text_vector,
            KnowledgeEntry {
                text: text.to_string(),
                tags,
            },
        );
        self.store
            .insert_knowledge(&self.schema.knowledge, &record)
            .await?;
        Ok(record.id)
    }

    /// Append one toxic-imagery reference. Returns its new id.
    pub async fn upsert_toxic_image(
        &self,
        image_vector: Vec<f32>,
        caption: &str,
        label: &str,
    ) -> Result<uuid::Uuid> {
        if label.trim().is_empty() {
            return Err(Error::InvalidRecord("image label must not be empty".into()));
        }
        self.schema.imagery.check_dims(&image_vector)?;
        let record = Record::new(
            image_vector,
            ToxicImage {
                caption: caption.to_string(),
                label: label.to_string(),
            },
        );
        self.store
            .insert_toxic_image(&self.schema.imagery, &record)
            .await?;
        Ok(record.id)
    }

    /// Append one reputation event. Returns its new id.
    pub async fn upsert_user_profile(
        &self,
        user_id: &str,
        profile_vector: Vec<f32>,
        toxicity_score: f64,
        summary: &str,
    ) -> Result<uuid::Uuid> {
        if user_id.is_empty() {
            return Err(Error::InvalidRecord("user_id must not be empty".into()));
        }
        if !toxicity_score.is_finite() {
            return Err(Error::InvalidRecord(format!(
                "toxicity_score must be finite, got {}",
                toxicity_score
            )));
        }
        self.schema.reputation.check_dims(&profile_vector)?;
        let record = Record::new(
            profile_vector,
            ReputationEvent {
                user_id: user_id.to_string(),
                toxicity_score,
                summary: summary.to_string(),
            },
        );
        self.store
            .insert_reputation(&self.schema.reputation, &record)
            .await?;
        Ok(record.id)
    }
}

/// Flag count, mean score rounded to 2 decimals, first `notes_limit`
/// summaries in retrieval order.
pub fn aggregate_history(events: &[ReputationEvent], notes_limit: usize) -> UserHistory {
    if events.is_empty() {
        return UserHistory::default();
    }
    let flags = events.len();
    let mean = events.iter().map(|e| e.toxicity_score).sum::<f64>() / flags as f64;
    UserHistory {
        flags,
        toxicity_score: round2(mean),
        notes: events
            .iter()
            .take(notes_limit)
            .map(|e| e.summary.clone())
            .collect(),
    }
}

/// Round to two decimals, ties to even, on the exact decimal expansion of
/// `x` rather than on `x * 100.0`.
fn round2(x: f64) -> f64 {
    if !x.is_finite() || x.abs() >= 1e15 {
        return x;
    }
    // Forty places separate an exact tie from its f64 neighbours in range.
    let digits = format!("{:.40}", x.abs());
    let (whole, frac) = digits.split_once('.').unwrap_or((digits.as_str(), ""));
    let whole: u64 = whole.parse().unwrap_or(0);
    let kept: u64 = frac.get(..2).and_then(|d| d.parse().ok()).unwrap_or(0);
    let rest = frac.get(2..).unwrap_or("");

    let mut cents = whole * 100 + kept;
    let round_up = match rest.as_bytes().first() {
        Some(b'5') => rest[1..].bytes().any(|b| b != b'0') || cents % 2 == 1,
        Some(&d) => d > b'5',
        None => false,
    };
    if round_up {
        cents += 1;
    }
    (cents as f64 / 100.0).copysign(x)
}
