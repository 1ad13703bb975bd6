//! Storage abstraction for the three moderation collections.
//!
//! The [`VectorStore`] trait defines every storage operation the context
//! engine needs, enabling pluggable backends (Qdrant, SQLite, in-memory).
//! Implementations must be `Send + Sync` and object-safe; the archivist holds
//! an `Arc<dyn VectorStore>`.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`list_collections`](VectorStore::list_collections) | Names of existing collections |
//! | [`create_collection`](VectorStore::create_collection) | Create a collection and its payload indexes |
//! | [`ensure_indexes`](VectorStore::ensure_indexes) | Re-issue payload indexes on an existing collection |
//! | [`insert_knowledge`](VectorStore::insert_knowledge) | Append one knowledge-base record |
//! | [`insert_toxic_image`](VectorStore::insert_toxic_image) | Append one toxic-imagery record |
//! | [`insert_reputation`](VectorStore::insert_reputation) | Append one reputation event |
//! | [`scroll_reputation`](VectorStore::scroll_reputation) | Exact-match filter scan on `user_id` |
//! | [`search_images`](VectorStore::search_images) | k-nearest-neighbour image search |
//! | [`search_knowledge`](VectorStore::search_knowledge) | Hybrid vector / full-text knowledge search |
//!
//! Every store operation is atomic at single-record granularity only. A read
//! issued right after a write is not guaranteed to observe it.

pub mod memory;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::StoreError;
use crate::models::{KnowledgeEntry, Record, ReputationEvent, Scored, ToxicImage};
use crate::schema::CollectionSpec;

/// How the terms of a full-text filter combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LexicalMode {
    /// Every term must occur (full-text match semantics).
    #[default]
    All,
    /// At least one term must occur.
    Any,
}

/// Full-text restriction on the knowledge `text` field.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalFilter {
    /// Lowercased word tokens, deduplicated, in first-seen order.
    pub terms: Vec<String>,
    pub mode: LexicalMode,
}

impl LexicalFilter {
    /// Build a filter from free text. Returns `None` if the text contains no
    /// word tokens.
    pub fn from_text(text: &str, mode: LexicalMode) -> Option<Self> {
        let mut terms: Vec<String> = Vec::new();
        for t in tokenize(text) {
            if !terms.contains(&t) {
                terms.push(t);
            }
        }
        if terms.is_empty() {
            None
        } else {
            Some(Self { terms, mode })
        }
    }

    /// Whether `text` satisfies the filter under word tokenization.
    pub fn matches(&self, text: &str) -> bool {
        let tokens = tokenize(text);
        let has = |term: &String| tokens.iter().any(|t| t == term);
        match self.mode {
            LexicalMode::All => self.terms.iter().all(has),
            LexicalMode::Any => self.terms.iter().any(has),
        }
    }
}

/// Word tokenizer: split on anything that is not alphanumeric, lowercase.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Inputs for one knowledge-base search.
///
/// - vector and lexical: nearest-neighbour search scoped by the filter.
/// - lexical only: filter scan; every hit scores `1.0`.
/// - vector only: plain nearest-neighbour search.
#[derive(Debug, Clone)]
pub struct KnowledgeQuery<'a> {
    pub vector: Option<&'a [f32]>,
    pub lexical: Option<LexicalFilter>,
    pub limit: usize,
}

/// Score assigned to hits of a lexical-only scan.
pub const LEXICAL_MATCH_SCORE: f32 = 1.0;

/// Abstract storage backend for the moderation collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend identifier for logs (e.g. `"qdrant"`).
    fn backend_name(&self) -> &str;

    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    /// Create a collection with its vector space and payload indexes.
    ///
    /// Returns [`StoreError::AlreadyExists`] if the collection is already
    /// there.
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError>;

    /// Make sure an existing collection carries the payload indexes `spec`
    /// declares. Must be idempotent.
    ///
    /// Backends that create indexes in the same step as the collection keep
    /// the default no-op.
    async fn ensure_indexes(&self, _spec: &CollectionSpec) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_knowledge(
        &self,
        spec: &CollectionSpec,
        record: &Record<KnowledgeEntry>,
    ) -> Result<(), StoreError>;

    async fn insert_toxic_image(
        &self,
        spec: &CollectionSpec,
        record: &Record<ToxicImage>,
    ) -> Result<(), StoreError>;

    async fn insert_reputation(
        &self,
        spec: &CollectionSpec,
        record: &Record<ReputationEvent>,
    ) -> Result<(), StoreError>;

    /// Up to `limit` events whose `user_id` equals the argument exactly,
    /// in stable storage order. No similarity ranking.
    async fn scroll_reputation(
        &self,
        spec: &CollectionSpec,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ReputationEvent>, StoreError>;

    /// Up to `limit` nearest images, descending score.
    async fn search_images(
        &self,
        spec: &CollectionSpec,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<ToxicImage>>, StoreError>;

    /// Knowledge hits for `query`, descending score. Callers never pass a
    /// query with neither a vector nor a lexical filter.
    async fn search_knowledge(
        &self,
        spec: &CollectionSpec,
        query: &KnowledgeQuery<'_>,
    ) -> Result<Vec<Scored<KnowledgeEntry>>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_words() {
        assert_eq!(
            tokenize("Threats, stalking & doxxing!"),
            vec!["threats", "stalking", "doxxing"]
        );
        assert!(tokenize("  ... ").is_empty());
    }

    #[test]
    fn test_tokenize_keeps_leetspeak() {
        assert_eq!(tokenize("r4pe e.g."), vec!["r4pe", "e", "g"]);
    }

    #[test]
    fn test_filter_from_text_dedups() {
        let f = LexicalFilter::from_text("Block block THIS", LexicalMode::All).unwrap();
        assert_eq!(f.terms, vec!["block", "this"]);
        assert!(LexicalFilter::from_text("?!", LexicalMode::All).is_none());
    }

    #[test]
    fn test_filter_all_vs_any() {
        let all = LexicalFilter::from_text("stalking doxxing", LexicalMode::All).unwrap();
        let any = LexicalFilter {
            mode: LexicalMode::Any,
            ..all.clone()
        };
        let text = "Threats, stalking, and harassment.";
        assert!(!all.matches(text));
        assert!(any.matches(text));
        assert!(all.matches("Doxxing and stalking are GBV."));
    }

    #[test]
    fn test_filter_matches_whole_words_only() {
        let f = LexicalFilter::from_text("port", LexicalMode::All).unwrap();
        assert!(!f.matches("revenge porn report"));
        assert!(f.matches("port of call"));
    }
}
