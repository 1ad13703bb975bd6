//! Collection schema and idempotent provisioning.
//!
//! SentinELLE keeps three independent collections, each with one named
//! vector space and a small set of payload indexes:
//!
//! | Kind | Default name | Vector | Dims | Payload index |
//! |------|--------------|--------|------|---------------|
//! | [`CollectionKind::Knowledge`] | `gbv_knowledge_base` | `text` | 384 | full-text on `text` |
//! | [`CollectionKind::ToxicImagery`] | `toxic_imagery` | `image` | 512 | full-text on `caption` |
//! | [`CollectionKind::Reputation`] | `user_reputation` | `profile` | 384 | keyword on `user_id` |
//!
//! Names, vector names and dimensions are a compatibility surface: changing
//! an embedding model's output size requires a migration, never a silent
//! schema change.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::store::VectorStore;
use crate::StoreError;

pub const DEFAULT_KNOWLEDGE_COLLECTION: &str = "gbv_knowledge_base";
pub const DEFAULT_IMAGERY_COLLECTION: &str = "toxic_imagery";
pub const DEFAULT_REPUTATION_COLLECTION: &str = "user_reputation";

/// all-MiniLM-L6-v2 output size.
pub const DEFAULT_TEXT_DIMS: usize = 384;
/// CLIP ViT-B/32 output size.
pub const DEFAULT_IMAGE_DIMS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Knowledge,
    ToxicImagery,
    Reputation,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Knowledge => "knowledge",
            CollectionKind::ToxicImagery => "toxic_imagery",
            CollectionKind::Reputation => "reputation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Distance {
    Cosine,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
        }
    }
}

/// A secondary payload index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadIndex {
    /// Word-tokenized, lowercased full-text index.
    FullText { field: &'static str },
    /// Exact-match keyword index.
    Keyword { field: &'static str },
}

impl PayloadIndex {
    pub fn field(&self) -> &'static str {
        match self {
            PayloadIndex::FullText { field } | PayloadIndex::Keyword { field } => field,
        }
    }
}

/// Declared shape of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    pub kind: CollectionKind,
    pub name: String,
    pub vector_name: &'static str,
    pub dims: usize,
    pub distance: Distance,
    pub indexes: Vec<PayloadIndex>,
}

impl CollectionSpec {
    pub fn knowledge(name: impl Into<String>, dims: usize) -> Self {
        Self {
            kind: CollectionKind::Knowledge,
            name: name.into(),
            vector_name: "text",
            dims,
            distance: Distance::Cosine,
            indexes: vec![PayloadIndex::FullText { field: "text" }],
        }
    }

    pub fn toxic_imagery(name: impl Into<String>, dims: usize) -> Self {
        Self {
            kind: CollectionKind::ToxicImagery,
            name: name.into(),
            vector_name: "image",
            dims,
            distance: Distance::Cosine,
            indexes: vec![PayloadIndex::FullText { field: "caption" }],
        }
    }

    pub fn reputation(name: impl Into<String>, dims: usize) -> Self {
        Self {
            kind: CollectionKind::Reputation,
            name: name.into(),
            vector_name: "profile",
            dims,
            distance: Distance::Cosine,
            indexes: vec![PayloadIndex::Keyword { field: "user_id" }],
        }
    }

    /// Reject a vector whose length differs from the declared dimension.
    pub fn check_dims(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(Error::DimensionMismatch {
                collection: self.name.clone(),
                expected: self.dims,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// The three collections the context engine reads from.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub knowledge: CollectionSpec,
    pub imagery: CollectionSpec,
    pub reputation: CollectionSpec,
}

impl Schema {
    /// Default names with the given text and image dimensions. Reputation
    /// profiles live in the text embedding space.
    pub fn new(text_dims: usize, image_dims: usize) -> Self {
        Self::with_names(
            DEFAULT_KNOWLEDGE_COLLECTION,
            DEFAULT_IMAGERY_COLLECTION,
            DEFAULT_REPUTATION_COLLECTION,
            text_dims,
            image_dims,
        )
    }

    pub fn with_names(
        knowledge: &str,
        imagery: &str,
        reputation: &str,
        text_dims: usize,
        image_dims: usize,
    ) -> Self {
        Self {
            knowledge: CollectionSpec::knowledge(knowledge, text_dims),
            imagery: CollectionSpec::toxic_imagery(imagery, image_dims),
            reputation: CollectionSpec::reputation(reputation, text_dims),
        }
    }

    pub fn collections(&self) -> [&CollectionSpec; 3] {
        [&self.knowledge, &self.imagery, &self.reputation]
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new(DEFAULT_TEXT_DIMS, DEFAULT_IMAGE_DIMS)
    }
}

/// Create every collection in `schema` that the store does not have yet.
///
/// Safe to call repeatedly and concurrently: a create that loses the race
/// (`StoreError::AlreadyExists`) counts as success. Collections that already
/// exist get [`VectorStore::ensure_indexes`]. Returns the names of the
/// collections this call created.
pub async fn ensure_collections(store: &dyn VectorStore, schema: &Schema) -> Result<Vec<String>> {
    let existing = store.list_collections().await?;
    let mut created = Vec::new();

    for spec in schema.collections() {
        if existing.iter().any(|name| name == &spec.name) {
            // A previous create may have stopped between the collection and
            // its indexes.
            store.ensure_indexes(spec).await?;
            continue;
        }
        match store.create_collection(spec).await {
            Ok(()) => {
                tracing::info!(
                    collection = %spec.name,
                    kind = spec.kind.as_str(),
                    vector = spec.vector_name,
                    dims = spec.dims,
                    backend = store.backend_name(),
                    "created collection"
                );
                created.push(spec.name.clone());
            }
            Err(StoreError::AlreadyExists(name)) => {
                tracing::debug!(collection = %name, "collection created concurrently");
                store.ensure_indexes(spec).await?;
            }
            Err(e) => return Err(Error::StoreUnavailable(e)),
        }
    }

    if created.is_empty() {
        tracing::debug!(backend = store.backend_name(), "all collections present");
    }
    Ok(created)
}
