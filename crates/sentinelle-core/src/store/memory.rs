//! In-memory [`VectorStore`] implementation for tests and embedding.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Vector
//! search is brute-force cosine similarity; the full-text filter uses the
//! same word tokenizer as the persistent backends.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{KnowledgeEntry, Record, ReputationEvent, Scored, ToxicImage};
use crate::schema::{CollectionKind, CollectionSpec};
use crate::vector::{cmp_score_desc, cosine_similarity};

use super::{KnowledgeQuery, VectorStore, LEXICAL_MATCH_SCORE};

enum Rows {
    Knowledge(Vec<Record<KnowledgeEntry>>),
    ToxicImagery(Vec<Record<ToxicImage>>),
    Reputation(Vec<Record<ReputationEvent>>),
}

struct Collection {
    dims: usize,
    rows: Rows,
}

/// In-memory store. Insertion order is the stable scroll order.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    /// Number of records in a collection, if it exists.
    pub fn count(&self, collection: &str) -> Option<usize> {
        let guard = self.collections.read().ok()?;
        guard.get(collection).map(|c| match &c.rows {
            Rows::Knowledge(r) => r.len(),
            Rows::ToxicImagery(r) => r.len(),
            Rows::Reputation(r) => r.len(),
        })
    }
}

fn not_found(name: &str) -> StoreError {
    StoreError::Rejected {
        status: 404,
        body: format!("collection '{}' not found", name),
    }
}

fn wrong_kind(name: &str, expected: CollectionKind) -> StoreError {
    StoreError::Rejected {
        status: 400,
        body: format!("collection '{}' is not a {} collection", name, expected.as_str()),
    }
}

fn check_len(name: &str, dims: usize, vector: &[f32]) -> Result<(), StoreError> {
    if vector.len() != dims {
        return Err(StoreError::Rejected {
            status: 400,
            body: format!(
                "collection '{}' expects {} dimensions, got {}",
                name,
                dims,
                vector.len()
            ),
        });
    }
    Ok(())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read()?.keys().cloned().collect())
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        if guard.contains_key(&spec.name) {
            return Err(StoreError::AlreadyExists(spec.name.clone()));
        }
        let rows = match spec.kind {
            CollectionKind::Knowledge => Rows::Knowledge(Vec::new()),
            CollectionKind::ToxicImagery => Rows::ToxicImagery(Vec::new()),
            CollectionKind::Reputation => Rows::Reputation(Vec::new()),
        };
        guard.insert(
            spec.name.clone(),
            Collection {
                dims: spec.dims,
                rows,
            },
        );
        Ok(())
    }

    async fn insert_knowledge(
        &self,
        spec: &CollectionSpec,
        record: &Record<KnowledgeEntry>,
    ) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        let coll = guard.get_mut(&spec.name).ok_or_else(|| not_found(&spec.name))?;
        check_len(&spec.name, coll.dims, &record.vector)?;
        match &mut coll.rows {
            Rows::Knowledge(rows) => rows.push(record.clone()),
            _ => return Err(wrong_kind(&spec.name, CollectionKind::Knowledge)),
        }
        Ok(())
    }

    async fn insert_toxic_image(
        &self,
        spec: &CollectionSpec,
        record: &Record<ToxicImage>,
    ) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        let coll = guard.get_mut(&spec.name).ok_or_else(|| not_found(&spec.name))?;
        check_len(&spec.name, coll.dims, &record.vector)?;
        match &mut coll.rows {
            Rows::ToxicImagery(rows) => rows.push(record.clone()),
            _ => return Err(wrong_kind(&spec.name, CollectionKind::ToxicImagery)),
        }
        Ok(())
    }

    async fn insert_reputation(
        &self,
        spec: &CollectionSpec,
        record: &Record<ReputationEvent>,
    ) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        let coll = guard.get_mut(&spec.name).ok_or_else(|| not_found(&spec.name))?;
        check_len(&spec.name, coll.dims, &record.vector)?;
        match &mut coll.rows {
            Rows::Reputation(rows) => rows.push(record.clone()),
            _ => return Err(wrong_kind(&spec.name, CollectionKind::Reputation)),
        }
        Ok(())
    }

    async fn scroll_reputation(
        &self,
        spec: &CollectionSpec,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ReputationEvent>, StoreError> {
        let guard = self.read()?;
        let coll = guard.get(&spec.name).ok_or_else(|| not_found(&spec.name))?;
        match &coll.rows {
            Rows::Reputation(rows) => Ok(rows
                .iter()
                .filter(|r| r.payload.user_id == user_id)
                .take(limit)
                .map(|r| r.payload.clone())
                .collect()),
            _ => Err(wrong_kind(&spec.name, CollectionKind::Reputation)),
        }
    }

    async fn search_images(
        &self,
        spec: &CollectionSpec,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<ToxicImage>>, StoreError> {
        let guard = self.read()?;
        let coll = guard.get(&spec.name).ok_or_else(|| not_found(&spec.name))?;
        let rows = match &coll.rows {
            Rows::ToxicImagery(rows) => rows,
            _ => return Err(wrong_kind(&spec.name, CollectionKind::ToxicImagery)),
        };
        let mut hits: Vec<Scored<ToxicImage>> = rows
            .iter()
            .map(|r| Scored {
                score: cosine_similarity(vector, &r.vector),
                payload: r.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| cmp_score_desc(a.score, b.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn search_knowledge(
        &self,
        spec: &CollectionSpec,
        query: &KnowledgeQuery<'_>,
    ) -> Result<Vec<Scored<KnowledgeEntry>>, StoreError> {
        let guard = self.read()?;
        let coll = guard.get(&spec.name).ok_or_else(|| not_found(&spec.name))?;
        let rows = match &coll.rows {
            Rows::Knowledge(rows) => rows,
            _ => return Err(wrong_kind(&spec.name, CollectionKind::Knowledge)),
        };

        let filtered = rows.iter().filter(|r| {
            query
                .lexical
                .as_ref()
                .map_or(true, |f| f.matches(&r.payload.text))
        });

        let mut hits: Vec<Scored<KnowledgeEntry>> = match query.vector {
            Some(v) => filtered
                .map(|r| Scored {
                    score: cosine_similarity(v, &r.vector),
                    payload: r.payload.clone(),
                })
                .collect(),
            None => filtered
                .map(|r| Scored {
                    score: LEXICAL_MATCH_SCORE,
                    payload: r.payload.clone(),
                })
                .collect(),
        };
        hits.sort_by(|a, b| cmp_score_desc(a.score, b.score));
        hits.truncate(query.limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LexicalFilter, LexicalMode};

    fn kb_spec() -> CollectionSpec {
        CollectionSpec::knowledge("kb", 2)
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.create_collection(&kb_spec()).await.unwrap();
        for (text, v) in [
            ("doxxing is a form of abuse", [1.0, 0.0]),
            ("stalking and doxxing", [0.6, 0.8]),
            ("gaming banter", [0.0, 1.0]),
        ] {
            let rec = Record::new(
                v.to_vec(),
                KnowledgeEntry {
                    text: text.into(),
                    tags: vec!["kb".into()],
                },
            );
            store.insert_knowledge(&kb_spec(), &rec).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_create_twice_reports_exists() {
        let store = InMemoryStore::new();
        store.create_collection(&kb_spec()).await.unwrap();
        let err = store.create_collection(&kb_spec()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(name) if name == "kb"));
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_similarity() {
        let store = seeded().await;
        let q = KnowledgeQuery {
            vector: Some(&[1.0, 0.0]),
            lexical: None,
            limit: 2,
        };
        let hits = store.search_knowledge(&kb_spec(), &q).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.text, "doxxing is a form of abuse");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_vector_search_scoped_by_filter() {
        let store = seeded().await;
        let q = KnowledgeQuery {
            vector: Some(&[0.0, 1.0]),
            lexical: LexicalFilter::from_text("doxxing", LexicalMode::All),
            limit: 5,
        };
        let hits = store.search_knowledge(&kb_spec(), &q).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.text, "stalking and doxxing");
        assert!(hits.iter().all(|h| h.payload.text.contains("doxxing")));
    }

    #[tokio::test]
    async fn test_lexical_only_scores_one() {
        let store = seeded().await;
        let q = KnowledgeQuery {
            vector: None,
            lexical: LexicalFilter::from_text("banter", LexicalMode::All),
            limit: 5,
        };
        let hits = store.search_knowledge(&kb_spec(), &q).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, LEXICAL_MATCH_SCORE);
    }

    #[tokio::test]
    async fn test_insert_rejects_wrong_dims() {
        let store = InMemoryStore::new();
        store.create_collection(&kb_spec()).await.unwrap();
        let rec = Record::new(
            vec![1.0, 2.0, 3.0],
            KnowledgeEntry {
                text: "x".into(),
                tags: vec![],
            },
        );
        let err = store.insert_knowledge(&kb_spec(), &rec).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_missing_collection_is_rejected() {
        let store = InMemoryStore::new();
        let spec = CollectionSpec::reputation("rep", 2);
        let err = store.scroll_reputation(&spec, "u", 10).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 404, .. }));
    }
}
