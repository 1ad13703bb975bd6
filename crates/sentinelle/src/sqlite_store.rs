//! SQLite-backed [`VectorStore`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs and searched by brute-force
//! cosine similarity. Lexical filters go through FTS5 `MATCH`. Every
//! operation is bounded by the configured timeout; an expired bound is
//! [`StoreError::Timeout`].

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::time::Duration;

use sentinelle_core::models::{KnowledgeEntry, Record, ReputationEvent, Scored, ToxicImage};
use sentinelle_core::schema::{CollectionKind, CollectionSpec};
use sentinelle_core::store::{
    KnowledgeQuery, LexicalFilter, LexicalMode, VectorStore, LEXICAL_MATCH_SCORE,
};
use sentinelle_core::vector::{cmp_score_desc, cosine_similarity, decode_f32_le, encode_f32_le};
use sentinelle_core::StoreError;

use crate::migrate::{create_collection_tables, fts_table_name, run_migrations, table_name};

pub struct SqliteStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl SqliteStore {
    /// Wrap a pool and ensure the collection registry exists.
    pub async fn open(pool: SqlitePool, timeout: Duration) -> Result<Self, StoreError> {
        let store = Self { pool, timeout };
        store
            .bounded(async { run_migrations(&store.pool).await.map_err(map_sqlx) })
            .await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    /// Check the registry: collection exists, has the expected kind and,
    /// if given, the vector matches its dimension.
    async fn check_collection(
        &self,
        spec: &CollectionSpec,
        vector: Option<&[f32]>,
    ) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT kind, dims FROM collections WHERE name = ?")
            .bind(&spec.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| StoreError::Rejected {
                status: 404,
                body: format!("collection '{}' not found", spec.name),
            })?;

        let kind: String = row.try_get("kind").map_err(map_sqlx)?;
        let dims: i64 = row.try_get("dims").map_err(map_sqlx)?;
        if kind != spec.kind.as_str() {
            return Err(StoreError::Rejected {
                status: 400,
                body: format!(
                    "collection '{}' is a {} collection, not {}",
                    spec.name,
                    kind,
                    spec.kind.as_str()
                ),
            });
        }
        if let Some(v) = vector {
            if v.len() as i64 != dims {
                return Err(StoreError::Rejected {
                    status: 400,
                    body: format!(
                        "collection '{}' expects {} dimensions, got {}",
                        spec.name,
                        dims,
                        v.len()
                    ),
                });
            }
        }
        Ok(())
    }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Malformed(e.to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    decode_f32_le(bytes)
        .ok_or_else(|| StoreError::Malformed(format!("vector blob of {} bytes", bytes.len())))
}

/// FTS5 query string for a lexical filter. Terms are alphanumeric, so
/// quoting each one is enough to neutralize FTS5 syntax.
pub fn fts_query(filter: &LexicalFilter) -> String {
    let joiner = match filter.mode {
        LexicalMode::All => " AND ",
        LexicalMode::Any => " OR ",
    };
    filter
        .terms
        .iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(joiner)
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        self.bounded(async {
            sqlx::query_scalar::<_, String>("SELECT name FROM collections ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)
        })
        .await
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        self.bounded(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

            let inserted = sqlx::query(
                r#"
                INSERT OR IGNORE INTO collections (name, kind, vector_name, dims, distance, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&spec.name)
            .bind(spec.kind.as_str())
            .bind(spec.vector_name)
            .bind(spec.dims as i64)
            .bind(spec.distance.as_str())
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .rows_affected();

            if inserted == 0 {
                return Err(StoreError::AlreadyExists(spec.name.clone()));
            }

            create_collection_tables(&mut *tx, spec)
                .await
                .map_err(map_sqlx)?;
            tx.commit().await.map_err(map_sqlx)?;
            Ok(())
        })
        .await
    }

    async fn insert_knowledge(
        &self,
        spec: &CollectionSpec,
        record: &Record<KnowledgeEntry>,
    ) -> Result<(), StoreError> {
        self.bounded(async {
            self.check_collection(spec, Some(&record.vector)).await?;
            let tags_json = serde_json::to_string(&record.payload.tags)
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            let id = record.id.to_string();

            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            sqlx::query(&format!(
                r#"INSERT INTO "{}" (id, vector, text, tags_json) VALUES (?, ?, ?, ?)"#,
                table_name(&spec.name)
            ))
            .bind(&id)
            .bind(encode_f32_le(&record.vector))
            .bind(&record.payload.text)
            .bind(&tags_json)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

            sqlx::query(&format!(
                r#"INSERT INTO "{}" (record_id, text) VALUES (?, ?)"#,
                fts_table_name(&spec.name)
            ))
            .bind(&id)
            .bind(&record.payload.text)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

            tx.commit().await.map_err(map_sqlx)
        })
        .await
    }

    async fn insert_toxic_image(
        &self,
        spec: &CollectionSpec,
        record: &Record<ToxicImage>,
    ) -> Result<(), StoreError> {
        self.bounded(async {
            self.check_collection(spec, Some(&record.vector)).await?;
            let id = record.id.to_string();

            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            sqlx::query(&format!(
                r#"INSERT INTO "{}" (id, vector, caption, label) VALUES (?, ?, ?, ?)"#,
                table_name(&spec.name)
            ))
            .bind(&id)
            .bind(encode_f32_le(&record.vector))
            .bind(&record.payload.caption)
            .bind(&record.payload.label)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

            sqlx::query(&format!(
                r#"INSERT INTO "{}" (record_id, caption) VALUES (?, ?)"#,
                fts_table_name(&spec.name)
            ))
            .bind(&id)
            .bind(&record.payload.caption)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

            tx.commit().await.map_err(map_sqlx)
        })
        .await
    }

    async fn insert_reputation(
        &self,
        spec: &CollectionSpec,
        record: &Record<ReputationEvent>,
    ) -> Result<(), StoreError> {
        self.bounded(async {
            self.check_collection(spec, Some(&record.vector)).await?;
            sqlx::query(&format!(
                r#"INSERT INTO "{}" (id, vector, user_id, toxicity_score, summary) VALUES (?, ?, ?, ?, ?)"#,
                table_name(&spec.name)
            ))
            .bind(record.id.to_string())
            .bind(encode_f32_le(&record.vector))
            .bind(&record.payload.user_id)
            .bind(record.payload.toxicity_score)
            .bind(&record.payload.summary)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
            Ok(())
        })
        .await
    }

    async fn scroll_reputation(
        &self,
        spec: &CollectionSpec,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ReputationEvent>, StoreError> {
        self.bounded(async {
            self.check_collection(spec, None).await?;
            let rows = sqlx::query(&format!(
                r#"SELECT user_id, toxicity_score, summary FROM "{}" WHERE user_id = ? ORDER BY rowid LIMIT ?"#,
                table_name(&spec.name)
            ))
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

            rows.iter()
                .map(|row| {
                    Ok(ReputationEvent {
                        user_id: row.try_get("user_id").map_err(map_sqlx)?,
                        toxicity_score: row.try_get("toxicity_score").map_err(map_sqlx)?,
                        summary: row.try_get("summary").map_err(map_sqlx)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn search_images(
        &self,
        spec: &CollectionSpec,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<ToxicImage>>, StoreError> {
        self.bounded(async {
            self.check_collection(spec, Some(vector)).await?;
            let rows = sqlx::query(&format!(
                r#"SELECT vector, caption, label FROM "{}" ORDER BY rowid"#,
                table_name(&spec.name)
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

            let mut hits = Vec::with_capacity(rows.len());
            for row in &rows {
                let blob: Vec<u8> = row.try_get("vector").map_err(map_sqlx)?;
                hits.push(Scored {
                    score: cosine_similarity(vector, &decode_vector(&blob)?),
                    payload: ToxicImage {
                        caption: row.try_get("caption").map_err(map_sqlx)?,
                        label: row.try_get("label").map_err(map_sqlx)?,
                    },
                });
            }
            hits.sort_by(|a, b| cmp_score_desc(a.score, b.score));
            hits.truncate(limit);
            Ok(hits)
        })
        .await
    }

    async fn search_knowledge(
        &self,
        spec: &CollectionSpec,
        query: &KnowledgeQuery<'_>,
    ) -> Result<Vec<Scored<KnowledgeEntry>>, StoreError> {
        self.bounded(async {
            self.check_collection(spec, query.vector).await?;
            let table = table_name(&spec.name);

            let rows = match &query.lexical {
                Some(filter) => {
                    sqlx::query(&format!(
                        r#"SELECT vector, text, tags_json FROM "{table}"
                           WHERE id IN (SELECT record_id FROM "{fts}" WHERE "{fts}" MATCH ?)
                           ORDER BY rowid"#,
                        fts = fts_table_name(&spec.name)
                    ))
                    .bind(fts_query(filter))
                    .fetch_all(&self.pool)
                    .await
                }
                None => {
                    sqlx::query(&format!(
                        r#"SELECT vector, text, tags_json FROM "{table}" ORDER BY rowid"#
                    ))
                    .fetch_all(&self.pool)
                    .await
                }
            }
            .map_err(map_sqlx)?;

            let mut hits = Vec::with_capacity(rows.len());
            for row in &rows {
                let tags_json: String = row.try_get("tags_json").map_err(map_sqlx)?;
                let tags: Vec<String> = serde_json::from_str(&tags_json)
                    .map_err(|e| StoreError::Malformed(format!("tags_json: {}", e)))?;
                let score = match query.vector {
                    Some(v) => {
                        let blob: Vec<u8> = row.try_get("vector").map_err(map_sqlx)?;
                        cosine_similarity(v, &decode_vector(&blob)?)
                    }
                    None => LEXICAL_MATCH_SCORE,
                };
                hits.push(Scored {
                    score,
                    payload: KnowledgeEntry {
                        text: row.try_get("text").map_err(map_sqlx)?,
                        tags,
                    },
                });
            }
            hits.sort_by(|a, b| cmp_score_desc(a.score, b.score));
            hits.truncate(query.limit);
            Ok(hits)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sentinelle_core::schema::{ensure_collections, Schema};
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> SqliteStore {
        let pool = db::connect(&tmp.path().join("test.sqlite"), Duration::from_secs(5))
            .await
            .unwrap();
        SqliteStore::open(pool, Duration::from_secs(5)).await.unwrap()
    }

    fn schema() -> Schema {
        Schema::new(3, 2)
    }

    fn kb(text: &str, v: [f32; 3]) -> Record<KnowledgeEntry> {
        Record::new(
            v.to_vec(),
            KnowledgeEntry {
                text: text.into(),
                tags: vec!["kb".into()],
            },
        )
    }

    #[tokio::test]
    async fn test_provisioning_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let schema = schema();

        assert_eq!(ensure_collections(&store, &schema).await.unwrap().len(), 3);
        assert!(ensure_collections(&store, &schema).await.unwrap().is_empty());

        let err = store.create_collection(&schema.knowledge).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.list_collections().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let schema = schema();
        {
            let store = open(&tmp).await;
            ensure_collections(&store, &schema).await.unwrap();
            let rec = Record::new(
                vec![1.0, 0.0, 0.0],
                ReputationEvent {
                    user_id: "user123".into(),
                    toxicity_score: 0.8,
                    summary: "Prior harassment reports in July.".into(),
                },
            );
            store.insert_reputation(&schema.reputation, &rec).await.unwrap();
            store.pool().close().await;
        }
        let store = open(&tmp).await;
        let events = store
            .scroll_reputation(&schema.reputation, "user123", 100)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].toxicity_score, 0.8);
        assert!(store
            .scroll_reputation(&schema.reputation, "user456", 100)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_knowledge_hybrid_and_lexical() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let schema = schema();
        ensure_collections(&store, &schema).await.unwrap();
        for rec in [
            kb("Threats, stalking, and doxxing are forms of GBV.", [1.0, 0.0, 0.0]),
            kb("Common obfuscations include leetspeak like r4pe.", [0.0, 1.0, 0.0]),
            kb("Helpline: contact local authorities.", [0.0, 0.0, 1.0]),
        ] {
            store.insert_knowledge(&schema.knowledge, &rec).await.unwrap();
        }

        let lexical = KnowledgeQuery {
            vector: None,
            lexical: LexicalFilter::from_text("Doxxing!", LexicalMode::All),
            limit: 5,
        };
        let hits = store.search_knowledge(&schema.knowledge, &lexical).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, LEXICAL_MATCH_SCORE);
        assert_eq!(hits[0].payload.tags, vec!["kb"]);

        let any = KnowledgeQuery {
            vector: Some(&[0.0, 0.0, 1.0]),
            lexical: LexicalFilter::from_text("leetspeak authorities", LexicalMode::Any),
            limit: 5,
        };
        let hits = store.search_knowledge(&schema.knowledge, &any).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].payload.text.starts_with("Helpline"));

        let all = KnowledgeQuery {
            vector: Some(&[0.0, 0.0, 1.0]),
            lexical: LexicalFilter::from_text("leetspeak authorities", LexicalMode::All),
            limit: 5,
        };
        assert!(store
            .search_knowledge(&schema.knowledge, &all)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_image_search_orders_and_limits() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let schema = schema();
        ensure_collections(&store, &schema).await.unwrap();
        for (v, caption) in [([0.0, 1.0], "far"), ([1.0, 0.0], "near"), ([0.7, 0.7], "mid")] {
            let rec = Record::new(
                v.to_vec(),
                ToxicImage {
                    caption: caption.into(),
                    label: "toxic".into(),
                },
            );
            store.insert_toxic_image(&schema.imagery, &rec).await.unwrap();
        }
        let hits = store.search_images(&schema.imagery, &[1.0, 0.0], 2).await.unwrap();
        let captions: Vec<_> = hits.iter().map(|h| h.payload.caption.as_str()).collect();
        assert_eq!(captions, vec!["near", "mid"]);
    }

    #[tokio::test]
    async fn test_rejects_missing_collection_and_wrong_dims() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let schema = schema();

        let err = store
            .scroll_reputation(&schema.reputation, "u", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 404, .. }));

        ensure_collections(&store, &schema).await.unwrap();
        let err = store
            .search_images(&schema.imagery, &[1.0, 0.0, 0.0], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_lexical_match_keeps_diacritics_like_memory_store() {
        use sentinelle_core::store::memory::InMemoryStore;

        let tmp = TempDir::new().unwrap();
        let sqlite = open(&tmp).await;
        let memory = InMemoryStore::new();
        let schema = schema();
        let rec = kb("Harassment outside the Café Lumière.", [1.0, 0.0, 0.0]);
        for store in [&sqlite as &dyn VectorStore, &memory] {
            ensure_collections(store, &schema).await.unwrap();
            store.insert_knowledge(&schema.knowledge, &rec).await.unwrap();
        }

        for (text, expected) in [("cafe", 0), ("CAFÉ lumière", 1)] {
            let query = KnowledgeQuery {
                vector: None,
                lexical: LexicalFilter::from_text(text, LexicalMode::All),
                limit: 5,
            };
            for store in [&sqlite as &dyn VectorStore, &memory] {
                let hits = store.search_knowledge(&schema.knowledge, &query).await.unwrap();
                assert_eq!(
                    hits.len(),
                    expected,
                    "{} on {}",
                    text,
                    store.backend_name()
                );
            }
        }
    }

    #[tokio::test]
    async fn test_collection_name_with_leading_digit() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let schema = Schema::with_names("1kb", "2-imagery", "3rep", 3, 2);

        assert_eq!(ensure_collections(&store, &schema).await.unwrap().len(), 3);
        store
            .insert_knowledge(&schema.knowledge, &kb("doxxing", [1.0, 0.0, 0.0]))
            .await
            .unwrap();
        let query = KnowledgeQuery {
            vector: None,
            lexical: LexicalFilter::from_text("doxxing", LexicalMode::All),
            limit: 5,
        };
        assert_eq!(
            store.search_knowledge(&schema.knowledge, &query).await.unwrap().len(),
            1
        );
    }

    #[test]
    fn test_fts_query_quotes_terms() {
        let all = LexicalFilter::from_text("r4pe OR doxxing", LexicalMode::All).unwrap();
        assert_eq!(fts_query(&all), r#""r4pe" AND "or" AND "doxxing""#);
        let any = LexicalFilter::from_text("a b", LexicalMode::Any).unwrap();
        assert_eq!(fts_query(&any), r#""a" OR "b""#);
    }
}
