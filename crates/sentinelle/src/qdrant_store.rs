//! Qdrant REST [`VectorStore`] implementation.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | list | `GET /collections` |
//! | create | `PUT /collections/{name}` then `PUT /collections/{name}/index` per payload index |
//! | ensure indexes | `PUT /collections/{name}/index` per payload index, once per process |
//! | insert | `PUT /collections/{name}/points?wait=true` |
//! | scroll | `POST /collections/{name}/points/scroll` |
//! | search | `POST /collections/{name}/points/search` |
//!
//! Collections use named vectors (`text`, `image`, `profile`). Lexical filters
//! become `match.text` conditions, one per term, under `must` (all) or
//! `should` (any).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use sentinelle_core::models::{KnowledgeEntry, Record, ReputationEvent, Scored, ToxicImage};
use sentinelle_core::schema::{CollectionSpec, PayloadIndex};
use sentinelle_core::store::{
    KnowledgeQuery, LexicalFilter, LexicalMode, VectorStore, LEXICAL_MATCH_SCORE,
};
use sentinelle_core::StoreError;

pub struct QdrantStore {
    http: Client,
    base_url: String,
    headers: HeaderMap,
    timeout: Duration,
    /// Collections whose payload indexes this process has confirmed.
    indexed: Mutex<HashSet<String>>,
}

impl QdrantStore {
    pub fn new(url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|e| StoreError::Unavailable(format!("invalid Qdrant API key: {}", e)))?;
            headers.insert(HeaderName::from_static("api-key"), value);
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            headers,
            timeout,
            indexed: Mutex::new(HashSet::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_transport(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }

    /// Send a request and return the body of a successful response.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<(StatusCode, String), StoreError> {
        let response = req
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        Ok((status, body))
    }

    async fn call(&self, req: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        let (status, body) = self.send(req).await?;
        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| StoreError::Malformed(e.to_string()))
    }

    /// Index PUTs are idempotent on the server side.
    async fn put_indexes(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        for index in &spec.indexes {
            let req = self
                .http
                .put(self.url(&format!("/collections/{}/index", spec.name)))
                .query(&[("wait", "true")])
                .json(&index_body(index));
            self.call(req).await?;
            tracing::debug!(collection = %spec.name, field = index.field(), "payload index ensured");
        }
        if let Ok(mut indexed) = self.indexed.lock() {
            indexed.insert(spec.name.clone());
        }
        Ok(())
    }

    fn is_indexed(&self, name: &str) -> bool {
        self.indexed
            .lock()
            .map(|indexed| indexed.contains(name))
            .unwrap_or(false)
    }

    async fn upsert<P: Serialize>(
        &self,
        spec: &CollectionSpec,
        record: &Record<P>,
    ) -> Result<(), StoreError> {
        let body = json!({ "points": [point_json(spec, record)] });
        let req = self
            .http
            .put(self.url(&format!("/collections/{}/points", spec.name)))
            .query(&[("wait", "true")])
            .json(&body);
        self.call(req).await?;
        Ok(())
    }

    async fn scroll<P: DeserializeOwned>(
        &self,
        spec: &CollectionSpec,
        filter: Value,
        limit: usize,
    ) -> Result<Vec<P>, StoreError> {
        let body = json!({
            "filter": filter,
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        let req = self
            .http
            .post(self.url(&format!("/collections/{}/points/scroll", spec.name)))
            .json(&body);
        parse_scroll(&self.call(req).await?)
    }

    async fn search<P: DeserializeOwned>(
        &self,
        spec: &CollectionSpec,
        vector: &[f32],
        filter: Option<Value>,
        limit: usize,
    ) -> Result<Vec<Scored<P>>, StoreError> {
        let mut body = json!({
            "vector": { "name": spec.vector_name, "vector": vector },
            "limit": limit,
            "with_payload": true,
        });
        if let Some(f) = filter {
            body["filter"] = f;
        }
        let req = self
            .http
            .post(self.url(&format!("/collections/{}/points/search", spec.name)))
            .json(&body);
        parse_search(&self.call(req).await?)
    }
}

/// Body of `PUT /collections/{name}`.
pub fn create_collection_body(spec: &CollectionSpec) -> Value {
    json!({
        "vectors": {
            spec.vector_name: {
                "size": spec.dims,
                "distance": spec.distance.as_str(),
            }
        }
    })
}

/// Body of `PUT /collections/{name}/index`.
pub fn index_body(index: &PayloadIndex) -> Value {
    match index {
        PayloadIndex::FullText { field } => json!({
            "field_name": field,
            "field_schema": {
                "type": "text",
                "tokenizer": "word",
                "lowercase": true,
            }
        }),
        PayloadIndex::Keyword { field } => json!({
            "field_name": field,
            "field_schema": "keyword",
        }),
    }
}

pub fn point_json<P: Serialize>(spec: &CollectionSpec, record: &Record<P>) -> Value {
    json!({
        "id": record.id.to_string(),
        "vector": { spec.vector_name: record.vector },
        "payload": record.payload,
    })
}

/// Full-text filter on `field`.
pub fn lexical_filter_json(field: &str, filter: &LexicalFilter) -> Value {
    let conditions: Vec<Value> = filter
        .terms
        .iter()
        .map(|t| json!({ "key": field, "match": { "text": t } }))
        .collect();
    match filter.mode {
        LexicalMode::All => json!({ "must": conditions }),
        LexicalMode::Any => json!({ "should": conditions }),
    }
}

pub fn user_filter_json(user_id: &str) -> Value {
    json!({ "must": [{ "key": "user_id", "match": { "value": user_id } }] })
}

/// A create that lost a race answers 409, or 400 with "already exists" on
/// older servers.
pub fn is_already_exists(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT
        || (status == StatusCode::BAD_REQUEST && body.contains("already exists"))
}

pub fn parse_collections(json: &Value) -> Result<Vec<String>, StoreError> {
    let collections = json
        .pointer("/result/collections")
        .and_then(|c| c.as_array())
        .ok_or_else(|| StoreError::Malformed("missing result.collections".into()))?;
    collections
        .iter()
        .map(|c| {
            c.get("name")
                .and_then(|n| n.as_str())
                .map(str::to_string)
                .ok_or_else(|| StoreError::Malformed("collection without name".into()))
        })
        .collect()
}

fn payload_of<P: DeserializeOwned>(item: &Value) -> Result<P, StoreError> {
    let payload = item
        .get("payload")
        .cloned()
        .ok_or_else(|| StoreError::Malformed("point without payload".into()))?;
    serde_json::from_value(payload).map_err(|e| StoreError::Malformed(e.to_string()))
}

pub fn parse_scroll<P: DeserializeOwned>(json: &Value) -> Result<Vec<P>, StoreError> {
    let points = json
        .pointer("/result/points")
        .and_then(|p| p.as_array())
        .ok_or_else(|| StoreError::Malformed("missing result.points".into()))?;
    points.iter().map(payload_of).collect()
}

pub fn parse_search<P: DeserializeOwned>(json: &Value) -> Result<Vec<Scored<P>>, StoreError> {
    let hits = json
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| StoreError::Malformed("missing result array".into()))?;
    hits.iter()
        .map(|h| {
            let score = h
                .get("score")
                .and_then(|s| s.as_f64())
                .ok_or_else(|| StoreError::Malformed("hit without score".into()))?;
            Ok(Scored {
                score: score as f32,
                payload: payload_of(h)?,
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend_name(&self) -> &str {
        "qdrant"
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let json = self.call(self.http.get(self.url("/collections"))).await?;
        parse_collections(&json)
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let req = self
            .http
            .put(self.url(&format!("/collections/{}", spec.name)))
            .json(&create_collection_body(spec));
        let (status, body) = self.send(req).await?;
        if is_already_exists(status, &body) {
            return Err(StoreError::AlreadyExists(spec.name.clone()));
        }
        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        self.put_indexes(spec).await
    }

    async fn ensure_indexes(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        if self.is_indexed(&spec.name) {
            return Ok(());
        }
        self.put_indexes(spec).await
    }

    async fn insert_knowledge(
        &self,
        spec: &CollectionSpec,
        record: &Record<KnowledgeEntry>,
    ) -> Result<(), StoreError> {
        self.upsert(spec, record).await
    }

    async fn insert_toxic_image(
        &self,
        spec: &CollectionSpec,
        record: &Record<ToxicImage>,
    ) -> Result<(), StoreError> {
        self.upsert(spec, record).await
    }

    async fn insert_reputation(
        &self,
        spec: &CollectionSpec,
        record: &Record<ReputationEvent>,
    ) -> Result<(), StoreError> {
        self.upsert(spec, record).await
    }

    async fn scroll_reputation(
        &self,
        spec: &CollectionSpec,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ReputationEvent>, StoreError> {
        self.scroll(spec, user_filter_json(user_id), limit).await
    }

    async fn search_images(
        &self,
        spec: &CollectionSpec,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<ToxicImage>>, StoreError> {
        self.search(spec, vector, None, limit).await
    }

    async fn search_knowledge(
        &self,
        spec: &CollectionSpec,
        query: &KnowledgeQuery<'_>,
    ) -> Result<Vec<Scored<KnowledgeEntry>>, StoreError> {
        let filter = query
            .lexical
            .as_ref()
            .map(|f| lexical_filter_json("text", f));
        match (query.vector, filter) {
            (Some(v), filter) => self.search(spec, v, filter, query.limit).await,
            (None, Some(filter)) => {
                let entries: Vec<KnowledgeEntry> = self.scroll(spec, filter, query.limit).await?;
                Ok(entries
                    .into_iter()
                    .map(|payload| Scored {
                        score: LEXICAL_MATCH_SCORE,
                        payload,
                    })
                    .collect())
            }
            (None, None) => Ok(Vec::new()),
        }
    }
}
