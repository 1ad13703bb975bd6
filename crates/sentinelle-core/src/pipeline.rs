//! Moderation orchestrator.
//!
//! One run is linear: ensure collections, extract the signal, gather context
//! (three concurrent retrievals), decide. A run either produces a complete
//! [`ModerationReport`] or fails with [`Error::StoreUnavailable`]; a verdict
//! is never computed from a partial context.

use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use crate::archivist::Archivist;
use crate::error::Result;
use crate::models::{ArchivistContext, CombinedSignal, ModerationRequest};
use crate::signal::SignalExtractor;
use crate::verdict::{DecisionBackend, Verdict};

/// Full output of one moderation run.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationReport {
    /// Human-readable trace, in execution order.
    pub steps: Vec<String>,
    /// Extracted modalities and the combined text.
    pub observed: CombinedSignal,
    pub archivist: ArchivistContext,
    pub verdict: Verdict,
}

#[derive(Clone)]
pub struct Pipeline {
    archivist: Archivist,
    extractor: Arc<dyn SignalExtractor>,
    judge: Arc<dyn DecisionBackend>,
}

impl Pipeline {
    pub fn new(
        archivist: Archivist,
        extractor: Arc<dyn SignalExtractor>,
        judge: Arc<dyn DecisionBackend>,
    ) -> Self {
        Self {
            archivist,
            extractor,
            judge,
        }
    }

    pub async fn run(&self, request: &ModerationRequest) -> Result<ModerationReport> {
        let span = tracing::info_span!("moderate", user_id = %request.user_id);
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: &ModerationRequest) -> Result<ModerationReport> {
        self.archivist.ensure_collections().await?;

        let signal = self.extractor.extract(request).await;
        let mut steps = Vec::with_capacity(7);

        steps.push(
            if request.image.is_some() {
                "Image analyzed."
            } else {
                "No image provided."
            }
            .to_string(),
        );
        steps.push(
            if signal.raw.ocr_text.is_empty() {
                "No OCR text."
            } else {
                "OCR text extracted."
            }
            .to_string(),
        );
        steps.push(
            if signal.raw.asr_text.is_empty() {
                "No audio provided or transcription."
            } else {
                "Audio transcribed."
            }
            .to_string(),
        );

        let context = self.archivist.gather_context(&signal).await?;
        steps.push(format!(
            "Memory: user history fetched ({} flags).",
            context.history.flags
        ));
        steps.push(format!(
            "Memory: {} similar imagery hits.",
            context.image_similarity.matches.len()
        ));
        steps.push(format!(
            "Memory: {} KB context hits.",
            context.text_context.len()
        ));

        let verdict = self.judge.decide(&signal, &context).await;
        if verdict.degraded {
            tracing::warn!(reason = %verdict.reason, "DecisionDegraded: safe default verdict");
            steps.push(format!(
                "Final verdict computed (degraded: {}).",
                verdict.reason
            ));
        } else {
            tracing::info!(
                is_gbv = verdict.is_gbv,
                severity = verdict.severity,
                "verdict computed"
            );
            steps.push("Final verdict computed.".to_string());
        }

        Ok(ModerationReport {
            steps,
            observed: signal,
            archivist: context,
            verdict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archivist::RetrievalParams;
    use crate::error::StoreError;
    use crate::models::{
        KnowledgeEntry, RawModalities, Record, ReputationEvent, Scored, SignalVectors, ToxicImage,
    };
    use crate::schema::{CollectionSpec, Schema};
    use crate::signal::combine_texts;
    use crate::store::memory::InMemoryStore;
    use crate::store::{KnowledgeQuery, VectorStore};
    use crate::verdict::{parse_verdict, REASON_NOT_CONFIGURED};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns text as-is, "ocr" text when an image is present, and a fixed
    /// unit vector for each present modality.
    struct FakeExtractor;

    #[async_trait]
    impl SignalExtractor for FakeExtractor {
        async fn extract(&self, request: &ModerationRequest) -> CombinedSignal {
            let text = request.text.clone().unwrap_or_default();
            let ocr_text = if request.image.is_some() {
                "block this".to_string()
            } else {
                String::new()
            };
            let combined_text = combine_texts(&text, &ocr_text, "");
            CombinedSignal {
                user_id: request.user_id.clone(),
                vectors: SignalVectors {
                    text: (!combined_text.is_empty()).then(|| vec![1.0, 0.0, 0.0]),
                    image: request.image.as_ref().map(|_| vec![1.0, 0.0]),
                },
                raw: RawModalities {
                    text,
                    ocr_text,
                    asr_text: String::new(),
                },
                combined_text,
            }
        }
    }

    /// Records the context it was given and answers with a canned string.
    struct FakeJudge {
        answer: Option<&'static str>,
        seen: Mutex<Option<ArchivistContext>>,
    }

    impl FakeJudge {
        fn answering(answer: &'static str) -> Self {
            Self {
                answer: Some(answer),
                seen: Mutex::new(None),
            }
        }

        fn unconfigured() -> Self {
            Self {
                answer: None,
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl DecisionBackend for FakeJudge {
        async fn decide(&self, _signal: &CombinedSignal, context: &ArchivistContext) -> Verdict {
            *self.seen.lock().unwrap() = Some(context.clone());
            match self.answer {
                Some(raw) => parse_verdict(raw),
                None => Verdict::degraded(REASON_NOT_CONFIGURED, vec![]),
            }
        }
    }

    async fn pipeline_with(judge: Arc<FakeJudge>) -> Pipeline {
        let store = Arc::new(InMemoryStore::new());
        let archivist = Archivist::new(store, Schema::new(3, 2), RetrievalParams::default());
        archivist.ensure_collections().await.unwrap();
        archivist
            .upsert_user_profile("user123", vec![1.0, 0.0, 0.0], 0.8, "Prior harassment reports in July.")
            .await
            .unwrap();
        archivist
            .upsert_kb(
                "Threats, stalking, and doxxing are forms of GBV.",
                vec![0.9, 0.1, 0.0],
                vec!["kb".into()],
            )
            .await
            .unwrap();
        archivist
            .upsert_toxic_image(vec![1.0, 0.0], "seed:a.png", "toxic")
            .await
            .unwrap();
        Pipeline::new(archivist, Arc::new(FakeExtractor), judge)
    }

    #[tokio::test]
    async fn test_trace_for_text_only_post() {
        let judge = Arc::new(FakeJudge::answering(
            r#"{"is_gbv":true,"severity":7,"reason":"stalking threat","evidence":["stalking"]}"#,
        ));
        let p = pipeline_with(judge.clone()).await;
        let report = p
            .run(&ModerationRequest {
                user_id: "user123".into(),
                text: Some("stalking and doxxing".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            report.steps,
            vec![
                "No image provided.",
                "No OCR text.",
                "No audio provided or transcription.",
                "Memory: user history fetched (1 flags).",
                "Memory: 0 similar imagery hits.",
                "Memory: 1 KB context hits.",
                "Final verdict computed.",
            ]
        );
        assert!(report.verdict.is_gbv);
        assert_eq!(report.verdict.severity, 7);
        assert_eq!(report.archivist.history.toxicity_score, 0.8);
        assert_eq!(judge.seen.lock().unwrap().as_ref(), Some(&report.archivist));
    }

    #[tokio::test]
    async fn test_image_only_post_uses_ocr_text() {
        let p = pipeline_with(Arc::new(FakeJudge::unconfigured())).await;
        let report = p
            .run(&ModerationRequest {
                user_id: "user999".into(),
                image: Some(vec![0x89, b'P', b'N', b'G']),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(report.steps[0], "Image analyzed.");
        assert_eq!(report.steps[1], "OCR text extracted.");
        assert_eq!(report.observed.combined_text, "block this");
        assert_eq!(report.archivist.history.flags, 0);
        assert_eq!(report.archivist.image_similarity.matches.len(), 1);
        assert_eq!(
            report.steps.last().map(String::as_str),
            Some("Final verdict computed (degraded: LLM not configured).")
        );
        assert!(!report.verdict.is_gbv);
        assert_eq!(report.verdict.severity, 1);
    }

    #[tokio::test]
    async fn test_unparseable_answer_is_degraded_not_error() {
        let p = pipeline_with(Arc::new(FakeJudge::answering("sorry, I cannot help"))).await;
        let report = p
            .run(&ModerationRequest {
                user_id: "user123".into(),
                text: Some("hello".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(report.verdict.degraded);
        assert_eq!(report.verdict.evidence, vec!["sorry, I cannot help"]);
    }

    /// Provisioning works, every read fails.
    struct ReadsFail(InMemoryStore);

    #[async_trait]
    impl VectorStore for ReadsFail {
        fn backend_name(&self) -> &str {
            "reads-fail"
        }
        async fn list_collections(&self) -> std::result::Result<Vec<String>, StoreError> {
            self.0.list_collections().await
        }
        async fn create_collection(
            &self,
            spec: &CollectionSpec,
        ) -> std::result::Result<(), StoreError> {
            self.0.create_collection(spec).await
        }
        async fn insert_knowledge(
            &self,
            spec: &CollectionSpec,
            record: &Record<KnowledgeEntry>,
        ) -> std::result::Result<(), StoreError> {
            self.0.insert_knowledge(spec, record).await
        }
        async fn insert_toxic_image(
            &self,
            spec: &CollectionSpec,
            record: &Record<ToxicImage>,
        ) -> std::result::Result<(), StoreError> {
            self.0.insert_toxic_image(spec, record).await
        }
        async fn insert_reputation(
            &self,
            spec: &CollectionSpec,
            record: &Record<ReputationEvent>,
        ) -> std::result::Result<(), StoreError> {
            self.0.insert_reputation(spec, record).await
        }
        async fn scroll_reputation(
            &self,
            _spec: &CollectionSpec,
            _user_id: &str,
            _limit: usize,
        ) -> std::result::Result<Vec<ReputationEvent>, StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
        async fn search_images(
            &self,
            _spec: &CollectionSpec,
            _vector: &[f32],
            _limit: usize,
        ) -> std::result::Result<Vec<Scored<ToxicImage>>, StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
        async fn search_knowledge(
            &self,
            _spec: &CollectionSpec,
            _query: &KnowledgeQuery<'_>,
        ) -> std::result::Result<Vec<Scored<KnowledgeEntry>>, StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_aborts_before_decision() {
        let judge = Arc::new(FakeJudge::unconfigured());
        let archivist = Archivist::new(
            Arc::new(ReadsFail(InMemoryStore::new())),
            Schema::new(3, 2),
            RetrievalParams::default(),
        );
        let p = Pipeline::new(archivist, Arc::new(FakeExtractor), judge.clone());
        let err = p
            .run(&ModerationRequest {
                user_id: "user123".into(),
                text: Some("hello".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(judge.seen.lock().unwrap().is_none());
    }
}
