//! LLM-backed decision step.
//!
//! [`LlmJudge`] sends the combined signal and the archivist context to an
//! OpenAI-compatible `/chat/completions` endpoint and parses the answer
//! with [`parse_verdict`]. It never fails: an unconfigured backend, an
//! unreachable one and an unparseable answer each map to a degraded
//! verdict with its own reason tag.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;

use sentinelle_core::models::{ArchivistContext, CombinedSignal};
use sentinelle_core::verdict::{
    excerpt, parse_verdict, DecisionBackend, DecisionInput, Verdict, REASON_INVALID_RESPONSE,
    REASON_NOT_CONFIGURED, REASON_UNAVAILABLE,
};

use crate::config::JudgeConfig;
use crate::retry::send_json_with_retry;

pub const SYSTEM_PROMPT: &str = "You moderate posts for online gender-based violence (OGBV). \
You receive a JSON object with the post text, its per-modality extractions (raw text, OCR, \
transcript) and moderation context: the author's prior history, similar known-toxic imagery \
and relevant knowledge-base entries. Weigh the context but judge the post itself. Watch for \
slang, leetspeak and deliberate misspellings, and do not flag ambiguous or clearly benign \
banter. Answer with compact JSON only, no prose: \
{\"is_gbv\": bool, \"severity\": integer 1-10, \"reason\": string, \"evidence\": [string]}.";

pub struct LlmJudge {
    config: JudgeConfig,
    api_key: Option<String>,
    client: OnceCell<reqwest::Client>,
}

impl LlmJudge {
    /// Read the API key from `config.api_key_env`. A disabled provider or an
    /// unset/empty variable leaves the judge unconfigured.
    pub fn new(config: JudgeConfig) -> Self {
        let api_key = if config.provider == "disabled" {
            None
        } else {
            std::env::var(&config.api_key_env).ok()
        };
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: JudgeConfig, api_key: Option<String>) -> Self {
        Self {
            config,
            api_key: api_key.filter(|k| !k.is_empty()),
            client: OnceCell::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn client(&self) -> anyhow::Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(Duration::from_secs(self.config.timeout_secs))
                    .build()
            })
            .await
            .map_err(Into::into)
    }

    async fn complete(&self, api_key: &str, input: &DecisionInput<'_>) -> anyhow::Result<serde_json::Value> {
        let client = self.client().await?;
        let body = build_chat_request(&self.config.model, self.config.temperature, input)?;
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        send_json_with_retry("LLM", self.config.max_retries, || {
            client.post(&url).bearer_auth(api_key).json(&body)
        })
        .await
    }
}

/// Chat-completions body: system prompt plus the decision input as JSON.
pub fn build_chat_request(
    model: &str,
    temperature: f32,
    input: &DecisionInput<'_>,
) -> serde_json::Result<serde_json::Value> {
    Ok(serde_json::json!({
        "model": model,
        "temperature": temperature,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": serde_json::to_string(input)? },
        ],
    }))
}

/// `choices[0].message.content`, if present.
pub fn extract_content(json: &serde_json::Value) -> Option<&str> {
    json.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

#[async_trait]
impl DecisionBackend for LlmJudge {
    async fn decide(&self, signal: &CombinedSignal, context: &ArchivistContext) -> Verdict {
        let Some(api_key) = self.api_key.as_deref() else {
            return Verdict::degraded(REASON_NOT_CONFIGURED, vec![]);
        };

        let input = DecisionInput::new(signal, context);
        let json = match self.complete(api_key, &input).await {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "decision backend unavailable");
                return Verdict::degraded(REASON_UNAVAILABLE, vec![excerpt(&e.to_string())]);
            }
        };

        match extract_content(&json) {
            Some(content) => parse_verdict(content),
            None => Verdict::degraded(REASON_INVALID_RESPONSE, vec![excerpt(&json.to_string())]),
        }
    }
}
