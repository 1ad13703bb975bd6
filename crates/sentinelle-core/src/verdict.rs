//! Decision step contract and verdict parsing.
//!
//! The decision backend is a black box: it receives a [`DecisionInput`] and
//! must answer with the verdict JSON shape
//!
//! ```json
//! { "is_gbv": true, "severity": 7, "reason": "...", "evidence": ["..."] }
//! ```
//!
//! It fails open. When the backend is unconfigured, unreachable or answers
//! with something unparseable, [`DecisionBackend::decide`] still returns a
//! verdict: `is_gbv = false`, `severity = 1`, `degraded = true`, and a
//! `reason` naming the degraded mode so operators can tell a real negative
//! from an outage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ArchivistContext, CombinedSignal, RawModalities};

/// Backend has no credentials or is disabled.
pub const REASON_NOT_CONFIGURED: &str = "LLM not configured";
/// Backend unreachable, timed out, or returned an error status.
pub const REASON_UNAVAILABLE: &str = "LLM unavailable";
/// Backend answered, but not with the verdict JSON shape.
pub const REASON_INVALID_RESPONSE: &str = "Invalid LLM response";

/// Maximum characters of a raw backend answer kept as evidence.
pub const EVIDENCE_EXCERPT_CHARS: usize = 200;

pub const MIN_SEVERITY: u8 = 1;
pub const MAX_SEVERITY: u8 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_gbv: bool,
    pub severity: u8,
    pub reason: String,
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl Verdict {
    /// Safe-default verdict tagged with a degraded-mode reason.
    pub fn degraded(reason: &str, evidence: Vec<String>) -> Self {
        Self {
            is_gbv: false,
            severity: MIN_SEVERITY,
            reason: reason.to_string(),
            evidence,
            degraded: true,
        }
    }
}

/// Payload sent to the decision backend.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionInput<'a> {
    pub user_id: &'a str,
    pub text: &'a str,
    pub raw: &'a RawModalities,
    pub archivist: &'a ArchivistContext,
}

impl<'a> DecisionInput<'a> {
    pub fn new(signal: &'a CombinedSignal, context: &'a ArchivistContext) -> Self {
        Self {
            user_id: &signal.user_id,
            text: &signal.combined_text,
            raw: &signal.raw,
            archivist: context,
        }
    }
}

/// Pluggable classifier. Infallible by contract.
#[async_trait]
pub trait DecisionBackend: Send + Sync {
    async fn decide(&self, signal: &CombinedSignal, context: &ArchivistContext) -> Verdict;
}

#[derive(Deserialize)]
struct WireVerdict {
    is_gbv: bool,
    severity: f64,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    evidence: Vec<String>,
}

/// Parse a backend answer into a [`Verdict`].
///
/// Accepts a bare JSON object or one wrapped in a markdown code fence.
/// Severity is rounded and clamped into `1..=10`. Anything else yields the
/// `"Invalid LLM response"` verdict carrying an excerpt of the raw answer.
pub fn parse_verdict(raw: &str) -> Verdict {
    let body = strip_code_fence(raw.trim());
    match serde_json::from_str::<WireVerdict>(body) {
        Ok(w) if w.severity.is_finite() => Verdict {
            is_gbv: w.is_gbv,
            severity: clamp_severity(w.severity),
            reason: w.reason,
            evidence: w.evidence,
            degraded: false,
        },
        _ => Verdict::degraded(REASON_INVALID_RESPONSE, vec![excerpt(raw.trim())]),
    }
}

fn clamp_severity(severity: f64) -> u8 {
    severity
        .round()
        .clamp(f64::from(MIN_SEVERITY), f64::from(MAX_SEVERITY)) as u8
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// First [`EVIDENCE_EXCERPT_CHARS`] characters of `s`.
pub fn excerpt(s: &str) -> String {
    s.chars().take(EVIDENCE_EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let v = parse_verdict(
            r#"{"is_gbv": true, "severity": 8, "reason": "targeted threat", "evidence": ["r4pe"]}"#,
        );
        assert!(v.is_gbv);
        assert_eq!(v.severity, 8);
        assert_eq!(v.evidence, vec!["r4pe"]);
        assert!(!v.degraded);
    }

    #[test]
    fn test_parse_fenced_json() {
        let v = parse_verdict("```json\n{\"is_gbv\": false, \"severity\": 2}\n```");
        assert!(!v.is_gbv);
        assert_eq!(v.severity, 2);
        assert!(v.reason.is_empty());
        assert!(!v.degraded);
    }

    #[test]
    fn test_severity_clamped() {
        assert_eq!(parse_verdict(r#"{"is_gbv":true,"severity":42}"#).severity, 10);
        assert_eq!(parse_verdict(r#"{"is_gbv":false,"severity":0}"#).severity, 1);
        assert_eq!(parse_verdict(r#"{"is_gbv":true,"severity":6.6}"#).severity, 7);
    }

    #[test]
    fn test_non_json_keeps_truncated_excerpt() {
        let raw = "I think this post is fine. ".repeat(20);
        let v = parse_verdict(&raw);
        assert!(!v.is_gbv);
        assert_eq!(v.severity, 1);
        assert_eq!(v.reason, REASON_INVALID_RESPONSE);
        assert!(v.degraded);
        assert_eq!(v.evidence.len(), 1);
        assert_eq!(v.evidence[0].chars().count(), EVIDENCE_EXCERPT_CHARS);
        assert!(raw.starts_with(&v.evidence[0]));
    }

    #[test]
    fn test_missing_required_field_is_invalid() {
        let v = parse_verdict(r#"{"severity": 3}"#);
        assert_eq!(v.reason, REASON_INVALID_RESPONSE);
    }

    #[test]
    fn test_degraded_flag_serialization() {
        let ok = parse_verdict(r#"{"is_gbv":false,"severity":1}"#);
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("degraded").is_none());

        let bad = Verdict::degraded(REASON_NOT_CONFIGURED, vec![]);
        let json = serde_json::to_value(&bad).unwrap();
        assert_eq!(json["degraded"], true);
        assert_eq!(json["evidence"], serde_json::json!([]));
    }
}
