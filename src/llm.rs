//! Generation backend and local fallback synthesis.
//!
//! The primary path is an HTTP chat-completion call with a bounded
//! timeout; every failure mode (non-2xx, timeout, non-JSON or empty
//! body) surfaces as [`PipelineError::BackendUnavailable`] so the
//! orchestrator can fall back to [`synthesize_fallback`] — a
//! deterministic, template-based answer assembled straight from the
//! context snapshot and clearly bannered as such.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::PipelineError;
use crate::models::{ContextSnapshot, Role};

/// Banner prepended to every locally synthesized answer. A fallback
/// answer must never be mistakable for a backend answer.
pub const FALLBACK_BANNER: &str =
    "⚠ The external model was unavailable. This answer was assembled directly from the case file.";

/// External LLM backend, consumed as an opaque network call.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn chat(
        &self,
        system_prompt: &str,
        history: &[(Role, String)],
        user_content: &str,
        model: &str,
    ) -> Result<String, PipelineError>;
}

/// Chat-completion backend over HTTP (JSON request/response).
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmBackend for HttpBackend {
    async fn chat(
        &self,
        system_prompt: &str,
        history: &[(Role, String)],
        user_content: &str,
        model: &str,
    ) -> Result<String, PipelineError> {
        let mut messages = vec![WireMessage {
            role: "system",
            content: system_prompt,
        }];
        for (role, content) in history {
            messages.push(WireMessage {
                role: match role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content,
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: user_content,
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "model": model, "messages": messages }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::BackendUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::BackendUnavailable(format!(
                "backend returned {status}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::BackendUnavailable(format!("malformed body: {e}")))?;
        parse_chat_response(&payload)
    }
}

fn parse_chat_response(payload: &Value) -> Result<String, PipelineError> {
    let text = payload["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .trim();
    if text.is_empty() {
        return Err(PipelineError::BackendUnavailable(
            "backend response contained no message content".to_string(),
        ));
    }
    Ok(text.to_string())
}

/// Deterministic local answer built from the snapshot fields.
pub fn synthesize_fallback(user_content: &str, snapshot: &ContextSnapshot) -> String {
    let mut out = String::new();
    out.push_str(FALLBACK_BANNER);
    out.push_str("\n\n");
    out.push_str(&format!("Question: {}\n", user_content.trim()));

    if !snapshot.relevant_chunks.is_empty() {
        out.push_str("\nMost relevant case material:\n");
        for chunk in snapshot.relevant_chunks.iter().take(3) {
            out.push_str(&format!(
                "- {} ({}): {}\n",
                chunk.document_title,
                chunk.category.as_str(),
                chunk.excerpt.replace('\n', " ")
            ));
        }
    }

    if !snapshot.active_norms.is_empty() {
        out.push_str("\nActive legal norms:\n");
        for norm in &snapshot.active_norms {
            out.push_str(&format!("- {norm}\n"));
        }
    }

    for (heading, body) in [
        ("Findings", &snapshot.findings_summary),
        ("Deadlines", &snapshot.deadline_summary),
        ("Contradictions", &snapshot.contradiction_summary),
        ("Evidence gaps", &snapshot.evidence_gap_summary),
    ] {
        if !body.trim().is_empty() {
            out.push_str(&format!("\n{heading}:\n{body}\n"));
        }
    }

    out.push_str("\nPlease retry later for a full model-generated analysis.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_snapshot() -> ContextSnapshot {
        ContextSnapshot {
            case_id: "case-1".into(),
            relevant_chunks: vec![],
            active_norms: vec!["§ 823 BGB".into(), "§ 280 BGB".into()],
            findings_summary: String::new(),
            deadline_summary: "1 deadline due within 7 days".into(),
            contradiction_summary: String::new(),
            contradiction_count: 0,
            evidence_gap_summary: String::new(),
            case_law_hits: vec![],
            collective_context: None,
            opponent_context: None,
            source_reliability_warnings: vec![],
            system_prompt: String::new(),
        }
    }

    #[test]
    fn fallback_is_bannered_and_carries_norms_verbatim() {
        let text = synthesize_fallback("Wer haftet?", &empty_snapshot());
        assert!(text.starts_with(FALLBACK_BANNER));
        assert!(text.contains("§ 823 BGB"));
        assert!(text.contains("§ 280 BGB"));
        assert!(text.contains("1 deadline due within 7 days"));
    }

    #[test]
    fn fallback_is_deterministic() {
        let snapshot = empty_snapshot();
        assert_eq!(
            synthesize_fallback("Wer haftet?", &snapshot),
            synthesize_fallback("Wer haftet?", &snapshot)
        );
    }

    #[test]
    fn malformed_payload_is_a_typed_backend_error() {
        let payload = serde_json::json!({ "unexpected": true });
        let err = parse_chat_response(&payload).unwrap_err();
        assert!(matches!(err, PipelineError::BackendUnavailable(_)));

        let empty = serde_json::json!({ "choices": [{ "message": { "content": "   " } }] });
        assert!(parse_chat_response(&empty).is_err());

        let ok = serde_json::json!({ "choices": [{ "message": { "content": "Antwort" } }] });
        assert_eq!(parse_chat_response(&ok).unwrap(), "Antwort");
    }
}
