//! Per-message pipeline orchestration.
//!
//! One [`Orchestrator::handle_message`] call drives the full stage
//! sequence — credit check, context assembly, retrieval reporting,
//! memory lookup, optional approval gate, generation, reasoning chain,
//! confidence scoring — and records each stage as a [`ToolCall`] on the
//! assistant message. The message is republished through the store
//! after every stage so polling consumers watch progress live; each
//! republished revision is monotonically more complete.
//!
//! High-risk requests suspend at the approval gate: the run state is
//! parked as a [`PendingRun`] and [`Orchestrator::resolve_approval`]
//! later resumes generation from the very snapshot that was assembled
//! before suspension. Nothing is retrieved twice and quota is only
//! consumed after a successful external generation.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::citations;
use crate::collab::{Collaborators, CreditKind, QuotaService};
use crate::config::Config;
use crate::context::ContextAssembler;
use crate::error::PipelineError;
use crate::llm::{self, LlmBackend};
use crate::models::{
    ApprovalField, ApprovalRequest, AssistMode, ChatMessage, ContextSnapshot, Jurisdiction,
    MessageStatus, PendingRun, RetrievalHint, RiskLevel, Role, ToolCall, ToolCallName,
};
use crate::quota::{QuotaDecision, QuotaGate, QuotaReservation};
use crate::store::Store;

/// One incoming user turn, with the routing identifiers the pipeline
/// needs but never interprets.
#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub session_id: String,
    pub case_id: String,
    pub workspace_id: String,
    pub account_id: String,
    pub content: String,
    pub mode: Option<AssistMode>,
    pub jurisdiction: Option<Jurisdiction>,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    assembler: ContextAssembler,
    quota: QuotaGate,
    backend: Option<Arc<dyn LlmBackend>>,
    collaborators: Collaborators,
    config: Config,
    pending: Mutex<HashMap<String, PendingRun>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        quota_service: Arc<dyn QuotaService>,
        backend: Option<Arc<dyn LlmBackend>>,
        collaborators: Collaborators,
        config: Config,
    ) -> Self {
        let assembler =
            ContextAssembler::new(store.clone(), collaborators.clone(), config.clone());
        let quota = QuotaGate::new(quota_service, config.quota.cache_ttl_secs);
        Self {
            store,
            assembler,
            quota,
            backend,
            collaborators,
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Run the pipeline for one user message. Returns the assistant
    /// message in its final state — `Complete`, or still carrying an
    /// `AwaitingApproval` tool call when the run suspended.
    pub async fn handle_message(&self, request: MessageRequest) -> Result<ChatMessage> {
        let started = Utc::now();

        let mut user = ChatMessage::new(&request.session_id, Role::User, &request.content);
        user.status = MessageStatus::Complete;
        self.store.append_message(&user).await?;

        let mut message = ChatMessage::new(&request.session_id, Role::Assistant, "");
        self.store.append_message(&message).await?;

        // Too little to work with: answer cheaply, no tool calls, no
        // quota touched.
        if let Some(clarification) = clarification_for(&request.content) {
            message.content = clarification;
            message.status = MessageStatus::Complete;
            message.duration_ms = Some((Utc::now() - started).num_milliseconds());
            self.store.update_message(&message).await?;
            return Ok(message);
        }

        let command = SlashCommand::parse(&request.content);
        let credit_kind = if matches!(command, Some(SlashCommand::Draft))
            || matches!(request.mode, Some(AssistMode::DraftPleading))
        {
            CreditKind::DocumentDraft
        } else {
            CreditKind::Chat
        };

        // Stage: credit_check. A denial is a terminal answer, not an
        // error; the denial text is shown to the user verbatim.
        let mut call = ToolCall::start(
            ToolCallName::CreditCheck,
            format!("kind={}", credit_kind.as_str()),
        );
        let reservation = match self
            .quota
            .check_and_reserve(&request.account_id, credit_kind, 1.0)
            .await?
        {
            QuotaDecision::Allowed(reservation) => {
                call.complete(if reservation.deductions.is_empty() {
                    "allowed (no quota product purchased)".to_string()
                } else {
                    format!("reserved across {} pool(s)", reservation.deductions.len())
                });
                message.tool_calls.push(call);
                self.store.update_message(&message).await?;
                reservation
            }
            QuotaDecision::Denied(denied) => {
                call.fail(PipelineError::QuotaExceeded(denied.clone()).to_string());
                message.tool_calls.push(call);
                message.content = denied;
                message.status = MessageStatus::Complete;
                message.duration_ms = Some((Utc::now() - started).num_milliseconds());
                self.store.update_message(&message).await?;
                info!(account_id = %request.account_id, "message stopped at credit check");
                return Ok(message);
            }
        };

        // Stage: build_context.
        let hint = RetrievalHint {
            mode: request.mode,
            jurisdiction: request.jurisdiction,
        };
        let mut call = ToolCall::start(
            ToolCallName::BuildContext,
            format!("case={}", request.case_id),
        );
        let snapshot = match self
            .assembler
            .build(&request.case_id, &request.content, hint, Utc::now())
            .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                call.fail(err.to_string());
                message.tool_calls.push(call);
                message.content =
                    "An internal error occurred while preparing the case context.".to_string();
                message.status = MessageStatus::Complete;
                self.store.update_message(&message).await?;
                return Err(err);
            }
        };
        call.complete(format!(
            "{} excerpts, {} norms, {} contradictions",
            snapshot.relevant_chunks.len(),
            snapshot.active_norms.len(),
            snapshot.contradiction_count
        ));
        message.tool_calls.push(call);
        self.store.update_message(&message).await?;

        // Stage: search_chunks — only reported when retrieval found
        // anything to report.
        if !snapshot.relevant_chunks.is_empty() {
            let mut call = ToolCall::start(
                ToolCallName::SearchChunks,
                truncate_chars(&request.content, 80),
            );
            for chunk in snapshot.relevant_chunks.iter().take(5) {
                call.detail_lines.push(format!(
                    "{} ({:.2})",
                    chunk.document_title, chunk.relevance_score
                ));
            }
            call.complete(format!("{} relevant excerpts", snapshot.relevant_chunks.len()));
            message.tool_calls.push(call);
            self.store.update_message(&message).await?;
        }

        // Stage: collective_intelligence — only when the side channel
        // contributed.
        if snapshot.collective_context.is_some() || !snapshot.case_law_hits.is_empty() {
            let mut call = ToolCall::start(ToolCallName::CollectiveIntelligence, "comparable matters");
            call.complete(format!(
                "{} case-law hits{}",
                snapshot.case_law_hits.len(),
                if snapshot.collective_context.is_some() {
                    ", insights attached"
                } else {
                    ""
                }
            ));
            message.tool_calls.push(call);
            self.store.update_message(&message).await?;
        }

        // Stage: memory_lookup.
        let mut call = ToolCall::start(ToolCallName::MemoryLookup, format!("session={}", request.session_id));
        let history = self
            .conversation_history(&request.session_id, &user.id, &message.id)
            .await?;
        call.complete(format!("{} prior turns", history.len()));
        message.tool_calls.push(call);
        self.store.update_message(&message).await?;

        // Stage: approval_gate — suspend instead of generating when the
        // message asks for an action with external effect.
        if let Some(approval) = classify_high_risk(&request.content, command) {
            let mut call = ToolCall::start(
                ToolCallName::ApprovalGate,
                truncate_chars(&request.content, 80),
            );
            call.suspend_for_approval(approval);
            let tool_call_id = call.id.clone();
            message.tool_calls.push(call);

            // The run must be resolvable the moment the suspended
            // message becomes visible, so park it before publishing.
            let run = PendingRun {
                tool_call_id: tool_call_id.clone(),
                session_id: request.session_id.clone(),
                case_id: request.case_id.clone(),
                workspace_id: request.workspace_id.clone(),
                account_id: request.account_id.clone(),
                model: self.config.generation.model.clone(),
                snapshot,
                history,
                message_id: message.id.clone(),
                started_at: started,
                original_content: request.content.clone(),
                reservation,
            };
            self.pending.lock().await.insert(tool_call_id, run);
            self.store.update_message(&message).await?;
            info!(message_id = %message.id, "pipeline suspended for approval");
            return Ok(message);
        }

        self.finish_generation(
            message,
            &snapshot,
            &history,
            &request.content,
            &self.config.generation.model,
            &reservation,
            started,
        )
        .await
    }

    /// Resolve a suspended approval. Returns `Ok(None)` when no run is
    /// pending under this tool-call id — the decision already arrived
    /// through another caller, or the id never existed. The pending run
    /// is removed atomically, so exactly one concurrent decision wins.
    pub async fn resolve_approval(
        &self,
        tool_call_id: &str,
        approved: bool,
        edited_fields: &[ApprovalField],
    ) -> Result<Option<ChatMessage>> {
        let run = match self.pending.lock().await.remove(tool_call_id) {
            Some(run) => run,
            None => {
                debug!(tool_call_id, "no pending run for approval decision");
                return Ok(None);
            }
        };

        let messages = self.store.get_chat_messages(&run.session_id).await?;
        let Some(mut message) = messages.into_iter().find(|m| m.id == run.message_id) else {
            warn!(message_id = %run.message_id, "pending run points at a missing message");
            return Ok(None);
        };

        let request_fields = {
            let Some(call) = message.tool_calls.iter_mut().find(|c| c.id == tool_call_id) else {
                warn!(tool_call_id, "pending run points at a missing tool call");
                return Ok(None);
            };
            if !approved {
                call.cancel("rejected by user");
                message.content =
                    "The requested action was not carried out. Nothing was sent or finalized."
                        .to_string();
                message.status = MessageStatus::Complete;
                message.duration_ms = Some((Utc::now() - run.started_at).num_milliseconds());
                self.store.update_message(&message).await?;
                return Ok(Some(message));
            }
            let fields = call
                .approval_request
                .as_ref()
                .map(|r| r.fields.clone())
                .unwrap_or_default();
            call.complete("approved by user");
            fields
        };
        self.store.update_message(&message).await?;

        // Edited values take precedence over the pre-filled ones;
        // unknown keys are carried along.
        let mut merged = request_fields;
        for edited in edited_fields {
            if let Some(slot) = merged.iter_mut().find(|f| f.key == edited.key) {
                slot.value = edited.value.clone();
            } else {
                merged.push(edited.clone());
            }
        }
        let mut content = run.original_content.clone();
        let detail_lines: Vec<String> = merged
            .iter()
            .filter(|f| !f.value.trim().is_empty())
            .map(|f| format!("- {}: {}", f.label, f.value.trim()))
            .collect();
        if !detail_lines.is_empty() {
            content.push_str("\n\nApproved details:\n");
            content.push_str(&detail_lines.join("\n"));
        }

        let message = self
            .finish_generation(
                message,
                &run.snapshot,
                &run.history,
                &content,
                &run.model,
                &run.reservation,
                run.started_at,
            )
            .await?;
        Ok(Some(message))
    }

    /// Generation tail shared by the straight-through and the resumed
    /// path: generate, stream out, record reasoning, extract citations,
    /// score confidence, commit quota.
    #[allow(clippy::too_many_arguments)]
    async fn finish_generation(
        &self,
        mut message: ChatMessage,
        snapshot: &ContextSnapshot,
        history: &[(Role, String)],
        user_content: &str,
        model: &str,
        reservation: &QuotaReservation,
        started: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        // Stage: generate. Backend failures never fail the message —
        // the local fallback always produces an answer.
        let mut call = ToolCall::start(ToolCallName::Generate, format!("model={model}"));
        let (text, external) = match &self.backend {
            Some(backend) => {
                match backend
                    .chat(&snapshot.system_prompt, history, user_content, model)
                    .await
                {
                    Ok(text) => (text, true),
                    Err(err) => {
                        warn!(error = %err, "generation backend unavailable, using local fallback");
                        (llm::synthesize_fallback(user_content, snapshot), false)
                    }
                }
            }
            None => (llm::synthesize_fallback(user_content, snapshot), false),
        };
        call.complete(if external {
            "external model answer"
        } else {
            "local fallback answer"
        });
        message.tool_calls.push(call);
        self.store.update_message(&message).await?;

        // Stream the answer out in fixed-size slices; each republish
        // strictly extends the previous one.
        let chars: Vec<char> = text.chars().collect();
        let slice = self.config.generation.stream_slice_chars.max(1);
        let mut published = 0;
        while published < chars.len() {
            published = (published + slice).min(chars.len());
            message.content = chars[..published].iter().collect();
            message.status = MessageStatus::Streaming;
            self.store.update_message(&message).await?;
        }
        message.content = text.clone();

        // Stage: reasoning_chain.
        let mut call = ToolCall::start(ToolCallName::ReasoningChain, "");
        call.detail_lines.push(format!(
            "{} case material excerpts considered",
            snapshot.relevant_chunks.len()
        ));
        call.detail_lines
            .push(format!("{} active norms in force", snapshot.active_norms.len()));
        if snapshot.contradiction_count > 0 {
            call.detail_lines.push(format!(
                "{} contradictions flagged in the material",
                snapshot.contradiction_count
            ));
        }
        if snapshot.collective_context.is_some() {
            call.detail_lines
                .push("insights from comparable matters consulted".to_string());
        }
        call.detail_lines.push(
            if external {
                "answer produced by the external model"
            } else {
                "answer assembled locally from the case file"
            }
            .to_string(),
        );
        call.complete("reasoning recorded");
        message.tool_calls.push(call);
        self.store.update_message(&message).await?;

        // Stage: confidence_score.
        let mut call = ToolCall::start(ToolCallName::ConfidenceScore, "");
        let findings = self.store.get_findings(&snapshot.case_id).await?;
        message.source_citations =
            citations::extract_source_citations(&text, &snapshot.relevant_chunks);
        message.norm_citations =
            citations::extract_norm_citations(&text, self.collaborators.norm_lookup.as_ref())
                .await;
        message.finding_citations = citations::extract_finding_citations(&text, &findings);
        let confidence = citations::score_confidence(
            snapshot,
            &message.source_citations,
            &message.norm_citations,
        );
        call.complete(format!(
            "score {:.2}, {} warning(s)",
            confidence.score,
            confidence.warnings.len()
        ));
        message.confidence = Some(confidence);
        message.tool_calls.push(call);
        self.store.update_message(&message).await?;

        message.token_count = Some(text.split_whitespace().count());
        message.duration_ms = Some((Utc::now() - started).num_milliseconds());
        message.status = MessageStatus::Complete;
        self.store.update_message(&message).await?;

        // A fallback answer is free; only a real backend answer
        // consumes quota. The commit runs after the terminal publish
        // and never fails the message — the answer was already
        // delivered, a metering outage only loses the deduction.
        if external {
            if let Err(err) = self.quota.commit(reservation).await {
                warn!(error = %err, "quota commit failed after delivered answer");
            }
        }
        Ok(message)
    }

    /// Completed prior turns of the session, oldest first, capped to
    /// the configured window. The two messages of the current turn are
    /// excluded.
    async fn conversation_history(
        &self,
        session_id: &str,
        user_message_id: &str,
        assistant_message_id: &str,
    ) -> Result<Vec<(Role, String)>> {
        let messages = self.store.get_chat_messages(session_id).await?;
        let mut history: Vec<(Role, String)> = messages
            .into_iter()
            .filter(|m| {
                m.id != user_message_id
                    && m.id != assistant_message_id
                    && m.status == MessageStatus::Complete
                    && !m.content.trim().is_empty()
            })
            .map(|m| (m.role, m.content))
            .collect();
        let window = self.config.generation.history_turns;
        if history.len() > window {
            history.drain(..history.len() - window);
        }
        Ok(history)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlashCommand {
    Draft,
    Send,
    Finalize,
}

impl SlashCommand {
    fn parse(content: &str) -> Option<Self> {
        let first = content.trim().split_whitespace().next()?;
        match first.to_lowercase().as_str() {
            "/draft" => Some(Self::Draft),
            "/send" => Some(Self::Send),
            "/finalize" => Some(Self::Finalize),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Draft => "draft a document",
            Self::Send => "send a document",
            Self::Finalize => "finalize a document",
        }
    }
}

/// A message the pipeline cannot act on gets a cheap clarification
/// answer instead of a full run.
fn clarification_for(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.starts_with('/') {
        return None;
    }
    if trimmed.is_empty() || crate::text::tokenize(trimmed).len() < 2 {
        return Some(
            "Could you describe in a bit more detail what you need? For example name the \
             document, the deadline, or the legal question you want assessed."
                .to_string(),
        );
    }
    None
}

fn high_risk_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(send|submit|serve|publish|finalize|delete|create|generate|draft)\b|\b(sende|senden|versende|versenden|verschicke|verschicken|übermittle|übermitteln|einreichen|finalisiere|finalisieren|lösche|löschen|veröffentliche|veröffentlichen|erstelle|erstellen|entwerfe|entwerfen|generiere|generieren)\b|reiche\s+\S+\s+ein\b",
        )
        .unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

/// Decide whether the message asks for an action with external effect.
/// Slash commands are always gated; free text is gated when it matches
/// an outbound-action verb.
fn classify_high_risk(content: &str, command: Option<SlashCommand>) -> Option<ApprovalRequest> {
    let action = match command {
        Some(cmd) => cmd.label().to_string(),
        None => {
            let matched = high_risk_pattern().find(content)?;
            format!("{} (detected in the request)", matched.as_str().to_lowercase())
        }
    };
    let wants_send = matches!(command, Some(SlashCommand::Send))
        || content.to_lowercase().contains("send")
        || content.to_lowercase().contains("sende")
        || content.to_lowercase().contains("verschicke");

    Some(ApprovalRequest {
        title: "Confirm outbound action".to_string(),
        description: "The message asks for an action with external effect. Review the details \
                      before the pipeline continues."
            .to_string(),
        risk_level: RiskLevel::High,
        fields: vec![
            ApprovalField {
                key: "action".to_string(),
                label: "Action".to_string(),
                value: action,
                required: true,
            },
            ApprovalField {
                key: "recipient".to_string(),
                label: "Recipient".to_string(),
                value: String::new(),
                required: wants_send,
            },
            ApprovalField {
                key: "instructions".to_string(),
                label: "Instructions".to_string(),
                value: content.trim().to_string(),
                required: false,
            },
        ],
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_get_a_clarification() {
        assert!(clarification_for("   ").is_some());
        assert!(clarification_for("Hallo").is_some());
        assert!(clarification_for("Wie stehen die Chancen der Klage wegen der Mietmängel?").is_none());
        // Slash commands are never clarified away.
        assert!(clarification_for("/draft").is_none());
    }

    #[test]
    fn german_send_intent_is_high_risk() {
        let request = classify_high_risk("Erstelle das Dokument und sende es an die Gegenseite", None);
        let request = request.expect("send intent must be gated");
        assert_eq!(request.risk_level, RiskLevel::High);
        let recipient = request.fields.iter().find(|f| f.key == "recipient").unwrap();
        assert!(recipient.required);
    }

    #[test]
    fn generation_intent_is_high_risk_without_a_slash_command() {
        for text in [
            "Erstelle das Dokument für die Gegenseite",
            "Entwerfe eine Klageerwiderung",
            "Generate the settlement document",
        ] {
            let request = classify_high_risk(text, None);
            assert!(request.is_some(), "{text:?} must be gated");
            assert_eq!(request.unwrap().risk_level, RiskLevel::High);
        }
    }

    #[test]
    fn plain_questions_are_not_gated() {
        assert!(classify_high_risk("Welche Frist gilt für die Berufung?", None).is_none());
        assert!(classify_high_risk("Fasse die Beweislage zusammen", None).is_none());
    }

    #[test]
    fn slash_commands_are_always_gated() {
        for (text, command) in [
            ("/draft Kündigungsschreiben", SlashCommand::Draft),
            ("/send an die Gegenseite", SlashCommand::Send),
            ("/finalize Klageschrift", SlashCommand::Finalize),
        ] {
            let parsed = SlashCommand::parse(text);
            assert_eq!(parsed, Some(command));
            assert!(classify_high_risk(text, parsed).is_some());
        }
        assert_eq!(SlashCommand::parse("kein Kommando"), None);
    }
}
