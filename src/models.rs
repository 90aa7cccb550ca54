//! Core data models used throughout casekit.
//!
//! These types represent the case-material chunks, assembled context
//! snapshots, tool-call audit records, and chat messages that flow
//! through the retrieval and orchestration pipeline.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of a case-material fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkCategory {
    Pleading,
    Evidence,
    Correspondence,
    Deadline,
    Contract,
    CourtDecision,
    Note,
    Other,
}

impl ChunkCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pleading => "pleading",
            Self::Evidence => "evidence",
            Self::Correspondence => "correspondence",
            Self::Deadline => "deadline",
            Self::Contract => "contract",
            Self::CourtDecision => "court_decision",
            Self::Note => "note",
            Self::Other => "other",
        }
    }
}

/// Entities extracted from a chunk by the (external) ingestion pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub persons: Vec<String>,
    pub organizations: Vec<String>,
    pub legal_refs: Vec<String>,
}

/// A fragment of case material. Immutable once produced by ingestion;
/// owned by the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub category: ChunkCategory,
    pub keywords: HashSet<String>,
    pub entities: Option<ExtractedEntities>,
    pub quality_score: f64,
}

/// Processing status of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Indexed,
    Pending,
    Failed,
    NeedsReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jurisdiction {
    Germany,
    Austria,
    Switzerland,
    EuropeanUnion,
}

impl Jurisdiction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Germany => "germany",
            Self::Austria => "austria",
            Self::Switzerland => "switzerland",
            Self::EuropeanUnion => "european_union",
        }
    }
}

/// Per-source-document quality and status metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub title: String,
    pub index_status: IndexStatus,
    pub quality_score: f64,
    pub jurisdiction: Option<Jurisdiction>,
}

/// Severity of an analysis finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Contradiction,
    MissingEvidence,
    General,
}

/// An analysis finding attached to a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub kind: FindingKind,
    pub description: String,
}

/// A case deadline with an absolute due time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deadline {
    pub id: String,
    pub title: String,
    pub due_at: DateTime<Utc>,
}

/// One ranked retrieval result inside a [`ContextSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub excerpt: String,
    pub category: ChunkCategory,
    /// Normalized into [0, 1].
    pub relevance_score: f64,
}

/// A case-law hit from the collective-knowledge side channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseLawHit {
    pub reference: String,
    pub summary: String,
    /// Whether the hit has been verified against a primary source.
    pub verified: bool,
    pub stale: bool,
}

/// The assembled, immutable input to generation.
///
/// Built fresh per message and never mutated after construction; the
/// orchestrator passes it by reference (and serializes it verbatim
/// into a [`PendingRun`] across approval suspensions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub case_id: String,
    pub relevant_chunks: Vec<ScoredChunk>,
    pub active_norms: Vec<String>,
    pub findings_summary: String,
    pub deadline_summary: String,
    pub contradiction_summary: String,
    pub contradiction_count: usize,
    pub evidence_gap_summary: String,
    pub case_law_hits: Vec<CaseLawHit>,
    pub collective_context: Option<String>,
    pub opponent_context: Option<String>,
    pub source_reliability_warnings: Vec<String>,
    pub system_prompt: String,
}

/// Stage kinds of the per-message pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallName {
    CreditCheck,
    BuildContext,
    SearchChunks,
    CollectiveIntelligence,
    MemoryLookup,
    ApprovalGate,
    Generate,
    ReasoningChain,
    ConfidenceScore,
}

impl ToolCallName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreditCheck => "credit_check",
            Self::BuildContext => "build_context",
            Self::SearchChunks => "search_chunks",
            Self::CollectiveIntelligence => "collective_intelligence",
            Self::MemoryLookup => "memory_lookup",
            Self::ApprovalGate => "approval_gate",
            Self::Generate => "generate",
            Self::ReasoningChain => "reasoning_chain",
            Self::ConfidenceScore => "confidence_score",
        }
    }
}

/// Lifecycle status of a tool call. `AwaitingApproval` is the only
/// non-terminal suspension state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Complete,
    Error,
    AwaitingApproval,
    Cancelled,
}

/// Risk classification shown to the human approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One editable field of an approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalField {
    pub key: String,
    pub label: String,
    pub value: String,
    pub required: bool,
}

/// A request for human confirmation before a high-risk action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub title: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub fields: Vec<ApprovalField>,
}

/// Audit record of one pipeline stage's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: ToolCallName,
    pub status: ToolStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub input_summary: String,
    pub output_summary: String,
    pub approval_request: Option<ApprovalRequest>,
    pub detail_lines: Vec<String>,
}

impl ToolCall {
    /// Create a running tool call. Each stage creates exactly one and
    /// transitions it exactly once to a terminal or suspended status.
    pub fn start(name: ToolCallName, input_summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            status: ToolStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            input_summary: input_summary.into(),
            output_summary: String::new(),
            approval_request: None,
            detail_lines: Vec::new(),
        }
    }

    pub fn complete(&mut self, output_summary: impl Into<String>) {
        self.finish(ToolStatus::Complete, output_summary.into());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.finish(ToolStatus::Error, message.into());
    }

    pub fn cancel(&mut self, message: impl Into<String>) {
        self.finish(ToolStatus::Cancelled, message.into());
    }

    pub fn suspend_for_approval(&mut self, request: ApprovalRequest) {
        self.status = ToolStatus::AwaitingApproval;
        self.approval_request = Some(request);
    }

    fn finish(&mut self, status: ToolStatus, output_summary: String) {
        let now = Utc::now();
        self.status = status;
        self.output_summary = output_summary;
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
        self.finished_at = Some(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Complete,
}

/// A citation of a source document detected in the generated text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCitation {
    pub document_id: String,
    pub document_title: String,
    pub quote: String,
    pub confidence: f64,
}

/// A legal-norm citation detected in the generated text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormCitation {
    /// The raw matched reference, e.g. `"§ 823 BGB"`.
    pub reference: String,
    /// Resolved title, when the norm lookup knows the reference.
    pub title: Option<String>,
}

/// A reference to an analysis finding detected in the generated text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingCitation {
    pub finding_id: String,
    pub title: String,
}

/// Multi-factor answer confidence, clamped to [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confidence {
    pub score: f64,
    pub warnings: Vec<String>,
}

/// One turn of a chat session. Created `Pending`, mutated in place by
/// the orchestrator as stages complete, immutable once `Complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    pub tool_calls: Vec<ToolCall>,
    pub source_citations: Vec<SourceCitation>,
    pub norm_citations: Vec<NormCitation>,
    pub finding_citations: Vec<FindingCitation>,
    pub confidence: Option<Confidence>,
    pub token_count: Option<usize>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            status: MessageStatus::Pending,
            tool_calls: Vec::new(),
            source_citations: Vec::new(),
            norm_citations: Vec::new(),
            finding_citations: Vec::new(),
            confidence: None,
            token_count: None,
            duration_ms: None,
            created_at: Utc::now(),
        }
    }
}

/// Assistant operating mode; steers retrieval category preferences and
/// the prompt's instruction header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistMode {
    General,
    DraftPleading,
    AnalyzeEvidence,
    DeadlineReview,
}

impl AssistMode {
    pub fn preferred_categories(self) -> &'static [ChunkCategory] {
        match self {
            Self::General => &[ChunkCategory::Pleading, ChunkCategory::Evidence],
            Self::DraftPleading => &[
                ChunkCategory::Pleading,
                ChunkCategory::CourtDecision,
                ChunkCategory::Contract,
            ],
            Self::AnalyzeEvidence => &[ChunkCategory::Evidence, ChunkCategory::Correspondence],
            Self::DeadlineReview => &[ChunkCategory::Deadline, ChunkCategory::CourtDecision],
        }
    }

    pub fn instructions(self) -> &'static str {
        match self {
            Self::General => "You are a legal assistant for the case below. Answer precisely and only from the provided material.",
            Self::DraftPleading => "You are drafting pleading text. Follow the formal structure of the existing pleadings and ground every assertion in the provided material.",
            Self::AnalyzeEvidence => "You are analyzing evidence. Weigh each piece of evidence, name its source document, and state what it does and does not prove.",
            Self::DeadlineReview => "You are reviewing procedural deadlines. Treat every date in the provided material as binding and flag anything ambiguous.",
        }
    }
}

/// Retrieval steering derived from the message and case settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrievalHint {
    pub mode: Option<AssistMode>,
    pub jurisdiction: Option<Jurisdiction>,
}

/// Everything needed to resume a pipeline after an approval decision.
/// Created on suspension, consumed exactly once on resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRun {
    pub tool_call_id: String,
    pub session_id: String,
    pub case_id: String,
    pub workspace_id: String,
    pub account_id: String,
    pub model: String,
    pub snapshot: ContextSnapshot,
    pub history: Vec<(Role, String)>,
    pub message_id: String,
    pub started_at: DateTime<Utc>,
    pub original_content: String,
    pub reservation: crate::quota::QuotaReservation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_transitions_once() {
        let mut call = ToolCall::start(ToolCallName::CreditCheck, "kind=chat");
        assert_eq!(call.status, ToolStatus::Running);
        assert!(call.finished_at.is_none());

        call.complete("42 credits remaining");
        assert_eq!(call.status, ToolStatus::Complete);
        assert!(call.finished_at.is_some());
        assert!(call.duration_ms.unwrap_or(-1) >= 0);
    }

    #[test]
    fn suspension_keeps_call_open() {
        let mut call = ToolCall::start(ToolCallName::ApprovalGate, "draft + send intent");
        call.suspend_for_approval(ApprovalRequest {
            title: "Send document".into(),
            description: "The message asks to generate and send a document.".into(),
            risk_level: RiskLevel::High,
            fields: vec![],
        });
        assert_eq!(call.status, ToolStatus::AwaitingApproval);
        assert!(call.finished_at.is_none());
    }
}
