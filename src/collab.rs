//! External collaborator interfaces.
//!
//! Each trait wraps one external service the pipeline consults. The
//! side channels (norm lookup, evidence gaps, collective knowledge,
//! opponent profile) are strictly best-effort: callers treat `Err` and
//! `Ok(None)` alike as "no contribution" and never abort on them. The
//! quota service is the exception — its answers gate paid work.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::CaseLawHit;

/// Kind of metered credit consumed by an expensive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Chat,
    DocumentDraft,
}

impl CreditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::DocumentDraft => "document_draft",
        }
    }
}

/// One credit pool of an account. Pools are returned in consumption
/// priority order (e.g. plan allowance before purchased add-on).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditPool {
    pub id: String,
    pub kind: CreditKind,
    pub balance: f64,
    /// Whether a quota product was ever purchased for this pool's
    /// kind. Enforcement only activates once one exists.
    pub purchased: bool,
}

/// External metering service.
#[async_trait]
pub trait QuotaService: Send + Sync {
    /// All credit pools of the account, priority order.
    async fn fetch_balances(&self, account_id: &str) -> Result<Vec<CreditPool>>;

    /// Deduct `amount` from one pool. Called only after a successful
    /// external generation.
    async fn consume(&self, account_id: &str, pool_id: &str, amount: f64) -> Result<()>;
}

/// A resolved legal norm from the lookup collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedNorm {
    pub reference: String,
    pub title: String,
}

/// Best-effort legal-norm resolution (`"§ 823 BGB"` → statute title).
#[async_trait]
pub trait NormLookup: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<Option<ResolvedNorm>>;
}

/// Best-effort evidence-gap analysis for a case.
#[async_trait]
pub trait EvidenceGapAnalyzer: Send + Sync {
    async fn gaps(&self, case_id: &str) -> Result<Vec<String>>;
}

/// Match from the collective-knowledge side channel: anonymized
/// insights from comparable matters plus external case-law hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectiveMatch {
    pub insights: Vec<String>,
    pub case_law: Vec<CaseLawHit>,
}

#[async_trait]
pub trait CollectiveKnowledge: Send + Sync {
    async fn matches(&self, case_id: &str, query: &str) -> Result<Option<CollectiveMatch>>;
}

/// Best-effort opposing-party / adjudicator profile, already rendered
/// as a prompt-ready text block.
#[async_trait]
pub trait OpponentProfile: Send + Sync {
    async fn profile(&self, case_id: &str, query: &str) -> Result<Option<String>>;
}

/// Optional side-channel collaborators wired into context assembly and
/// citation extraction. Every field may be absent.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub norm_lookup: Option<Arc<dyn NormLookup>>,
    pub evidence_gaps: Option<Arc<dyn EvidenceGapAnalyzer>>,
    pub collective_knowledge: Option<Arc<dyn CollectiveKnowledge>>,
    pub opponent_profile: Option<Arc<dyn OpponentProfile>>,
}
