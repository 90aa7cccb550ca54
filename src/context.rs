//! Context assembly: gather everything the generation step needs into
//! one immutable [`ContextSnapshot`].
//!
//! The assembler pulls chunks, documents, findings, norms, and
//! deadlines for the case, ranks the chunks against the query, and
//! independently computes the summary blocks. Side channels
//! (collective knowledge, opponent profile, evidence gaps) are best
//! effort: a failure logs a warning and omits the block, it never
//! aborts assembly. A case with no material still yields a valid,
//! mostly empty snapshot.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::collab::Collaborators;
use crate::config::Config;
use crate::models::{CaseLawHit, ContextSnapshot, Finding, FindingKind, RetrievalHint, Severity};
use crate::retrieval;
use crate::store::Store;

pub struct ContextAssembler {
    store: Arc<dyn Store>,
    collaborators: Collaborators,
    config: Config,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn Store>, collaborators: Collaborators, config: Config) -> Self {
        Self {
            store,
            collaborators,
            config,
        }
    }

    /// Build the snapshot for one message. `now` is injected so the
    /// deadline buckets are testable.
    pub async fn build(
        &self,
        case_id: &str,
        query: &str,
        hint: RetrievalHint,
        now: DateTime<Utc>,
    ) -> Result<ContextSnapshot> {
        let chunks = self.store.get_chunks(case_id).await?;
        let documents = self.store.get_documents(case_id).await?;
        let findings = self.store.get_findings(case_id).await?;
        let norms = self.store.get_norm_references(case_id).await?;
        let deadlines = self.store.get_deadlines(case_id).await?;

        let relevant_chunks = retrieval::rank(
            query,
            &chunks,
            &documents,
            hint,
            self.config.retrieval.max_results,
            &self.config.retrieval,
        );

        let active_norms = dedupe_preserving_order(norms);
        let findings_summary = summarize_findings(&findings);
        let deadline_summary = summarize_deadlines(&deadlines, now);
        let (contradiction_summary, contradiction_count) =
            summarize_contradictions(&findings, self.config.context.max_contradictions);

        let evidence_gap_summary = match &self.collaborators.evidence_gaps {
            Some(analyzer) => match analyzer.gaps(case_id).await {
                Ok(gaps) => gaps
                    .iter()
                    .map(|g| format!("- {g}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(err) => {
                    warn!(case_id, error = %err, "evidence gap analysis unavailable");
                    String::new()
                }
            },
            None => String::new(),
        };

        let mut case_law_hits: Vec<CaseLawHit> = Vec::new();
        let mut collective_context = None;
        if self.config.context.enable_collective_knowledge {
            if let Some(collective) = &self.collaborators.collective_knowledge {
                match collective.matches(case_id, query).await {
                    Ok(Some(matched)) => {
                        if !matched.insights.is_empty() {
                            collective_context = Some(
                                matched
                                    .insights
                                    .iter()
                                    .map(|i| format!("- {i}"))
                                    .collect::<Vec<_>>()
                                    .join("\n"),
                            );
                        }
                        case_law_hits = matched.case_law;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(case_id, error = %err, "collective knowledge lookup failed");
                    }
                }
            }
        }

        let mut opponent_context = None;
        if self.config.context.enable_opponent_profile {
            if let Some(profiles) = &self.collaborators.opponent_profile {
                match profiles.profile(case_id, query).await {
                    Ok(block) => opponent_context = block,
                    Err(err) => {
                        warn!(case_id, error = %err, "opponent profile lookup failed");
                    }
                }
            }
        }

        let source_reliability_warnings = reliability_warnings(&case_law_hits);

        let mut snapshot = ContextSnapshot {
            case_id: case_id.to_string(),
            relevant_chunks,
            active_norms,
            findings_summary,
            deadline_summary,
            contradiction_summary,
            contradiction_count,
            evidence_gap_summary,
            case_law_hits,
            collective_context,
            opponent_context,
            source_reliability_warnings,
            system_prompt: String::new(),
        };
        snapshot.system_prompt = compose_system_prompt(&snapshot, hint, &self.config);
        Ok(snapshot)
    }
}

fn dedupe_preserving_order(norms: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    norms
        .into_iter()
        .filter(|n| seen.insert(n.to_lowercase()))
        .collect()
}

fn summarize_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return String::new();
    }

    let count_of = |severity: Severity| findings.iter().filter(|f| f.severity == severity).count();
    let mut out = format!(
        "{} findings ({} critical, {} high, {} medium, {} low).",
        findings.len(),
        count_of(Severity::Critical),
        count_of(Severity::High),
        count_of(Severity::Medium),
        count_of(Severity::Low),
    );

    let important: Vec<&Finding> = findings
        .iter()
        .filter(|f| matches!(f.severity, Severity::Critical | Severity::High))
        .collect();
    for finding in important {
        out.push_str(&format!(
            "\n- [{}] {}",
            finding.severity.as_str(),
            finding.title
        ));
    }
    out
}

fn summarize_deadlines(deadlines: &[crate::models::Deadline], now: DateTime<Utc>) -> String {
    let mut lines = Vec::new();
    for deadline in deadlines {
        let days = (deadline.due_at - now).num_days();
        let line = if deadline.due_at < now {
            format!("- OVERDUE: {} (was due {})", deadline.title, deadline.due_at.format("%Y-%m-%d"))
        } else if days <= 7 {
            format!("- Due within 7 days: {} ({})", deadline.title, deadline.due_at.format("%Y-%m-%d"))
        } else if days <= 30 {
            format!("- Due within 30 days: {} ({})", deadline.title, deadline.due_at.format("%Y-%m-%d"))
        } else {
            continue;
        };
        lines.push(line);
    }
    lines.join("\n")
}

fn summarize_contradictions(findings: &[Finding], cap: usize) -> (String, usize) {
    let contradictions: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.kind == FindingKind::Contradiction)
        .take(cap)
        .collect();
    let count = contradictions.len();
    let text = contradictions
        .iter()
        .map(|f| format!("- {}: {}", f.title, f.description))
        .collect::<Vec<_>>()
        .join("\n");
    (text, count)
}

fn reliability_warnings(hits: &[CaseLawHit]) -> Vec<String> {
    let mut warnings = Vec::new();
    for hit in hits {
        if hit.stale {
            warnings.push(format!("{}: decision may be outdated", hit.reference));
        }
        if !hit.verified {
            warnings.push(format!("{}: not verified against a primary source", hit.reference));
        }
    }
    warnings
}

/// Concatenate the prompt sections in their fixed order. Empty
/// sections are skipped; the closing instruction block always renders.
fn compose_system_prompt(snapshot: &ContextSnapshot, hint: RetrievalHint, config: &Config) -> String {
    let mut sections: Vec<String> = Vec::new();

    let instructions = hint
        .mode
        .map(|m| m.instructions())
        .unwrap_or("You are a legal assistant for the case below. Answer precisely and only from the provided material.");
    sections.push(instructions.to_string());

    sections.push(format!("# Case\nCase id: {}", snapshot.case_id));

    if !snapshot.active_norms.is_empty() {
        sections.push(format!(
            "# Active legal norms\n{}",
            snapshot
                .active_norms
                .iter()
                .map(|n| format!("- {n}"))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }
    if !snapshot.findings_summary.is_empty() {
        sections.push(format!("# Findings\n{}", snapshot.findings_summary));
    }
    if !snapshot.deadline_summary.is_empty() {
        sections.push(format!("# Deadlines\n{}", snapshot.deadline_summary));
    }
    if !snapshot.contradiction_summary.is_empty() {
        sections.push(format!("# Contradictions\n{}", snapshot.contradiction_summary));
    }
    if !snapshot.evidence_gap_summary.is_empty() {
        sections.push(format!("# Evidence gaps\n{}", snapshot.evidence_gap_summary));
    }
    if !snapshot.case_law_hits.is_empty() {
        let mut block = snapshot
            .case_law_hits
            .iter()
            .map(|h| format!("- {}: {}", h.reference, h.summary))
            .collect::<Vec<_>>()
            .join("\n");
        if !snapshot.source_reliability_warnings.is_empty() {
            block.push_str("\nReliability warnings:\n");
            block.push_str(
                &snapshot
                    .source_reliability_warnings
                    .iter()
                    .map(|w| format!("- {w}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
        sections.push(format!("# Case law\n{block}"));
    }
    if !snapshot.relevant_chunks.is_empty() {
        let excerpts = snapshot
            .relevant_chunks
            .iter()
            .map(|c| {
                format!(
                    "[{} | {} | relevance {:.2}]\n{}",
                    c.document_title,
                    c.category.as_str(),
                    c.relevance_score,
                    c.excerpt
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        sections.push(format!("# Case material\n{excerpts}"));
    }
    if let Some(collective) = &snapshot.collective_context {
        sections.push(format!("# Insights from comparable matters\n{collective}"));
    }
    if let Some(opponent) = &snapshot.opponent_context {
        sections.push(format!("# Opposing party and adjudicator context\n{opponent}"));
    }

    sections.push(format!(
        "# Instructions\n\
         - Cite the source document for every factual statement.\n\
         - Name the exact paragraph (§) for every legal assertion.\n\
         - Flag explicitly when required information is missing from the case material.\n\
         - Never treat stale or unverified case law as dispositive.\n\
         - Respond in language: {}.",
        config.context.language
    ));

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Deadline;
    use chrono::TimeZone;

    #[test]
    fn deadline_buckets_are_classified_against_now() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let deadlines = vec![
            Deadline {
                id: "d1".into(),
                title: "Berufungsfrist".into(),
                due_at: Utc.with_ymd_and_hms(2026, 2, 20, 12, 0, 0).unwrap(),
            },
            Deadline {
                id: "d2".into(),
                title: "Stellungnahme".into(),
                due_at: Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap(),
            },
            Deadline {
                id: "d3".into(),
                title: "Gutachten".into(),
                due_at: Utc.with_ymd_and_hms(2026, 3, 25, 12, 0, 0).unwrap(),
            },
            Deadline {
                id: "d4".into(),
                title: "Fernliegend".into(),
                due_at: Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap(),
            },
        ];

        let summary = summarize_deadlines(&deadlines, now);
        assert!(summary.contains("OVERDUE: Berufungsfrist"));
        assert!(summary.contains("Due within 7 days: Stellungnahme"));
        assert!(summary.contains("Due within 30 days: Gutachten"));
        assert!(!summary.contains("Fernliegend"));
    }

    #[test]
    fn contradictions_are_capped() {
        let findings: Vec<Finding> = (0..9)
            .map(|i| Finding {
                id: format!("f{i}"),
                title: format!("Widerspruch {i}"),
                severity: Severity::Medium,
                kind: FindingKind::Contradiction,
                description: "Aussagen weichen voneinander ab".into(),
            })
            .collect();
        let (text, count) = summarize_contradictions(&findings, 5);
        assert_eq!(count, 5);
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn findings_summary_lists_critical_and_high_titles() {
        let findings = vec![
            Finding {
                id: "f1".into(),
                title: "Verjährung droht".into(),
                severity: Severity::Critical,
                kind: FindingKind::General,
                description: String::new(),
            },
            Finding {
                id: "f2".into(),
                title: "Nebenforderung unklar".into(),
                severity: Severity::Low,
                kind: FindingKind::General,
                description: String::new(),
            },
        ];
        let summary = summarize_findings(&findings);
        assert!(summary.contains("2 findings (1 critical, 0 high, 0 medium, 1 low)"));
        assert!(summary.contains("[critical] Verjährung droht"));
        assert!(!summary.contains("Nebenforderung"));
    }

    #[test]
    fn prompt_sections_keep_fixed_order() {
        let snapshot = ContextSnapshot {
            case_id: "case-1".into(),
            relevant_chunks: vec![],
            active_norms: vec!["§ 823 BGB".into()],
            findings_summary: "1 findings (0 critical, 0 high, 1 medium, 0 low).".into(),
            deadline_summary: "- OVERDUE: Berufungsfrist (was due 2026-02-20)".into(),
            contradiction_summary: String::new(),
            contradiction_count: 0,
            evidence_gap_summary: String::new(),
            case_law_hits: vec![],
            collective_context: Some("- comparable matter settled".into()),
            opponent_context: None,
            source_reliability_warnings: vec![],
            system_prompt: String::new(),
        };
        let prompt = compose_system_prompt(&snapshot, RetrievalHint::default(), &Config::default());

        let norms_at = prompt.find("# Active legal norms").unwrap();
        let findings_at = prompt.find("# Findings").unwrap();
        let deadlines_at = prompt.find("# Deadlines").unwrap();
        let collective_at = prompt.find("# Insights from comparable matters").unwrap();
        let closing_at = prompt.find("# Instructions").unwrap();
        assert!(norms_at < findings_at);
        assert!(findings_at < deadlines_at);
        assert!(deadlines_at < collective_at);
        assert!(collective_at < closing_at);
        assert!(prompt.contains("Respond in language: de."));
    }

    #[test]
    fn norm_order_is_preserved_and_deduped() {
        let norms = dedupe_preserving_order(vec![
            "§ 823 BGB".into(),
            "§ 280 BGB".into(),
            "§ 823 BGB".into(),
        ]);
        assert_eq!(norms, vec!["§ 823 BGB".to_string(), "§ 280 BGB".to_string()]);
    }
}
