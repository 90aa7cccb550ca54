//! Post-hoc citation extraction and answer confidence.
//!
//! Runs over the generated text after the fact: which retrieved
//! documents the answer actually leans on, which legal norms it
//! cites, and which analysis findings it references. The confidence
//! score aggregates how well-grounded the answer is and attaches
//! human-readable warnings when components are sparse.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::collab::NormLookup;
use crate::models::{
    Confidence, ContextSnapshot, Finding, FindingCitation, NormCitation, ScoredChunk,
    SourceCitation,
};
use crate::text;

/// Relevance above which a retrieved chunk counts as a
/// high-confidence source on its own.
const HIGH_CONFIDENCE_RELEVANCE: f64 = 0.84;
const MAX_SOURCE_CITATIONS: usize = 10;
const MAX_NORM_CITATIONS: usize = 15;
const MAX_FINDING_CITATIONS: usize = 10;
const QUOTE_DEDUP_CHARS: usize = 72;

/// Detect which retrieved chunks the response draws on.
pub fn extract_source_citations(response: &str, chunks: &[ScoredChunk]) -> Vec<SourceCitation> {
    let response_lower = response.to_lowercase();
    let response_tokens = text::token_set(response);

    let mut citations: Vec<SourceCitation> = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for chunk in chunks {
        let title_words: Vec<String> = text::tokenize(&chunk.document_title)
            .into_iter()
            .filter(|w| w.len() >= 4)
            .collect();
        let title_hits = title_words
            .iter()
            .filter(|w| response_lower.contains(w.as_str()))
            .count();
        let title_ratio = if title_words.is_empty() {
            0.0
        } else {
            title_hits as f64 / title_words.len() as f64
        };

        let overlap = text::jaccard(&response_tokens, &text::token_set(&chunk.excerpt));
        let high_relevance = chunk.relevance_score > HIGH_CONFIDENCE_RELEVANCE;

        let mut confidence = title_ratio * 0.45 + overlap * 2.0;
        if high_relevance {
            confidence += 0.25;
        }
        let confidence = confidence.min(1.0);
        if confidence < 0.15 {
            continue;
        }

        let quote: String = chunk.excerpt.chars().take(QUOTE_DEDUP_CHARS).collect();
        if !seen.insert((chunk.document_id.clone(), quote.clone())) {
            continue;
        }
        citations.push(SourceCitation {
            document_id: chunk.document_id.clone(),
            document_title: chunk.document_title.clone(),
            quote,
            confidence,
        });
    }

    citations.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    citations.truncate(MAX_SOURCE_CITATIONS);
    citations
}

/// Scan the response for `§ <number> <law>` references and resolve
/// them best-effort. A failed or missing lookup still yields a
/// citation with the raw matched text.
pub async fn extract_norm_citations(
    response: &str,
    norm_lookup: Option<&Arc<dyn NormLookup>>,
) -> Vec<NormCitation> {
    let mut citations = Vec::new();
    for reference in text::legal_refs(response).into_iter().take(MAX_NORM_CITATIONS) {
        let title = match norm_lookup {
            Some(lookup) => match lookup.resolve(&reference).await {
                Ok(resolved) => resolved.map(|n| n.title),
                Err(err) => {
                    warn!(reference, error = %err, "norm lookup failed");
                    None
                }
            },
            None => None,
        };
        citations.push(NormCitation { reference, title });
    }
    citations
}

/// Match finding titles against the response by their significant
/// words (every word of four or more characters must appear).
pub fn extract_finding_citations(response: &str, findings: &[Finding]) -> Vec<FindingCitation> {
    let response_lower = response.to_lowercase();
    let mut citations = Vec::new();
    for finding in findings {
        let significant: Vec<String> = text::tokenize(&finding.title)
            .into_iter()
            .filter(|w| w.len() >= 4)
            .collect();
        if significant.is_empty() {
            continue;
        }
        if significant.iter().all(|w| response_lower.contains(w.as_str())) {
            citations.push(FindingCitation {
                finding_id: finding.id.clone(),
                title: finding.title.clone(),
            });
        }
        if citations.len() >= MAX_FINDING_CITATIONS {
            break;
        }
    }
    citations
}

/// Multi-factor confidence over how grounded the answer is.
pub fn score_confidence(
    snapshot: &ContextSnapshot,
    source_citations: &[SourceCitation],
    norm_citations: &[NormCitation],
) -> Confidence {
    let chunk_count = snapshot.relevant_chunks.len();
    let distinct_docs: HashSet<&str> = snapshot
        .relevant_chunks
        .iter()
        .map(|c| c.document_id.as_str())
        .collect();

    let mut score = 0.1;
    score += (chunk_count as f64 / 5.0).min(1.0) * 0.30;
    score += (distinct_docs.len() as f64 / 3.0).min(1.0) * 0.15;
    score += (norm_citations.len() as f64 / 2.0).min(1.0) * 0.20;
    score += (snapshot.case_law_hits.len() as f64 / 2.0).min(1.0) * 0.10;
    if snapshot.collective_context.is_some() {
        score += 0.10;
    }
    if !source_citations.is_empty() {
        score += 0.10;
    }
    score -= (snapshot.contradiction_count as f64).min(4.0) * 0.05;

    let mut warnings = Vec::new();
    if source_citations.is_empty() {
        warnings.push("no document citations detected".to_string());
    }
    if norm_citations.is_empty() {
        warnings.push("no legal norms cited".to_string());
    }
    if chunk_count < 3 {
        warnings.push("answer is based on few case material sources".to_string());
    }
    if snapshot.contradiction_count > 0 {
        warnings.push(format!(
            "{} unresolved contradictions in the case material",
            snapshot.contradiction_count
        ));
    }

    Confidence {
        score: score.clamp(0.0, 1.0),
        warnings,
    }
}
