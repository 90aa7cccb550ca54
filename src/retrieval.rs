//! Relevance retrieval over case-material chunks.
//!
//! Candidates are filtered (index status, quality floor, jurisdiction
//! hint with a skip-if-empty fallback), then scored additively from
//! lexical, statistical, entity, category, and quality signals. The
//! ordering is deterministic: a stable descending sort keeps corpus
//! order for equal scores.

use std::collections::{HashMap, HashSet};

use crate::config::RetrievalConfig;
use crate::models::{DocumentMeta, IndexStatus, RetrievalHint, ScoredChunk, TextChunk};
use crate::text;

const EXCERPT_CHARS: usize = 240;

/// Score and rank `chunks` against `query`, best first, capped at
/// `max_results`. `relevance_score` is normalized into [0, 1].
pub fn rank(
    query: &str,
    chunks: &[TextChunk],
    docs: &[DocumentMeta],
    hint: RetrievalHint,
    max_results: usize,
    config: &RetrievalConfig,
) -> Vec<ScoredChunk> {
    let doc_map: HashMap<&str, &DocumentMeta> = docs.iter().map(|d| (d.id.as_str(), d)).collect();

    let mut candidates: Vec<&TextChunk> = chunks
        .iter()
        .filter(|chunk| {
            let Some(doc) = doc_map.get(chunk.document_id.as_str()) else {
                return false;
            };
            if matches!(doc.index_status, IndexStatus::Pending | IndexStatus::Failed) {
                return false;
            }
            chunk.quality_score >= config.quality_floor
        })
        .collect();

    candidates = apply_jurisdiction_filter(candidates, &doc_map, hint);
    if candidates.is_empty() {
        return Vec::new();
    }

    let query_tokens = text::tokenize(query);
    let query_token_set: HashSet<String> = query_tokens.iter().cloned().collect();
    let expanded_query = text::expand_query_tokens(&query_token_set);
    let query_lower = query.to_lowercase();
    let query_refs: Vec<String> = text::legal_refs(query)
        .into_iter()
        .map(|r| r.to_lowercase())
        .collect();
    let preferred: HashSet<&str> = hint
        .mode
        .map(|m| m.preferred_categories().iter().map(|c| c.as_str()).collect())
        .unwrap_or_default();

    // IDF over the candidate corpus plus the query itself.
    let mut corpus: Vec<Vec<String>> = candidates
        .iter()
        .map(|chunk| text::tokenize(&chunk.text))
        .collect();
    corpus.push(query_tokens.clone());
    let idf = text::idf_map(&corpus);

    let mut scored: Vec<(f64, ScoredChunk)> = Vec::with_capacity(candidates.len());
    for (chunk, chunk_tokens) in candidates.iter().zip(&corpus) {
        let doc = doc_map[chunk.document_id.as_str()];

        let chunk_token_set: HashSet<String> = chunk_tokens.iter().cloned().collect();
        let keyword_set: HashSet<String> =
            chunk.keywords.iter().map(|k| k.to_lowercase()).collect();

        let mut score = 0.0;
        score += text::jaccard(&expanded_query, &chunk_token_set) * config.query_jaccard_weight;
        score += text::jaccard(&expanded_query, &keyword_set) * config.keyword_jaccard_weight;
        score += text::tfidf_cosine(&query_tokens, chunk_tokens, &idf) * config.tfidf_weight;

        let keyword_hits = keyword_set
            .iter()
            .filter(|k| !k.is_empty() && query_lower.contains(k.as_str()))
            .count();
        score += keyword_hits as f64 * config.keyword_hit_bonus;

        if let Some(entities) = &chunk.entities {
            let chunk_refs: HashSet<String> = entities
                .legal_refs
                .iter()
                .flat_map(|r| text::legal_refs(r))
                .map(|r| r.to_lowercase())
                .collect();
            let ref_matches = query_refs.iter().filter(|r| chunk_refs.contains(*r)).count();
            score += ref_matches as f64 * config.legal_ref_weight;

            let entity_matches = entities
                .persons
                .iter()
                .chain(&entities.organizations)
                .filter(|name| name.len() >= 3 && query_lower.contains(&name.to_lowercase()))
                .count();
            score += entity_matches as f64 * config.entity_weight;
        }

        if preferred.contains(chunk.category.as_str()) {
            score += config.category_bonus;
        }

        score += chunk.quality_score.clamp(0.0, 1.0) * config.chunk_quality_weight;
        score += doc.quality_score.clamp(0.0, 1.0) * config.doc_quality_weight;

        if doc.index_status == IndexStatus::NeedsReview {
            score += config.needs_review_penalty;
        }
        if doc.quality_score < 0.3 {
            score += config.low_quality_penalty;
        }

        if score <= config.noise_floor {
            continue;
        }

        scored.push((
            score,
            ScoredChunk {
                chunk_id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                document_title: doc.title.clone(),
                excerpt: chunk.text.chars().take(EXCERPT_CHARS).collect(),
                category: chunk.category,
                relevance_score: (score / config.normalization).min(1.0),
            },
        ));
    }

    // Stable sort: ties keep original corpus order.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(max_results);
    scored.into_iter().map(|(_, chunk)| chunk).collect()
}

/// Drop chunks whose document jurisdiction conflicts with the hint.
///
/// Only active when some candidate document carries jurisdiction
/// metadata, and skipped entirely when it would remove every
/// candidate — a query must never come back empty solely because of
/// jurisdiction metadata.
fn apply_jurisdiction_filter<'a>(
    candidates: Vec<&'a TextChunk>,
    doc_map: &HashMap<&str, &DocumentMeta>,
    hint: RetrievalHint,
) -> Vec<&'a TextChunk> {
    let Some(wanted) = hint.jurisdiction else {
        return candidates;
    };
    let any_tagged = candidates
        .iter()
        .any(|c| doc_map.get(c.document_id.as_str()).is_some_and(|d| d.jurisdiction.is_some()));
    if !any_tagged {
        return candidates;
    }

    let filtered: Vec<&TextChunk> = candidates
        .iter()
        .filter(|chunk| {
            match doc_map.get(chunk.document_id.as_str()).and_then(|d| d.jurisdiction) {
                Some(jurisdiction) => jurisdiction == wanted,
                None => true,
            }
        })
        .copied()
        .collect();

    if filtered.is_empty() {
        candidates
    } else {
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssistMode, ChunkCategory, ExtractedEntities, Jurisdiction};

    fn make_doc(id: &str) -> DocumentMeta {
        DocumentMeta {
            id: id.to_string(),
            title: format!("Document {id}"),
            index_status: IndexStatus::Indexed,
            quality_score: 0.9,
            jurisdiction: None,
        }
    }

    fn make_chunk(id: &str, doc_id: &str, chunk_text: &str) -> TextChunk {
        TextChunk {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            text: chunk_text.to_string(),
            category: ChunkCategory::Evidence,
            keywords: HashSet::new(),
            entities: None,
            quality_score: 0.8,
        }
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    #[test]
    fn legal_ref_match_ranks_first() {
        let docs = vec![make_doc("d1"), make_doc("d2")];
        let mut matching = make_chunk(
            "c-ref",
            "d1",
            "Der Beklagte haftet nach den allgemeinen Grundsätzen auf Schadensersatz.",
        );
        matching.entities = Some(ExtractedEntities {
            legal_refs: vec!["§ 823 BGB".to_string()],
            ..Default::default()
        });

        let mut chunks = vec![matching];
        for i in 0..10 {
            chunks.push(make_chunk(
                &format!("c-{i}"),
                "d2",
                "Protokoll über die Besichtigung des Grundstücks im vergangenen Sommer.",
            ));
        }

        let ranked = rank(
            "§ 823 BGB Schadensersatz",
            &chunks,
            &docs,
            RetrievalHint::default(),
            20,
            &config(),
        );
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].chunk_id, "c-ref");
        // The legal-reference bonus dominates: clear margin over the rest.
        if ranked.len() > 1 {
            assert!(ranked[0].relevance_score > ranked[1].relevance_score + 0.2);
        }
    }

    #[test]
    fn ranking_is_deterministic_with_stable_ties() {
        let docs = vec![make_doc("d1")];
        let chunks: Vec<TextChunk> = (0..6)
            .map(|i| {
                make_chunk(
                    &format!("c{i}"),
                    "d1",
                    "Der Mietvertrag enthält eine Klausel zur Kündigung.",
                )
            })
            .collect();

        let first = rank("Kündigung Mietvertrag", &chunks, &docs, RetrievalHint::default(), 10, &config());
        let second = rank("Kündigung Mietvertrag", &chunks, &docs, RetrievalHint::default(), 10, &config());

        let ids: Vec<&str> = first.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2", "c3", "c4", "c5"]);
        assert_eq!(
            ids,
            second.iter().map(|c| c.chunk_id.as_str()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn truncation_is_prefix_monotonic() {
        let docs = vec![make_doc("d1")];
        let chunks: Vec<TextChunk> = (0..8)
            .map(|i| {
                let mut c = make_chunk(
                    &format!("c{i}"),
                    "d1",
                    "Beweismittel zur Kündigung des Vertrags",
                );
                c.quality_score = 0.9 - (i as f64) * 0.05;
                c
            })
            .collect();

        let short = rank("Kündigung Vertrag", &chunks, &docs, RetrievalHint::default(), 3, &config());
        let long = rank("Kündigung Vertrag", &chunks, &docs, RetrievalHint::default(), 8, &config());
        assert_eq!(short.len(), 3);
        for (a, b) in short.iter().zip(long.iter()) {
            assert_eq!(a.chunk_id, b.chunk_id);
        }
    }

    #[test]
    fn unindexed_and_low_quality_chunks_are_dropped() {
        let mut pending_doc = make_doc("d-pending");
        pending_doc.index_status = IndexStatus::Pending;
        let docs = vec![make_doc("d1"), pending_doc];

        let mut low_quality = make_chunk("c-low", "d1", "Kündigung des Vertrags");
        low_quality.quality_score = 0.05;
        let chunks = vec![
            low_quality,
            make_chunk("c-pending", "d-pending", "Kündigung des Vertrags"),
            make_chunk("c-ok", "d1", "Kündigung des Vertrags"),
        ];

        let ranked = rank("Kündigung Vertrag", &chunks, &docs, RetrievalHint::default(), 10, &config());
        let ids: Vec<&str> = ranked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c-ok"]);
    }

    #[test]
    fn jurisdiction_filter_skipped_when_it_would_empty_corpus() {
        let mut doc = make_doc("d1");
        doc.jurisdiction = Some(Jurisdiction::Austria);
        let docs = vec![doc];
        let chunks = vec![make_chunk("c1", "d1", "Kündigung des Mietvertrags wegen Mangel")];

        let hint = RetrievalHint {
            mode: None,
            jurisdiction: Some(Jurisdiction::Germany),
        };
        let ranked = rank("Kündigung Mietvertrag Mangel", &chunks, &docs, hint, 10, &config());
        assert_eq!(ranked.len(), 1, "all-conflicting corpus must skip the filter");
    }

    #[test]
    fn jurisdiction_filter_drops_conflicts_when_matches_exist() {
        let mut at_doc = make_doc("d-at");
        at_doc.jurisdiction = Some(Jurisdiction::Austria);
        let mut de_doc = make_doc("d-de");
        de_doc.jurisdiction = Some(Jurisdiction::Germany);
        let docs = vec![at_doc, de_doc];

        let chunks = vec![
            make_chunk("c-at", "d-at", "Kündigung des Mietvertrags"),
            make_chunk("c-de", "d-de", "Kündigung des Mietvertrags"),
        ];
        let hint = RetrievalHint {
            mode: None,
            jurisdiction: Some(Jurisdiction::Germany),
        };
        let ranked = rank("Kündigung Mietvertrag", &chunks, &docs, hint, 10, &config());
        let ids: Vec<&str> = ranked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c-de"]);
    }

    #[test]
    fn preferred_category_gets_bonus() {
        let docs = vec![make_doc("d1")];
        let mut pleading = make_chunk("c-plead", "d1", "Entwurf der Klageschrift zur Kündigung");
        pleading.category = ChunkCategory::Pleading;
        let evidence = make_chunk("c-ev", "d1", "Entwurf der Klageschrift zur Kündigung");

        let hint = RetrievalHint {
            mode: Some(AssistMode::DraftPleading),
            jurisdiction: None,
        };
        let ranked = rank("Klageschrift Kündigung", &vec![evidence, pleading], &docs, hint, 10, &config());
        assert_eq!(ranked[0].chunk_id, "c-plead");
    }
}
