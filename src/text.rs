//! Token and lexical utilities shared by retrieval and citation
//! extraction: normalization, stop-word filtering, TF/IDF vectors,
//! Jaccard and cosine similarity, and domain synonym expansion.

use std::collections::{HashMap, HashSet};

use regex::Regex;

/// Lowercased tokens with stop words and one-character noise removed.
/// `§` survives tokenization so legal references stay searchable.
pub fn tokenize(text: &str) -> Vec<String> {
    let stopwords = stop_words();
    text.split(|c: char| !c.is_alphanumeric() && c != '§')
        .filter_map(|raw| {
            let token = raw.trim().to_lowercase();
            if token.len() < 2 && token != "§" {
                return None;
            }
            if stopwords.contains(token.as_str()) {
                return None;
            }
            Some(token)
        })
        .collect()
}

pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// |A ∩ B| / |A ∪ B|; 0.0 when either set is empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Term frequencies normalized by token count.
pub fn tf_vector(tokens: &[String]) -> HashMap<String, f64> {
    let mut counts: HashMap<String, f64> = HashMap::new();
    for token in tokens {
        *counts.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    let total = tokens.len().max(1) as f64;
    for value in counts.values_mut() {
        *value /= total;
    }
    counts
}

/// Inverse document frequencies over a small candidate corpus.
///
/// `documents` should include the query itself so query-only terms get
/// a finite weight instead of vanishing.
pub fn idf_map(documents: &[Vec<String>]) -> HashMap<String, f64> {
    let n = documents.len().max(1) as f64;
    let mut doc_freq: HashMap<&str, f64> = HashMap::new();
    for tokens in documents {
        let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        for token in unique {
            *doc_freq.entry(token).or_insert(0.0) += 1.0;
        }
    }
    doc_freq
        .into_iter()
        .map(|(token, df)| (token.to_string(), (1.0 + n / (1.0 + df)).ln()))
        .collect()
}

/// Cosine similarity between the TF-IDF vectors of two token lists.
pub fn tfidf_cosine(a: &[String], b: &[String], idf: &HashMap<String, f64>) -> f64 {
    let tf_a = tf_vector(a);
    let tf_b = tf_vector(b);

    let weight = |tf: &HashMap<String, f64>, token: &str| -> f64 {
        tf.get(token).copied().unwrap_or(0.0) * idf.get(token).copied().unwrap_or(0.0)
    };

    let mut dot = 0.0;
    for token in tf_a.keys() {
        dot += weight(&tf_a, token) * weight(&tf_b, token);
    }

    let mag = |tf: &HashMap<String, f64>| -> f64 {
        tf.keys()
            .map(|t| weight(tf, t).powi(2))
            .sum::<f64>()
            .sqrt()
    };
    let mag_a = mag(&tf_a);
    let mag_b = mag(&tf_b);
    if mag_a < f64::EPSILON || mag_b < f64::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Expand a query token set through the domain synonym table.
/// Expansion only adds tokens, never removes.
pub fn expand_query_tokens(tokens: &HashSet<String>) -> HashSet<String> {
    let mut expanded = tokens.clone();
    for &(term, synonyms) in synonym_table() {
        if tokens.contains(term) {
            for synonym in synonyms {
                expanded.insert((*synonym).to_string());
            }
        }
    }
    expanded
}

/// Normalized legal references (`§ 823 BGB`) found in a text.
pub fn legal_refs(text: &str) -> Vec<String> {
    let re = Regex::new(r"§\s*(\d+[a-z]?)\s+([A-ZÄÖÜ][A-Za-zÄÖÜäöüß]{1,14})")
        .unwrap_or_else(|_| Regex::new("^$").unwrap());

    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for caps in re.captures_iter(text) {
        let (Some(number), Some(law)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let normalized = format!("§ {} {}", number.as_str(), law.as_str());
        if seen.insert(normalized.to_lowercase()) {
            refs.push(normalized);
        }
    }
    refs
}

fn synonym_table() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        (
            "schadensersatz",
            &["schadenersatz", "ersatz", "entschädigung", "kompensation"],
        ),
        ("kündigung", &["beendigung", "auflösung", "kündigungsschreiben"]),
        ("vertrag", &["vereinbarung", "kontrakt", "vertragswerk"]),
        ("frist", &["termin", "fristablauf", "verjährung"]),
        ("klage", &["klageschrift", "klageerhebung"]),
        ("beweis", &["beweismittel", "nachweis", "beleg"]),
        ("mangel", &["mängel", "defekt", "sachmangel"]),
        ("urteil", &["entscheidung", "beschluss", "rechtsprechung"]),
        ("zeuge", &["zeugin", "zeugenaussage"]),
        ("miete", &["mietzins", "mietvertrag"]),
        ("haftung", &["haftbar", "verantwortlichkeit"]),
        ("widerspruch", &["einspruch", "widerrede"]),
        ("damages", &["schadensersatz", "compensation"]),
        ("contract", &["vertrag", "agreement"]),
        ("deadline", &["frist", "termin"]),
    ]
}

fn stop_words() -> HashSet<&'static str> {
    [
        // German
        "der", "die", "das", "den", "dem", "des", "ein", "eine", "einer", "eines", "einem",
        "und", "oder", "aber", "auch", "auf", "aus", "bei", "bis", "für", "gegen", "im", "in",
        "ist", "sind", "war", "waren", "mit", "nach", "nicht", "noch", "nur", "ob", "sich",
        "sie", "er", "es", "so", "über", "um", "vom", "von", "vor", "wie", "wird", "werden",
        "wurde", "zu", "zum", "zur", "dass", "als", "an", "am", "hat", "haben", "kann",
        // English
        "the", "a", "an", "and", "or", "but", "of", "to", "in", "on", "for", "with", "is",
        "are", "was", "were", "be", "been", "it", "its", "this", "that", "as", "at", "by",
        "from", "has", "have", "not", "no", "if", "then", "do", "does", "did", "what", "which",
        "who", "when", "where", "how",
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_stopwords_and_keeps_paragraph_sign() {
        let tokens = tokenize("Der Anspruch aus § 823 BGB ist verjährt");
        assert!(tokens.contains(&"anspruch".to_string()));
        assert!(tokens.contains(&"§".to_string()));
        assert!(tokens.contains(&"823".to_string()));
        assert!(tokens.contains(&"bgb".to_string()));
        assert!(!tokens.contains(&"der".to_string()));
    }

    #[test]
    fn jaccard_bounds() {
        let a = token_set("schadensersatz wegen mangel");
        let b = token_set("schadensersatz wegen mangel");
        assert!((jaccard(&a, &b) - 1.0).abs() < 1e-9);

        let c = token_set("völlig anderes thema");
        assert!(jaccard(&a, &c) < 1e-9);
        assert!((jaccard(&a, &HashSet::new())).abs() < 1e-9);
    }

    #[test]
    fn tfidf_cosine_favors_shared_rare_terms() {
        let query = tokenize("Schadensersatz Mietvertrag");
        let matching = tokenize("Der Schadensersatz aus dem Mietvertrag ist streitig");
        let unrelated = tokenize("Protokoll der Hauptversammlung vom letzten Jahr");
        let idf = idf_map(&[query.clone(), matching.clone(), unrelated.clone()]);

        let hit = tfidf_cosine(&query, &matching, &idf);
        let miss = tfidf_cosine(&query, &unrelated, &idf);
        assert!(hit > miss);
        assert!(hit > 0.0);
        assert!(miss.abs() < 1e-9);
    }

    #[test]
    fn expansion_only_adds() {
        let base = token_set("schadensersatz klage");
        let expanded = expand_query_tokens(&base);
        assert!(expanded.is_superset(&base));
        assert!(expanded.contains("entschädigung"));
        assert!(expanded.contains("klageschrift"));
    }

    #[test]
    fn legal_refs_are_normalized_and_deduped() {
        let refs = legal_refs("Ansprüche aus §823 BGB und § 823  BGB sowie § 280 BGB");
        assert_eq!(refs, vec!["§ 823 BGB".to_string(), "§ 280 BGB".to_string()]);
    }
}
