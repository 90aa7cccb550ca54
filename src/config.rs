use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Weights and thresholds for the relevance ranking function.
///
/// The additive score is mapped into [0, 1] by dividing by
/// `normalization`. That constant is empirically chosen, not derived
/// from the weights — treat it as a tunable.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_quality_floor")]
    pub quality_floor: f64,
    #[serde(default = "default_noise_floor")]
    pub noise_floor: f64,
    #[serde(default = "default_normalization")]
    pub normalization: f64,
    #[serde(default = "default_query_jaccard_weight")]
    pub query_jaccard_weight: f64,
    #[serde(default = "default_keyword_jaccard_weight")]
    pub keyword_jaccard_weight: f64,
    #[serde(default = "default_tfidf_weight")]
    pub tfidf_weight: f64,
    #[serde(default = "default_keyword_hit_bonus")]
    pub keyword_hit_bonus: f64,
    #[serde(default = "default_legal_ref_weight")]
    pub legal_ref_weight: f64,
    #[serde(default = "default_entity_weight")]
    pub entity_weight: f64,
    #[serde(default = "default_category_bonus")]
    pub category_bonus: f64,
    #[serde(default = "default_chunk_quality_weight")]
    pub chunk_quality_weight: f64,
    #[serde(default = "default_doc_quality_weight")]
    pub doc_quality_weight: f64,
    #[serde(default = "default_needs_review_penalty")]
    pub needs_review_penalty: f64,
    #[serde(default = "default_low_quality_penalty")]
    pub low_quality_penalty: f64,
}

fn default_max_results() -> usize {
    20
}
fn default_quality_floor() -> f64 {
    0.12
}
fn default_noise_floor() -> f64 {
    0.5
}
fn default_normalization() -> f64 {
    18.0
}
fn default_query_jaccard_weight() -> f64 {
    8.0
}
fn default_keyword_jaccard_weight() -> f64 {
    6.0
}
fn default_tfidf_weight() -> f64 {
    10.0
}
fn default_keyword_hit_bonus() -> f64 {
    0.75
}
fn default_legal_ref_weight() -> f64 {
    5.0
}
fn default_entity_weight() -> f64 {
    4.0
}
fn default_category_bonus() -> f64 {
    3.0
}
fn default_chunk_quality_weight() -> f64 {
    3.5
}
fn default_doc_quality_weight() -> f64 {
    1.8
}
fn default_needs_review_penalty() -> f64 {
    -1.2
}
fn default_low_quality_penalty() -> f64 {
    -2.5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            quality_floor: default_quality_floor(),
            noise_floor: default_noise_floor(),
            normalization: default_normalization(),
            query_jaccard_weight: default_query_jaccard_weight(),
            keyword_jaccard_weight: default_keyword_jaccard_weight(),
            tfidf_weight: default_tfidf_weight(),
            keyword_hit_bonus: default_keyword_hit_bonus(),
            legal_ref_weight: default_legal_ref_weight(),
            entity_weight: default_entity_weight(),
            category_bonus: default_category_bonus(),
            chunk_quality_weight: default_chunk_quality_weight(),
            doc_quality_weight: default_doc_quality_weight(),
            needs_review_penalty: default_needs_review_penalty(),
            low_quality_penalty: default_low_quality_penalty(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_max_contradictions")]
    pub max_contradictions: usize,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_enable_collective")]
    pub enable_collective_knowledge: bool,
    #[serde(default = "default_enable_opponent")]
    pub enable_opponent_profile: bool,
}

fn default_max_contradictions() -> usize {
    5
}
fn default_language() -> String {
    "de".to_string()
}
fn default_enable_collective() -> bool {
    true
}
fn default_enable_opponent() -> bool {
    true
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_contradictions: default_max_contradictions(),
            language: default_language(),
            enable_collective_knowledge: default_enable_collective(),
            enable_opponent_profile: default_enable_opponent(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    30
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_stream_slice_chars")]
    pub stream_slice_chars: usize,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_history_turns() -> usize {
    10
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_stream_slice_chars() -> usize {
    400
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            history_turns: default_history_turns(),
            timeout_secs: default_timeout_secs(),
            stream_slice_chars: default_stream_slice_chars(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
