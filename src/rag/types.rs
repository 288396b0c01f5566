//! RAG entry model, category knobs, and codec helpers.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// The six retrieval categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagCategory {
    ExpressionPool,
    Cushion,
    Forbidden,
    Policy,
    Example,
    DomainContext,
}

impl RagCategory {
    pub const ALL: [RagCategory; 6] = [
        Self::ExpressionPool,
        Self::Cushion,
        Self::Forbidden,
        Self::Policy,
        Self::Example,
        Self::DomainContext,
    ];

    /// Stable wire/storage name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExpressionPool => "expression_pool",
            Self::Cushion => "cushion",
            Self::Forbidden => "forbidden",
            Self::Policy => "policy",
            Self::Example => "example",
            Self::DomainContext => "domain_context",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "expression_pool" => Some(Self::ExpressionPool),
            "cushion" => Some(Self::Cushion),
            "forbidden" => Some(Self::Forbidden),
            "policy" => Some(Self::Policy),
            "example" => Some(Self::Example),
            "domain_context" => Some(Self::DomainContext),
            _ => None,
        }
    }

    /// Per-category search knobs: (threshold, top_k, fallback_top_k).
    pub fn config(&self) -> CategoryConfig {
        match self {
            Self::ExpressionPool => CategoryConfig::new(0.78, 5, 1),
            Self::Cushion => CategoryConfig::new(0.78, 3, 1),
            Self::Forbidden => CategoryConfig::new(0.72, 3, 0),
            Self::Policy => CategoryConfig::new(0.82, 3, 0),
            Self::Example => CategoryConfig::new(0.80, 2, 1),
            Self::DomainContext => CategoryConfig::new(0.82, 2, 0),
        }
    }
}

impl std::fmt::Display for RagCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Search knobs for one category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryConfig {
    pub threshold: f32,
    pub top_k: usize,
    pub fallback_top_k: usize,
}

impl CategoryConfig {
    const fn new(threshold: f32, top_k: usize, fallback_top_k: usize) -> Self {
        Self {
            threshold,
            top_k,
            fallback_top_k,
        }
    }
}

/// A stored RAG entry. CSV filter columns use NULL/empty = match-all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagEntry {
    pub id: i64,
    pub category: String,
    pub content: String,
    pub original_text: Option<String>,
    pub alternative: Option<String>,
    pub trigger_phrases: Option<String>,
    pub dedupe_key: Option<String>,
    pub personas: Option<String>,
    pub contexts: Option<String>,
    pub tone_levels: Option<String>,
    pub sections: Option<String>,
    pub yellow_labels: Option<String>,
    pub embedding_blob: Option<String>,
    pub enabled: bool,
}

/// One retrieval hit returned to the prompt builder.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagSearchHit {
    pub content: String,
    pub score: f32,
    pub category: String,
    pub original_text: Option<String>,
    pub alternative: Option<String>,
    pub used_fallback: bool,
}

/// Per-category result lists.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RagResults {
    pub expression_pool: Vec<RagSearchHit>,
    pub cushion: Vec<RagSearchHit>,
    pub forbidden: Vec<RagSearchHit>,
    pub policy: Vec<RagSearchHit>,
    pub example: Vec<RagSearchHit>,
    pub domain_context: Vec<RagSearchHit>,
}

impl RagResults {
    pub fn category(&self, cat: RagCategory) -> &Vec<RagSearchHit> {
        match cat {
            RagCategory::ExpressionPool => &self.expression_pool,
            RagCategory::Cushion => &self.cushion,
            RagCategory::Forbidden => &self.forbidden,
            RagCategory::Policy => &self.policy,
            RagCategory::Example => &self.example,
            RagCategory::DomainContext => &self.domain_context,
        }
    }

    pub fn category_mut(&mut self, cat: RagCategory) -> &mut Vec<RagSearchHit> {
        match cat {
            RagCategory::ExpressionPool => &mut self.expression_pool,
            RagCategory::Cushion => &mut self.cushion,
            RagCategory::Forbidden => &mut self.forbidden,
            RagCategory::Policy => &mut self.policy,
            RagCategory::Example => &mut self.example,
            RagCategory::DomainContext => &mut self.domain_context,
        }
    }

    pub fn is_empty(&self) -> bool {
        RagCategory::ALL.iter().all(|c| self.category(*c).is_empty())
    }

    pub fn total_hits(&self) -> usize {
        RagCategory::ALL.iter().map(|c| self.category(*c).len()).sum()
    }
}

/// Parse a CSV filter column into an uppercased set. NULL/empty = empty set.
pub fn parse_csv_filter(value: Option<&str>) -> HashSet<String> {
    match value {
        Some(v) => v
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => HashSet::new(),
    }
}

/// SHA-256 hash of `category|content|personas|contexts` for idempotent upsert.
pub fn compute_dedupe_key(
    category: &str,
    content: &str,
    personas: Option<&str>,
    contexts: Option<&str>,
) -> String {
    let raw = format!(
        "{}|{}|{}|{}",
        category,
        content,
        personas.unwrap_or(""),
        contexts.unwrap_or("")
    );
    let digest = Sha256::digest(raw.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compact float32 JSON encoding for stored embeddings.
pub fn embedding_to_json(embedding: &[f32]) -> String {
    serde_json::to_string(embedding).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a stored embedding, rejecting malformed blobs.
pub fn json_to_embedding(blob: &str) -> Result<Vec<f32>> {
    serde_json::from_str::<Vec<f32>>(blob)
        .map_err(|e| Error::internal(format!("invalid embedding blob: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_category_knobs() {
        let c = RagCategory::ExpressionPool.config();
        assert_eq!((c.threshold, c.top_k, c.fallback_top_k), (0.78, 5, 1));
        let c = RagCategory::Forbidden.config();
        assert_eq!((c.threshold, c.top_k, c.fallback_top_k), (0.72, 3, 0));
        let c = RagCategory::DomainContext.config();
        assert_eq!((c.threshold, c.top_k, c.fallback_top_k), (0.82, 2, 0));
    }

    #[test]
    fn test_parse_csv_filter() {
        let set = parse_csv_filter(Some("boss, client ,"));
        assert!(set.contains("BOSS"));
        assert!(set.contains("CLIENT"));
        assert_eq!(set.len(), 2);
        assert!(parse_csv_filter(None).is_empty());
        assert!(parse_csv_filter(Some("")).is_empty());
    }

    #[test]
    fn test_dedupe_key_stable_and_distinct() {
        let a = compute_dedupe_key("cushion", "확인해 보니", Some("BOSS"), None);
        let b = compute_dedupe_key("cushion", "확인해 보니", Some("BOSS"), None);
        let c = compute_dedupe_key("cushion", "확인해 보니", Some("CLIENT"), None);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_embedding_json_roundtrip() {
        let emb = vec![0.1f32, -0.5, 1.25];
        let blob = embedding_to_json(&emb);
        assert_eq!(json_to_embedding(&blob).unwrap(), emb);
        assert!(json_to_embedding("not json").is_err());
    }
}
