//! In-memory RAG index with cosine similarity search.
//!
//! The loaded snapshot (pre-parsed filters + L2-normalized embeddings) sits
//! behind an `ArcSwap`: reload builds a fresh snapshot and swaps the pointer,
//! so concurrent searches observe either the old or the new index, never a
//! mix.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::settings;
use crate::error::Result;

use super::store::RagStore;
use super::types::{parse_csv_filter, json_to_embedding, RagCategory, RagEntry, RagResults, RagSearchHit};

/// Minimum trigger-phrase length; shorter tokens cause false positives.
const MIN_TRIGGER_LEN: usize = 3;

struct CachedEntry {
    category: Option<RagCategory>,
    content: String,
    original_text: Option<String>,
    alternative: Option<String>,
    personas: HashSet<String>,
    contexts: HashSet<String>,
    tone_levels: HashSet<String>,
    sections: HashSet<String>,
    yellow_labels: HashSet<String>,
    trigger_phrases: Vec<String>,
    /// L2-normalized embedding.
    embedding: Vec<f32>,
}

#[derive(Default)]
struct Snapshot {
    entries: Vec<CachedEntry>,
}

/// Metadata filters applied before similarity scoring. Empty entry filters
/// match everything; a non-empty filter requires the query value to be a
/// member.
#[derive(Debug, Clone, Default)]
pub struct RagQueryFilters {
    pub persona: Option<String>,
    pub contexts: Vec<String>,
    pub tone_level: Option<String>,
    pub sections: Vec<String>,
    pub yellow_labels: Vec<String>,
}

/// Process-wide in-memory RAG index.
pub struct RagIndex {
    snapshot: ArcSwap<Snapshot>,
}

impl RagIndex {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::new(Arc::new(Snapshot::default())),
        }
    }

    /// Number of loaded entries.
    pub fn size(&self) -> usize {
        self.snapshot.load().entries.len()
    }

    /// Build the index from entries and swap it in. Returns the loaded count.
    pub fn load(&self, entries: Vec<RagEntry>) -> usize {
        let mut cached: Vec<CachedEntry> = Vec::with_capacity(entries.len());

        for entry in entries {
            let Some(blob) = entry.embedding_blob.as_deref() else {
                continue;
            };
            let embedding = match json_to_embedding(blob) {
                Ok(e) => l2_normalize(e),
                Err(_) => {
                    tracing::warn!("Skipping entry {}: invalid embedding", entry.id);
                    continue;
                }
            };

            let trigger_phrases: Vec<String> = entry
                .trigger_phrases
                .as_deref()
                .map(|raw| {
                    raw.split(',')
                        .map(|t| t.trim().to_lowercase())
                        .filter(|t| t.chars().count() >= MIN_TRIGGER_LEN)
                        .collect()
                })
                .unwrap_or_default();

            cached.push(CachedEntry {
                category: RagCategory::parse(&entry.category),
                content: entry.content,
                original_text: entry.original_text,
                alternative: entry.alternative,
                personas: parse_csv_filter(entry.personas.as_deref()),
                contexts: parse_csv_filter(entry.contexts.as_deref()),
                tone_levels: parse_csv_filter(entry.tone_levels.as_deref()),
                sections: parse_csv_filter(entry.sections.as_deref()),
                yellow_labels: parse_csv_filter(entry.yellow_labels.as_deref()),
                trigger_phrases,
                embedding,
            });
        }

        let count = cached.len();
        self.snapshot.store(Arc::new(Snapshot { entries: cached }));
        count
    }

    /// Hot reload from storage - atomic swap, no partially-built state is
    /// ever observable.
    pub fn reload(&self, store: &RagStore) -> Result<usize> {
        let entries = store.find_all_enabled()?;
        let count = self.load(entries);
        tracing::info!("RAG index reloaded: {} entries", count);
        Ok(count)
    }

    /// Search all categories and return aggregated results.
    pub fn search(
        &self,
        query_embedding: &[f32],
        original_text: &str,
        filters: &RagQueryFilters,
    ) -> RagResults {
        let snapshot = self.snapshot.load();
        if snapshot.entries.is_empty() {
            return RagResults::default();
        }

        let query = l2_normalize(query_embedding.to_vec());
        if query.iter().all(|v| *v == 0.0) {
            return RagResults::default();
        }

        let mut results = RagResults::default();
        for cat in RagCategory::ALL {
            let hits = search_category(&snapshot, &query, original_text, cat, filters);
            if !hits.is_empty() {
                let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
                tracing::debug!(
                    "RAG {}: {} hits, max={:.3}{}",
                    cat,
                    hits.len(),
                    scores.iter().cloned().fold(f32::MIN, f32::max),
                    if hits.iter().any(|h| h.used_fallback) {
                        " [fallback]"
                    } else {
                        ""
                    }
                );
            }
            *results.category_mut(cat) = hits;
        }

        results
    }
}

impl Default for RagIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn search_category(
    snapshot: &Snapshot,
    query: &[f32],
    original_text: &str,
    category: RagCategory,
    filters: &RagQueryFilters,
) -> Vec<RagSearchHit> {
    let config = category.config();

    // Step 1: category + metadata pre-filter
    let candidate_indices: Vec<usize> = snapshot
        .entries
        .iter()
        .enumerate()
        .filter(|(_, ce)| ce.category == Some(category) && matches_filters(ce, filters))
        .map(|(i, _)| i)
        .collect();

    // Step 2: for forbidden, lexical trigger-phrase matches
    let mut trigger_indices: HashSet<usize> = HashSet::new();
    if category == RagCategory::Forbidden {
        let normalized_text = original_text
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        for (i, ce) in snapshot.entries.iter().enumerate() {
            if ce.category != Some(RagCategory::Forbidden) {
                continue;
            }
            if ce
                .trigger_phrases
                .iter()
                .any(|t| normalized_text.contains(t.as_str()))
            {
                trigger_indices.insert(i);
            }
        }
    }

    if candidate_indices.is_empty() && trigger_indices.is_empty() {
        return Vec::new();
    }

    // Step 3: cosine similarity (dot product of L2-normalized vectors)
    let mut scored: Vec<(usize, f32)> = candidate_indices
        .iter()
        .map(|&i| (i, dot(&snapshot.entries[i].embedding, query)))
        .collect();

    let existing: HashSet<usize> = scored.iter().map(|(i, _)| *i).collect();
    for idx in trigger_indices {
        if !existing.contains(&idx) {
            scored.push((idx, 1.0));
        }
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    // Step 4: top_k*3 pre-candidates for MMR dedup
    let pre_candidates: Vec<(usize, f32)> = scored.into_iter().take(config.top_k * 3).collect();

    // Step 5: threshold filter
    let above_threshold: Vec<(usize, f32)> = pre_candidates
        .iter()
        .copied()
        .filter(|(_, score)| *score >= config.threshold)
        .collect();

    // Step 6: greedy MMR deduplication
    let mmr_threshold = settings().rag_mmr_duplicate_threshold;
    let mut selected = apply_mmr(snapshot, &above_threshold, config.top_k, mmr_threshold);

    // Step 7: pre-threshold fallback
    let mut used_fallback = false;
    if selected.is_empty() && config.fallback_top_k > 0 && !pre_candidates.is_empty() {
        selected = pre_candidates
            .iter()
            .take(config.fallback_top_k)
            .copied()
            .collect();
        used_fallback = true;
    }

    selected
        .into_iter()
        .map(|(idx, score)| {
            let ce = &snapshot.entries[idx];
            RagSearchHit {
                content: ce.content.clone(),
                score,
                category: category.name().to_string(),
                original_text: ce.original_text.clone(),
                alternative: ce.alternative.clone(),
                used_fallback,
            }
        })
        .collect()
}

/// Empty entry filter = match all; non-empty = query value must be a member.
fn matches_filters(ce: &CachedEntry, filters: &RagQueryFilters) -> bool {
    if !ce.personas.is_empty() {
        if let Some(persona) = &filters.persona {
            if !ce.personas.contains(&persona.to_uppercase()) {
                return false;
            }
        }
    }
    if !ce.contexts.is_empty() && !filters.contexts.is_empty() {
        let any = filters
            .contexts
            .iter()
            .any(|c| ce.contexts.contains(&c.to_uppercase()));
        if !any {
            return false;
        }
    }
    if !ce.tone_levels.is_empty() {
        if let Some(tone) = &filters.tone_level {
            if !ce.tone_levels.contains(&tone.to_uppercase()) {
                return false;
            }
        }
    }
    if !ce.sections.is_empty() && !filters.sections.is_empty() {
        let any = filters
            .sections
            .iter()
            .any(|s| ce.sections.contains(&s.to_uppercase()));
        if !any {
            return false;
        }
    }
    if !ce.yellow_labels.is_empty() && !filters.yellow_labels.is_empty() {
        let any = filters
            .yellow_labels
            .iter()
            .any(|l| ce.yellow_labels.contains(&l.to_uppercase()));
        if !any {
            return false;
        }
    }
    true
}

/// Greedy MMR: skip any candidate whose similarity to an already-selected
/// vector exceeds the duplicate threshold.
fn apply_mmr(
    snapshot: &Snapshot,
    candidates: &[(usize, f32)],
    top_k: usize,
    mmr_threshold: f32,
) -> Vec<(usize, f32)> {
    let mut selected: Vec<(usize, f32)> = Vec::new();
    for &(idx, score) in candidates {
        if selected.len() >= top_k {
            break;
        }
        let duplicate = selected.iter().any(|&(sel_idx, _)| {
            dot(
                &snapshot.entries[idx].embedding,
                &snapshot.entries[sel_idx].embedding,
            ) > mmr_threshold
        });
        if !duplicate {
            selected.push((idx, score));
        }
    }
    selected
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::types::embedding_to_json;
    use pretty_assertions::assert_eq;

    fn entry(category: &str, content: &str, embedding: &[f32]) -> RagEntry {
        RagEntry {
            category: category.to_string(),
            content: content.to_string(),
            embedding_blob: Some(embedding_to_json(embedding)),
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_index_returns_no_results() {
        let index = RagIndex::new();
        let results = index.search(&[1.0, 0.0], "텍스트", &RagQueryFilters::default());
        assert!(results.is_empty());
    }

    #[test]
    fn test_zero_query_returns_no_results() {
        let index = RagIndex::new();
        index.load(vec![entry("cushion", "확인해 보니", &[1.0, 0.0])]);
        let results = index.search(&[0.0, 0.0], "텍스트", &RagQueryFilters::default());
        assert!(results.is_empty());
    }

    #[test]
    fn test_threshold_respected() {
        let index = RagIndex::new();
        index.load(vec![
            entry("cushion", "가까운 항목", &[1.0, 0.0]),
            entry("cushion", "먼 항목", &[0.0, 1.0]),
        ]);

        let results = index.search(&[1.0, 0.0], "텍스트", &RagQueryFilters::default());
        assert_eq!(results.cushion.len(), 1);
        assert_eq!(results.cushion[0].content, "가까운 항목");
        assert!(results.cushion[0].score >= RagCategory::Cushion.config().threshold);
        assert!(!results.cushion[0].used_fallback);
    }

    #[test]
    fn test_fallback_below_threshold() {
        let index = RagIndex::new();
        // Similarity ~0.6: below the cushion threshold (0.78), fallback_k=1
        index.load(vec![entry("cushion", "애매한 항목", &[0.6, 0.8])]);

        let results = index.search(&[1.0, 0.0], "텍스트", &RagQueryFilters::default());
        assert_eq!(results.cushion.len(), 1);
        assert!(results.cushion[0].used_fallback);
    }

    #[test]
    fn test_no_fallback_for_policy() {
        let index = RagIndex::new();
        // policy has fallback_k = 0
        index.load(vec![entry("policy", "애매한 규정", &[0.6, 0.8])]);
        let results = index.search(&[1.0, 0.0], "텍스트", &RagQueryFilters::default());
        assert!(results.policy.is_empty());
    }

    #[test]
    fn test_mmr_removes_near_duplicates() {
        let index = RagIndex::new();
        index.load(vec![
            entry("cushion", "항목 A", &[1.0, 0.0, 0.0]),
            entry("cushion", "항목 A 복제", &[0.999, 0.01, 0.0]),
            entry("cushion", "항목 B", &[0.8, 0.6, 0.0]),
        ]);

        let results = index.search(&[1.0, 0.0, 0.0], "텍스트", &RagQueryFilters::default());
        let contents: Vec<&str> = results.cushion.iter().map(|h| h.content.as_str()).collect();
        assert!(contents.contains(&"항목 A"));
        assert!(!contents.contains(&"항목 A 복제"));
        assert!(contents.contains(&"항목 B"));
    }

    #[test]
    fn test_metadata_prefilter() {
        let index = RagIndex::new();
        let mut boss_only = entry("cushion", "상사 전용", &[1.0, 0.0]);
        boss_only.personas = Some("BOSS".to_string());
        index.load(vec![boss_only, entry("cushion", "공용", &[1.0, 0.0])]);

        let filters = RagQueryFilters {
            persona: Some("CLIENT".to_string()),
            ..Default::default()
        };
        let results = index.search(&[1.0, 0.0], "텍스트", &filters);
        let contents: Vec<&str> = results.cushion.iter().map(|h| h.content.as_str()).collect();
        assert!(!contents.contains(&"상사 전용"));
        assert!(contents.contains(&"공용"));
    }

    #[test]
    fn test_forbidden_trigger_phrases_score_one() {
        let index = RagIndex::new();
        let mut forbidden = entry("forbidden", "어쨌든 금지", &[0.0, 1.0]);
        forbidden.trigger_phrases = Some("어쨌든,아무튼".to_string());
        index.load(vec![forbidden]);

        let results = index.search(
            &[1.0, 0.0],
            "어쨌든 빨리 해주세요",
            &RagQueryFilters::default(),
        );
        assert_eq!(results.forbidden.len(), 1);
        assert_eq!(results.forbidden[0].score, 1.0);
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let store = RagStore::open_in_memory().unwrap();
        store
            .upsert(entry("cushion", "하나", &[1.0, 0.0]))
            .unwrap();

        let index = RagIndex::new();
        assert_eq!(index.reload(&store).unwrap(), 1);
        assert_eq!(index.size(), 1);

        store.upsert(entry("cushion", "둘", &[0.0, 1.0])).unwrap();
        assert_eq!(index.reload(&store).unwrap(), 2);
        assert_eq!(index.size(), 2);
    }

    #[test]
    fn test_entries_without_embeddings_skipped() {
        let index = RagIndex::new();
        let mut no_embedding = entry("cushion", "빈 항목", &[1.0]);
        no_embedding.embedding_blob = None;
        assert_eq!(index.load(vec![no_embedding]), 0);
    }
}
