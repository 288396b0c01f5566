//! Redaction - counts RED/YELLOW segments and builds the redaction map.
//!
//! With the JSON segment manifest, redaction only counts tiers and records a
//! `[REDACTED:<LABEL>_<k>]` → original-text map consumed by the output
//! validator's reentry check. The final model receives RED segments as
//! `text: null` and never sees the markers.

use std::collections::HashMap;

use crate::label::{LabelTier, LabeledSegment, SegmentLabel};

/// Redaction outcome.
#[derive(Debug, Clone, Default)]
pub struct RedactionResult {
    pub red_count: usize,
    pub yellow_count: usize,
    pub redaction_map: HashMap<String, String>,
}

/// Count tiers and build the RED redaction map.
pub fn process(labeled_segments: &[LabeledSegment]) -> RedactionResult {
    let mut redaction_map = HashMap::new();
    let mut red_counters: HashMap<SegmentLabel, usize> = HashMap::new();
    let mut red_count = 0;
    let mut yellow_count = 0;

    for ls in labeled_segments {
        match ls.tier() {
            LabelTier::Red => {
                let count = red_counters.entry(ls.label).or_insert(0);
                *count += 1;
                let marker = format!("[REDACTED:{}_{}]", ls.label.name(), count);
                redaction_map.insert(marker, ls.text.clone());
                red_count += 1;
            }
            LabelTier::Yellow => yellow_count += 1,
            LabelTier::Green => {}
        }
    }

    tracing::info!(
        "[Redaction] RED={}, YELLOW={}, GREEN={}",
        red_count,
        yellow_count,
        labeled_segments.len() - red_count - yellow_count
    );

    RedactionResult {
        red_count,
        yellow_count,
        redaction_map,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seg(id: &str, label: SegmentLabel, text: &str) -> LabeledSegment {
        LabeledSegment::new(id, label, text, 0, text.len())
    }

    #[test]
    fn test_counts_and_markers() {
        let segments = vec![
            seg("T1", SegmentLabel::CoreFact, "사실"),
            seg("T2", SegmentLabel::Emotional, "감정"),
            seg("T3", SegmentLabel::Aggression, "공격 1"),
            seg("T4", SegmentLabel::Aggression, "공격 2"),
            seg("T5", SegmentLabel::PureGrumble, "넋두리"),
        ];
        let result = process(&segments);
        assert_eq!(result.red_count, 3);
        assert_eq!(result.yellow_count, 1);
        assert_eq!(
            result.redaction_map.get("[REDACTED:AGGRESSION_1]").unwrap(),
            "공격 1"
        );
        assert_eq!(
            result.redaction_map.get("[REDACTED:AGGRESSION_2]").unwrap(),
            "공격 2"
        );
        assert_eq!(
            result.redaction_map.get("[REDACTED:PURE_GRUMBLE_1]").unwrap(),
            "넋두리"
        );
    }

    #[test]
    fn test_red_count_matches_red_tier_cardinality() {
        let segments = vec![
            seg("T1", SegmentLabel::PersonalAttack, "a"),
            seg("T2", SegmentLabel::PrivateTmi, "b"),
            seg("T3", SegmentLabel::Request, "c"),
        ];
        let result = process(&segments);
        let red_tier_count = segments
            .iter()
            .filter(|s| s.tier() == LabelTier::Red)
            .count();
        assert_eq!(result.red_count, red_tier_count);
        assert_eq!(result.redaction_map.len(), red_tier_count);
    }

    #[test]
    fn test_empty_input() {
        let result = process(&[]);
        assert_eq!(result.red_count, 0);
        assert!(result.redaction_map.is_empty());
    }
}
