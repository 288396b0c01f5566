//! Property-based tests for the pipeline's structural invariants.
//!
//! These cover the contracts the rest of the system leans on:
//!
//! - Normalization is idempotent
//! - Extracted spans are pairwise disjoint and sorted by start
//! - Mask followed by unmask restores the original text
//! - Segmentation texts appear in the masked text in order, with strictly
//!   increasing starts, and never cross a placeholder
//! - Redaction counts match RED-tier cardinality
//! - The RED enforcer never lowers a tier

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::label::{enforce, LabelTier, LabeledSegment, SegmentLabel};
    use crate::preprocess::{extract, mask, normalize, unmask};
    use crate::redaction;
    use crate::segment::{segment_with, SegmenterConfig};

    // Strategy: mixed Korean/ASCII message fragments with lockable surfaces
    fn message_fragment() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("보고서 제출이 늦어졌습니다".to_string()),
            Just("내일까지 부탁드립니다".to_string()),
            Just("user@example.com 으로 연락주세요".to_string()),
            Just("2024-03-15 까지입니다".to_string()),
            Just("회의는 오후 3시 입니다".to_string()),
            Just("report_final.xlsx 확인 바랍니다".to_string()),
            Just("총 50,000원 입니다".to_string()),
            Just("정말 감사합니다".to_string()),
            Just("어쨌든 확인해 주세요".to_string()),
            Just("PROJ-123 이슈 관련입니다".to_string()),
        ]
    }

    fn message() -> impl Strategy<Value = String> {
        prop::collection::vec(message_fragment(), 1..6).prop_map(|parts| parts.join(". "))
    }

    fn any_label() -> impl Strategy<Value = SegmentLabel> {
        prop::sample::select(SegmentLabel::all().to_vec())
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(input in "[ \t가-힣a-z@.\n]{0,120}") {
            let once = normalize(&input);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn extracted_spans_disjoint_and_sorted(text in message()) {
            let normalized = normalize(&text);
            let spans = extract(&normalized);
            for w in spans.windows(2) {
                prop_assert!(w[0].start < w[1].start, "starts must increase");
                prop_assert!(w[0].end <= w[1].start, "spans must not overlap");
            }
            for span in &spans {
                prop_assert_eq!(&normalized[span.start..span.end], span.original_text.as_str());
            }
        }

        #[test]
        fn mask_unmask_roundtrip(text in message()) {
            let normalized = normalize(&text);
            let spans = extract(&normalized);
            let masked = mask(&normalized, &spans);
            let unmasked = unmask(&masked, &spans);
            prop_assert_eq!(unmasked.text, normalized);
            prop_assert!(unmasked.missing_spans.is_empty());
        }

        #[test]
        fn segmentation_invariants(text in message()) {
            let normalized = normalize(&text);
            let spans = extract(&normalized);
            let masked = mask(&normalized, &spans);
            let segments = segment_with(&masked, &SegmenterConfig::default());

            // Starts strictly increase
            for w in segments.windows(2) {
                prop_assert!(w[0].start < w[1].start);
            }

            // Trimmed texts appear in the masked text in order
            let mut cursor = 0usize;
            for seg in &segments {
                // Merged units join with a single space; check word-wise
                for word in seg.text.split_whitespace() {
                    let found = masked[cursor..].find(word);
                    prop_assert!(found.is_some(), "'{}' not found after {}", word, cursor);
                    cursor += found.unwrap() + word.len();
                }
            }

            // No segment splits a placeholder
            for seg in &segments {
                let opens = seg.text.matches("{{").count();
                let closes = seg.text.matches("}}").count();
                prop_assert_eq!(opens, closes, "unbalanced placeholder in '{}'", seg.text);
            }
        }

        #[test]
        fn labels_closed_set_and_redaction_count(
            labels in prop::collection::vec(any_label(), 1..12)
        ) {
            let segments: Vec<LabeledSegment> = labels
                .iter()
                .enumerate()
                .map(|(i, label)| {
                    LabeledSegment::new(format!("T{}", i + 1), *label, "세그먼트 내용", i * 10, i * 10 + 7)
                })
                .collect();

            let result = redaction::process(&segments);
            let red_cardinality = segments.iter().filter(|s| s.tier() == LabelTier::Red).count();
            prop_assert_eq!(result.red_count, red_cardinality);
            prop_assert_eq!(result.redaction_map.len(), red_cardinality);

            let yellow_cardinality = segments.iter().filter(|s| s.tier() == LabelTier::Yellow).count();
            prop_assert_eq!(result.yellow_count, yellow_cardinality);
        }

        #[test]
        fn enforcer_is_tier_monotone(
            label in any_label(),
            text in message_fragment()
        ) {
            let before = LabeledSegment::new("T1", label, &text, 0, text.len());
            let before_tier = before.tier();
            let after = enforce(vec![before]);
            prop_assert!(after[0].tier() >= before_tier);
        }
    }
}
