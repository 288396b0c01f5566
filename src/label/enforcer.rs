//! Server-side RED label enforcer.
//!
//! Two-tier classification:
//! - Confirmed patterns: immediately override to RED (profanity, ability
//!   denial, mockery)
//! - Ambiguous patterns: GREEN→YELLOW upgrade only (soft profanity)
//!
//! Patterns run over normalized text (whitespace/special chars removed) to
//! prevent spacing bypass. The pass is monotone on tiers: it only ever raises.

use std::sync::OnceLock;

use regex::Regex;

use super::types::{LabelTier, LabeledSegment, SegmentLabel};

struct EnforcerPatterns {
    strip: Regex,
    profanity: Regex,
    mockery_praise: Regex,
    mockery_marker: Regex,
    ability_denial: Regex,
    ambiguous: Regex,
}

fn patterns() -> &'static EnforcerPatterns {
    static PATTERNS: OnceLock<EnforcerPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| EnforcerPatterns {
        strip: Regex::new(r"[\s.,!?~^]+").unwrap(),
        // Profanity including consonant abbreviations and partial censoring
        profanity: Regex::new("시발|씨발|시[xX발]|ㅅㅂ|ㅄ|병신|존나|좆|꺼져|닥쳐").unwrap(),
        // Sarcastic praise: positive verb + mockery token nearby
        mockery_praise: Regex::new("잘하시|잘하네|대단하시|훌륭하시").unwrap(),
        mockery_marker: Regex::new("ㅋㅋ|ㅎㅎ|\\^\\^").unwrap(),
        // Direct ability denial
        ability_denial: Regex::new("그것도못|뇌가있|머리가있|무능|생각이란걸").unwrap(),
        // Soft profanity / strong emotion: upgrade only, never RED on its own
        ambiguous: Regex::new("미친|개같|빡치|어이없|어이가없").unwrap(),
    })
}

/// Apply the deterministic RED post-pass over labeled segments.
pub fn enforce(segments: Vec<LabeledSegment>) -> Vec<LabeledSegment> {
    let p = patterns();

    segments
        .into_iter()
        .map(|seg| {
            let normalized = p.strip.replace_all(&seg.text, "");

            if p.profanity.is_match(&normalized) {
                return override_label(seg, SegmentLabel::Aggression, "profanity");
            }
            if p.mockery_praise.is_match(&normalized) && p.mockery_marker.is_match(&normalized) {
                return override_label(seg, SegmentLabel::Aggression, "mockery");
            }
            if p.ability_denial.is_match(&normalized) {
                return override_label(seg, SegmentLabel::PersonalAttack, "ability denial");
            }
            if seg.tier() == LabelTier::Green && p.ambiguous.is_match(&normalized) {
                tracing::info!(
                    "[RedEnforcer] Ambiguous pattern: {} GREEN -> EMOTIONAL",
                    seg.segment_id
                );
                return LabeledSegment {
                    label: SegmentLabel::Emotional,
                    ..seg
                };
            }

            seg
        })
        .collect()
}

fn override_label(seg: LabeledSegment, label: SegmentLabel, reason: &str) -> LabeledSegment {
    if seg.label != label {
        tracing::info!(
            "[RedEnforcer] Confirmed pattern ({}): {} {} -> {}",
            reason,
            seg.segment_id,
            seg.label,
            label
        );
    }
    LabeledSegment { label, ..seg }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seg(id: &str, label: SegmentLabel, text: &str) -> LabeledSegment {
        LabeledSegment::new(id, label, text, 0, text.len())
    }

    #[test]
    fn test_profanity_forces_aggression() {
        let out = enforce(vec![seg("T1", SegmentLabel::CoreFact, "아 진짜 시발 왜 이래요")]);
        assert_eq!(out[0].label, SegmentLabel::Aggression);
    }

    #[test]
    fn test_consonant_profanity_caught_despite_spacing() {
        let out = enforce(vec![seg("T1", SegmentLabel::Courtesy, "ㅅ ㅂ 이게 뭡니까")]);
        assert_eq!(out[0].label, SegmentLabel::Aggression);
    }

    #[test]
    fn test_mockery_needs_marker() {
        let plain = enforce(vec![seg("T1", SegmentLabel::Courtesy, "정말 잘하시네요")]);
        assert_eq!(plain[0].label, SegmentLabel::Courtesy);

        let mocking = enforce(vec![seg("T1", SegmentLabel::Courtesy, "정말 잘하시네요 ㅋㅋ")]);
        assert_eq!(mocking[0].label, SegmentLabel::Aggression);
    }

    #[test]
    fn test_ability_denial_is_personal_attack() {
        let out = enforce(vec![seg("T1", SegmentLabel::NegativeFeedback, "그것도 못 하세요?")]);
        assert_eq!(out[0].label, SegmentLabel::PersonalAttack);
    }

    #[test]
    fn test_ambiguous_upgrades_green_only() {
        let green = enforce(vec![seg("T1", SegmentLabel::CoreFact, "미친 일정이네요")]);
        assert_eq!(green[0].label, SegmentLabel::Emotional);

        // YELLOW stays untouched by the ambiguous pass
        let yellow = enforce(vec![seg("T1", SegmentLabel::Accountability, "미친 일정이네요")]);
        assert_eq!(yellow[0].label, SegmentLabel::Accountability);
    }

    #[test]
    fn test_tier_monotonicity() {
        let inputs = [
            ("멀쩡한 보고 문장입니다", SegmentLabel::CoreFact),
            ("일정 때문에 짜증이 납니다", SegmentLabel::Emotional),
            ("시발 진짜", SegmentLabel::Aggression),
            ("그것도 못 하냐", SegmentLabel::NegativeFeedback),
        ];
        for (text, label) in inputs {
            let before = seg("T1", label, text);
            let before_tier = before.tier();
            let after = enforce(vec![before]);
            assert!(
                after[0].tier() >= before_tier,
                "tier must never decrease for {:?}",
                text
            );
        }
    }

    #[test]
    fn test_clean_text_untouched() {
        let out = enforce(vec![seg("T1", SegmentLabel::Request, "보고서 확인 부탁드립니다")]);
        assert_eq!(out[0].label, SegmentLabel::Request);
    }
}
