//! Server-side regex scanner for all-GREEN yellow recovery.
//!
//! When ALL segments (4+) come back GREEN, this scanner checks for Korean
//! patterns that strongly suggest YELLOW-worthy content was missed. If found,
//! it upgrades up to MAX_UPGRADES GREEN segments to YELLOW, avoiding an
//! expensive LLM diversity retry.
//!
//! 4 pattern categories:
//!   1. Blame + generalization (매번/맨날/항상/도대체 + recipient reference)
//!   2. Direct emotional expression (답답/화가/짜증/열받/미치겠/환장)
//!   3. Speculation / assertion (틀림없이/확실히/아마/같다/듯/분명)
//!   4. Defensive structure ("내 탓 하려는"/"말해두는데"/"난 ~했고")

use std::sync::OnceLock;

use regex::Regex;

use crate::types::Segment;

use super::types::{LabelTier, LabeledSegment, SegmentLabel};

pub const SCORE_THRESHOLD: i32 = 2;
pub const MAX_UPGRADES: usize = 2;

/// One recommended GREEN→YELLOW upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YellowUpgrade {
    pub segment_id: String,
    pub new_label: SegmentLabel,
    pub reason: String,
    pub score: i32,
}

struct ScannerPatterns {
    recipient: Regex,
    generalizer: Regex,
    emotional_strong: Regex,
    emotional_soft: Regex,
    speculation_strong: Regex,
    speculation_soft: Regex,
    defense_strong: Regex,
    defense_soft: Regex,
}

fn patterns() -> &'static ScannerPatterns {
    static PATTERNS: OnceLock<ScannerPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ScannerPatterns {
        recipient: Regex::new("상대|님|너희|귀사|담당").unwrap(),
        generalizer: Regex::new("매번|맨날|항상|도대체").unwrap(),
        emotional_strong: Regex::new("답답|화가|짜증|열받|미치겠|환장").unwrap(),
        emotional_soft: Regex::new("정말|너무").unwrap(),
        speculation_strong: Regex::new("틀림없이|확실히").unwrap(),
        speculation_soft: Regex::new("아마|것\\s*같다|것\\s*같아|같다|듯|분명").unwrap(),
        defense_strong: Regex::new("내\\s*탓\\s*하려|말해\\s*두는데").unwrap(),
        defense_soft: Regex::new("난\\s.*했고|최선을\\s*다했|제\\s*잘못도\\s*있지만").unwrap(),
    })
}

/// Scan GREEN segments for YELLOW-worthy patterns.
///
/// Only called when all segments are GREEN and there are 4+ of them. Returns
/// up to MAX_UPGRADES recommendations with score >= SCORE_THRESHOLD, highest
/// score first.
pub fn scan_yellow_triggers(
    segments: &[Segment],
    labeled_segments: &[LabeledSegment],
) -> Vec<YellowUpgrade> {
    let p = patterns();
    let mut candidates: Vec<YellowUpgrade> = Vec::new();

    for seg in segments {
        let Some(ls) = labeled_segments.iter().find(|l| l.segment_id == seg.id) else {
            continue;
        };
        if ls.tier() != LabelTier::Green {
            continue;
        }

        let text = seg.text.as_str();
        let mut total_score = 0;
        let mut reasons: Vec<String> = Vec::new();
        let mut best_label: Option<SegmentLabel> = None;
        let mut best_label_score = 0;

        // 1. Blame + generalization: compound scorer
        let has_generalizer = p.generalizer.is_match(text);
        let has_recipient = p.recipient.is_match(text);
        let blame_score = if has_generalizer && has_recipient {
            reasons.push("blame(generalizer+recipient(strong))".to_string());
            2
        } else if has_generalizer {
            reasons.push("blame(generalizer(soft))".to_string());
            1
        } else {
            0
        };
        if blame_score > best_label_score {
            best_label_score = blame_score;
            best_label = Some(if has_recipient {
                SegmentLabel::Accountability
            } else {
                SegmentLabel::NegativeFeedback
            });
        }
        total_score += blame_score;

        // 2–4. Remaining categories: strong +2, soft +1
        let categories: [(&str, SegmentLabel, &Regex, &Regex); 3] = [
            (
                "emotional_expression",
                SegmentLabel::Emotional,
                &p.emotional_strong,
                &p.emotional_soft,
            ),
            (
                "speculation",
                SegmentLabel::ExcessDetail,
                &p.speculation_strong,
                &p.speculation_soft,
            ),
            (
                "defense",
                SegmentLabel::SelfJustification,
                &p.defense_strong,
                &p.defense_soft,
            ),
        ];

        for (name, label, strong, soft) in categories {
            let mut cat_score = 0;
            let mut cat_reasons: Vec<&str> = Vec::new();
            if strong.is_match(text) {
                cat_score += 2;
                cat_reasons.push("strong");
            }
            if soft.is_match(text) {
                cat_score += 1;
                cat_reasons.push("soft");
            }
            if cat_score > 0 {
                total_score += cat_score;
                reasons.push(format!("{}({})", name, cat_reasons.join("+")));
                if cat_score > best_label_score {
                    best_label_score = cat_score;
                    best_label = Some(label);
                }
            }
        }

        if total_score >= SCORE_THRESHOLD {
            if let Some(new_label) = best_label {
                candidates.push(YellowUpgrade {
                    segment_id: seg.id.clone(),
                    new_label,
                    reason: reasons.join("; "),
                    score: total_score,
                });
            }
        }
    }

    candidates.sort_by(|a, b| b.score.cmp(&a.score));
    candidates.truncate(MAX_UPGRADES);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pair(id: &str, text: &str) -> (Segment, LabeledSegment) {
        let order: usize = id[1..].parse().unwrap();
        (
            Segment::new(order, text, 0, text.len()),
            LabeledSegment::new(id, SegmentLabel::CoreFact, text, 0, text.len()),
        )
    }

    #[test]
    fn test_blame_generalization_strong() {
        let (s1, l1) = pair("T1", "매번 이런 식으로 님이 일을 늦게 주시면 저희도 힘듭니다");
        let (s2, l2) = pair("T2", "다음부터는 제때 주세요");
        let (s3, l3) = pair("T3", "감사합니다");
        let (s4, l4) = pair("T4", "확인 부탁드립니다");

        let upgrades = scan_yellow_triggers(
            &[s1, s2, s3, s4],
            &[l1, l2, l3, l4],
        );
        assert!(!upgrades.is_empty());
        assert_eq!(upgrades[0].segment_id, "T1");
        assert_eq!(upgrades[0].new_label, SegmentLabel::Accountability);
        assert!(upgrades[0].score >= SCORE_THRESHOLD);
    }

    #[test]
    fn test_generalizer_without_recipient_is_soft() {
        let (s1, l1) = pair("T1", "맨날 이렇게 됩니다");
        let upgrades = scan_yellow_triggers(&[s1], &[l1]);
        // Soft alone (+1) is below threshold
        assert!(upgrades.is_empty());
    }

    #[test]
    fn test_emotional_strong_plus_soft_meets_threshold() {
        let (s1, l1) = pair("T1", "정말 답답해서 연락드립니다");
        let upgrades = scan_yellow_triggers(&[s1], &[l1]);
        assert_eq!(upgrades.len(), 1);
        assert_eq!(upgrades[0].new_label, SegmentLabel::Emotional);
        assert_eq!(upgrades[0].score, 3);
    }

    #[test]
    fn test_non_green_segments_skipped() {
        let (s1, _) = pair("T1", "정말 답답해서 연락드립니다");
        let labeled = LabeledSegment::new("T1", SegmentLabel::Emotional, &s1.text, 0, s1.end);
        assert!(scan_yellow_triggers(&[s1], &[labeled]).is_empty());
    }

    #[test]
    fn test_max_two_upgrades() {
        let (s1, l1) = pair("T1", "정말 답답해서 화가 납니다");
        let (s2, l2) = pair("T2", "틀림없이 분명 서버 문제일 겁니다");
        let (s3, l3) = pair("T3", "말해 두는데 난 최선을 다했고 끝까지 했습니다");
        let (s4, l4) = pair("T4", "매번 님이 이러시니 정말 곤란합니다");

        let upgrades = scan_yellow_triggers(&[s1, s2, s3, s4], &[l1, l2, l3, l4]);
        assert_eq!(upgrades.len(), MAX_UPGRADES);
        // Sorted by score descending
        assert!(upgrades[0].score >= upgrades[1].score);
    }

    #[test]
    fn test_clean_segments_no_upgrade() {
        let (s1, l1) = pair("T1", "회의 자료를 전달드립니다");
        let (s2, l2) = pair("T2", "검토 부탁드립니다");
        assert!(scan_yellow_triggers(&[s1, s2], &[l1, l2]).is_empty());
    }
}
