//! Template selection - PURPOSE → keyword overrides → S2 enforcement.

use std::sync::OnceLock;

use regex::Regex;

use crate::label::LabelStats;
use crate::types::{Purpose, Topic};

use super::registry::TemplateRegistry;
use super::types::{StructureSection, StructureTemplate};

/// Selection outcome with the effective (possibly S2-injected) section list.
#[derive(Debug, Clone)]
pub struct TemplateSelectionResult {
    pub template: StructureTemplate,
    pub s2_enforced: bool,
    pub effective_sections: Vec<StructureSection>,
}

fn purpose_template_id(purpose: Purpose) -> &'static str {
    match purpose {
        Purpose::InfoDelivery => "T01_GENERAL",
        Purpose::DataRequest => "T02_DATA_REQUEST",
        Purpose::ScheduleCoordination => "T04_SCHEDULE",
        Purpose::ApologyRecovery => "T05_APOLOGY",
        Purpose::ResponsibilitySeparation => "T09_BLAME_SEPARATION",
        Purpose::RejectionNotice => "T06_REJECTION",
        Purpose::RefundRejection => "T11_REFUND_REJECTION",
        Purpose::WarningPrevention => "T12_WARNING_PREVENTION",
        Purpose::RelationshipRecovery => "T10_RELATIONSHIP_RECOVERY",
        Purpose::NextActionConfirm => "T01_GENERAL",
        Purpose::Announcement => "T07_ANNOUNCEMENT",
    }
}

fn refund_keywords() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new("환불|취소|반품|결제\\s*취소|카드\\s*취소|refund|cancel").unwrap()
    })
}

/// Pick a template and enforce the S2 section where labels demand it.
pub fn select_template(
    registry: &TemplateRegistry,
    topic: Option<Topic>,
    purpose: Option<Purpose>,
    label_stats: &LabelStats,
    masked_text: Option<&str>,
) -> TemplateSelectionResult {
    // 1. PURPOSE provided → direct mapping; else default
    let mut template_id = match purpose {
        Some(p) => {
            let id = purpose_template_id(p);
            tracing::info!("[TemplateSelector] Selected by PURPOSE: {:?} → {}", p, id);
            id
        }
        None => {
            tracing::info!("[TemplateSelector] Default template: T01_GENERAL");
            "T01_GENERAL"
        }
    };

    // 2. Topic override: REFUND_CANCEL + rejection-like → T11
    if topic == Some(Topic::RefundCancel) && is_rejection_like(purpose) {
        template_id = "T11_REFUND_REJECTION";
        tracing::info!("[TemplateSelector] Topic override → T11_REFUND_REJECTION");
    }

    // 3. Keyword override: refund keywords + rejection-like labels
    if template_id != "T11_REFUND_REJECTION" {
        if let Some(text) = masked_text {
            if refund_keywords().is_match(text)
                && (label_stats.has_negative_feedback || is_rejection_like(purpose))
            {
                template_id = "T11_REFUND_REJECTION";
                tracing::info!("[TemplateSelector] Keyword override → T11_REFUND_REJECTION");
            }
        }
    }

    let template = registry.get(template_id).clone();
    let (effective_sections, s2_enforced) =
        apply_s2_enforcement(template.section_order.clone(), label_stats);

    TemplateSelectionResult {
        template,
        s2_enforced,
        effective_sections,
    }
}

/// If labels include ACCOUNTABILITY or NEGATIVE_FEEDBACK and the order lacks
/// S2_OUR_EFFORT, insert it right after S1 (or S0 if S1 is absent).
pub fn apply_s2_enforcement(
    mut sections: Vec<StructureSection>,
    label_stats: &LabelStats,
) -> (Vec<StructureSection>, bool) {
    let needs_s2 = label_stats.has_accountability || label_stats.has_negative_feedback;
    if !needs_s2 || sections.contains(&StructureSection::S2OurEffort) {
        return (sections, false);
    }

    let insert_after = sections
        .iter()
        .position(|s| *s == StructureSection::S1Acknowledge)
        .or_else(|| {
            sections
                .iter()
                .position(|s| *s == StructureSection::S0Greeting)
        });
    let insert_idx = insert_after.map(|i| i + 1).unwrap_or(0);
    sections.insert(insert_idx, StructureSection::S2OurEffort);
    tracing::info!("[TemplateSelector] S2 enforced for ACCOUNTABILITY/NEGATIVE_FEEDBACK");
    (sections, true)
}

fn is_rejection_like(purpose: Option<Purpose>) -> bool {
    matches!(
        purpose,
        Some(Purpose::RejectionNotice) | Some(Purpose::RefundRejection)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stats_with(accountability: bool, negative_feedback: bool) -> LabelStats {
        LabelStats {
            has_accountability: accountability,
            has_negative_feedback: negative_feedback,
            ..Default::default()
        }
    }

    #[test]
    fn test_purpose_mapping() {
        let registry = TemplateRegistry::new();
        let result = select_template(
            &registry,
            None,
            Some(Purpose::ApologyRecovery),
            &LabelStats::default(),
            None,
        );
        assert_eq!(result.template.id, "T05_APOLOGY");
    }

    #[test]
    fn test_default_is_t01() {
        let registry = TemplateRegistry::new();
        let result = select_template(&registry, None, None, &LabelStats::default(), None);
        assert_eq!(result.template.id, "T01_GENERAL");
        assert!(!result.s2_enforced);
    }

    #[test]
    fn test_topic_override_to_t11() {
        let registry = TemplateRegistry::new();
        let result = select_template(
            &registry,
            Some(Topic::RefundCancel),
            Some(Purpose::RejectionNotice),
            &LabelStats::default(),
            None,
        );
        assert_eq!(result.template.id, "T11_REFUND_REJECTION");
    }

    #[test]
    fn test_keyword_override_needs_rejection_signal() {
        let registry = TemplateRegistry::new();

        // Refund keyword alone is not enough
        let plain = select_template(
            &registry,
            None,
            None,
            &LabelStats::default(),
            Some("환불해 주세요"),
        );
        assert_eq!(plain.template.id, "T01_GENERAL");

        // Keyword + NEGATIVE_FEEDBACK flips to T11
        let flipped = select_template(
            &registry,
            None,
            None,
            &stats_with(false, true),
            Some("환불해 주세요"),
        );
        assert_eq!(flipped.template.id, "T11_REFUND_REJECTION");
    }

    #[test]
    fn test_s2_enforcement_inserts_after_s1() {
        let registry = TemplateRegistry::new();
        let result = select_template(&registry, None, None, &stats_with(true, false), None);
        assert!(result.s2_enforced);

        let s1_idx = result
            .effective_sections
            .iter()
            .position(|s| *s == StructureSection::S1Acknowledge)
            .unwrap();
        assert_eq!(
            result.effective_sections[s1_idx + 1],
            StructureSection::S2OurEffort
        );
    }

    #[test]
    fn test_s2_enforcement_after_s0_when_no_s1() {
        let registry = TemplateRegistry::new();
        let announcement = registry.get("T07_ANNOUNCEMENT");
        let (sections, enforced) =
            apply_s2_enforcement(announcement.section_order.clone(), &stats_with(false, true));
        assert!(enforced);
        assert_eq!(sections[1], StructureSection::S2OurEffort);
    }

    #[test]
    fn test_no_double_s2() {
        let registry = TemplateRegistry::new();
        let t11 = registry.get("T11_REFUND_REJECTION");
        let (sections, enforced) =
            apply_s2_enforcement(t11.section_order.clone(), &stats_with(true, true));
        assert!(!enforced);
        let count = sections
            .iter()
            .filter(|s| **s == StructureSection::S2OurEffort)
            .count();
        assert_eq!(count, 1);
    }
}
