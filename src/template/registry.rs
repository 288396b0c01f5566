//! Template registry - 12 purpose-based templates (T01-T12).

use std::collections::HashMap;

use crate::types::Persona;

use super::types::{SectionSkipRule, StructureSection, StructureTemplate};
use super::types::StructureSection::{
    S0Greeting as S0, S1Acknowledge as S1, S2OurEffort as S2, S3Facts as S3,
    S4Responsibility as S4, S5Request as S5, S6Options as S6, S7Policy as S7, S8Closing as S8,
};

/// Registry of the 12 structure templates, insertion-ordered.
pub struct TemplateRegistry {
    templates: Vec<StructureTemplate>,
}

fn boss_prof_official_rules() -> HashMap<Persona, SectionSkipRule> {
    HashMap::from([
        (Persona::Boss, SectionSkipRule::shorten(&[S1])),
        (Persona::Professor, SectionSkipRule::shorten(&[S1])),
        (Persona::Official, SectionSkipRule::shorten(&[S1])),
    ])
}

fn client_expand_s1_s2() -> HashMap<Persona, SectionSkipRule> {
    HashMap::from([
        (Persona::Client, SectionSkipRule::expand(&[S1, S2])),
        (Persona::Boss, SectionSkipRule::shorten(&[S1])),
        (Persona::Professor, SectionSkipRule::shorten(&[S1])),
        (Persona::Official, SectionSkipRule::shorten(&[S1])),
    ])
}

fn parent_expand_s1() -> HashMap<Persona, SectionSkipRule> {
    HashMap::from([
        (Persona::Parent, SectionSkipRule::expand(&[S1])),
        (Persona::Boss, SectionSkipRule::shorten(&[S1])),
        (Persona::Professor, SectionSkipRule::shorten(&[S1])),
        (Persona::Official, SectionSkipRule::shorten(&[S1])),
    ])
}

impl TemplateRegistry {
    pub fn new() -> Self {
        let templates = vec![
            StructureTemplate {
                id: "T01_GENERAL",
                name: "일반 전달",
                section_order: vec![S0, S1, S3, S5, S6, S8],
                constraints: "범용 템플릿. 특정 패턴 없이 사실 전달 + 요청 + 대안 구조.",
                skip_rules: boss_prof_official_rules(),
            },
            StructureTemplate {
                id: "T02_DATA_REQUEST",
                name: "자료 요청",
                section_order: vec![S0, S1, S3, S5, S8],
                constraints: "요청 사유를 먼저 밝히고, 구체적 자료/기한/형식을 명시. 부담을 줄이는 완곡 표현.",
                skip_rules: boss_prof_official_rules(),
            },
            StructureTemplate {
                id: "T03_NAGGING_REMINDER",
                name: "독촉/리마인더",
                section_order: vec![S0, S1, S3, S5, S8],
                constraints: "이전 요청 상기 + 회신 기한. 비난 없이 사실 기반 리마인드. S1은 짧게.",
                skip_rules: HashMap::from([
                    (Persona::Boss, SectionSkipRule::shorten(&[S1])),
                    (Persona::Professor, SectionSkipRule::shorten(&[S1])),
                    (Persona::Official, SectionSkipRule::shorten(&[S1])),
                    (Persona::Client, SectionSkipRule::shorten(&[S1])),
                ]),
            },
            StructureTemplate {
                id: "T04_SCHEDULE",
                name: "일정 조율/지연",
                section_order: vec![S0, S1, S3, S4, S6, S8],
                constraints: "사과 → 지연 원인(사실) → 새 일정 제안. 변명 최소화, 대안 집중.",
                skip_rules: parent_expand_s1(),
            },
            StructureTemplate {
                id: "T05_APOLOGY",
                name: "사과/수습",
                section_order: vec![S0, S1, S2, S3, S6, S8],
                constraints: "진심 사과 → 내부 확인 노력 → 원인 → 해결/재발 방지. S2 필수.",
                skip_rules: client_expand_s1_s2(),
            },
            StructureTemplate {
                id: "T06_REJECTION",
                name: "거절/불가 안내",
                section_order: vec![S0, S1, S7, S3, S6, S8],
                constraints: "공감 → 정책/규정 근거 → 대안 제시. 감정 배제, 거절 이유 명확.",
                skip_rules: client_expand_s1_s2(),
            },
            StructureTemplate {
                id: "T07_ANNOUNCEMENT",
                name: "공지/안내",
                section_order: vec![S0, S3, S5, S8],
                constraints: "두괄식. 핵심 정보(일시/장소/대상) 먼저. 행동 요청으로 마무리. S1 생략.",
                skip_rules: HashMap::new(),
            },
            StructureTemplate {
                id: "T08_FEEDBACK",
                name: "피드백",
                section_order: vec![S0, S1, S3, S5, S6, S8],
                constraints: "긍정 인정 → 개선점(요청 형태) → 기대 효과. 비판 아닌 성장 지향.",
                skip_rules: parent_expand_s1(),
            },
            StructureTemplate {
                id: "T09_BLAME_SEPARATION",
                name: "책임 분리",
                section_order: vec![S0, S1, S2, S3, S4, S6, S8],
                constraints: "공감 → 내부 확인 → 사실 나열 → 귀책 방향(주어 전환) → 해결안. 비난 제거 필수.",
                skip_rules: client_expand_s1_s2(),
            },
            StructureTemplate {
                id: "T10_RELATIONSHIP_RECOVERY",
                name: "관계 회복",
                section_order: vec![S0, S1, S3, S6, S8],
                constraints: "깊은 공감·사과 → 상황 인정 → 협력 제안. 감정 간접 전환 중시.",
                skip_rules: parent_expand_s1(),
            },
            StructureTemplate {
                id: "T11_REFUND_REJECTION",
                name: "환불 거절",
                section_order: vec![S0, S1, S2, S3, S7, S6, S8],
                constraints: "공감 → 내부 점검 → 사실 → 정책 근거 → 대안. S2 필수(점검 노력 표시).",
                skip_rules: client_expand_s1_s2(),
            },
            StructureTemplate {
                id: "T12_WARNING_PREVENTION",
                name: "경고/재발 방지",
                section_order: vec![S0, S1, S3, S5, S6, S8],
                constraints: "문제 인정 → 사실/경과 → 구체적 요청(재발 방지) → 기대 효과.",
                skip_rules: boss_prof_official_rules(),
            },
        ];

        Self { templates }
    }

    /// Template by ID, falling back to T01_GENERAL.
    pub fn get(&self, template_id: &str) -> &StructureTemplate {
        self.templates
            .iter()
            .find(|t| t.id == template_id)
            .unwrap_or_else(|| self.get_default())
    }

    pub fn get_default(&self) -> &StructureTemplate {
        &self.templates[0]
    }

    pub fn all(&self) -> &[StructureTemplate] {
        &self.templates
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twelve_templates() {
        let registry = TemplateRegistry::new();
        assert_eq!(registry.all().len(), 12);
        assert_eq!(registry.get_default().id, "T01_GENERAL");
    }

    #[test]
    fn test_unknown_id_falls_back_to_default() {
        let registry = TemplateRegistry::new();
        assert_eq!(registry.get("T99_NOPE").id, "T01_GENERAL");
    }

    #[test]
    fn test_t11_has_s2_and_policy() {
        let registry = TemplateRegistry::new();
        let t11 = registry.get("T11_REFUND_REJECTION");
        assert!(t11.section_order.contains(&StructureSection::S2OurEffort));
        assert!(t11.section_order.contains(&StructureSection::S7Policy));
    }

    #[test]
    fn test_announcement_skips_acknowledge() {
        let registry = TemplateRegistry::new();
        let t07 = registry.get("T07_ANNOUNCEMENT");
        assert!(!t07.section_order.contains(&StructureSection::S1Acknowledge));
    }
}
