//! Builds prompts for the final model (LLM #2).
//!
//! The final model transforms the 3-tier labeled structure (as a JSON segment
//! manifest) into polished business prose, guided by dynamic template
//! sections, avoid-phrase lists, and optional SA/cushion/RAG blocks.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::json;

use crate::analyze::{CushionStrategy, SituationAnalysisResult};
use crate::label::{LabelTier, LabeledSegment};
use crate::preprocess::LockedSpan;
use crate::rag::RagResults;
use crate::template::{StructureSection, StructureTemplate};
use crate::types::{Persona, SituationContext, ToneLevel};

fn placeholder_in_text() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([A-Z]+)_(\d+)\}\}").unwrap())
}

fn dedupe_strip() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("[^가-힣a-zA-Z0-9_]").unwrap())
}

/// Phrases the final model must not produce: meta commentary plus the common
/// AI-assistant cliches that read as machine output in Korean business mail.
pub const AVOID_PHRASES: [&str; 14] = [
    "변환 결과",
    "다음과 같이",
    "도움이 되셨으면",
    "변환해 드리겠",
    "아래와 같이",
    "다음은 변환",
    "변환된 텍스트",
    "이렇게 변환",
    "존댓말로 바꾸",
    "다듬어 보았",
    "도움이 되길 바랍니다",
    "추가 문의사항이 있으시면 언제든지",
    "소중한 의견 감사합니다",
    "항상 최선을 다하겠습니다",
];

/// One entry of the JSON segment manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedSegment {
    pub id: String,
    pub order: usize,
    pub tier: String,
    pub label: String,
    pub text: Option<String>,
    pub dedupe_key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub must_include: Vec<String>,
}

/// Request metadata forwarded into the prompt (absent in text-only mode).
#[derive(Debug, Clone)]
pub struct PromptMetadata {
    pub persona: Persona,
    pub contexts: Vec<SituationContext>,
    pub tone_level: ToneLevel,
}

/// Extract `{{TYPE_N}}` placeholders from segment text.
pub fn extract_placeholders(text: Option<&str>) -> Vec<String> {
    match text {
        Some(t) => placeholder_in_text()
            .find_iter(t)
            .map(|m| m.as_str().to_string())
            .collect(),
        None => Vec::new(),
    }
}

/// Canonical form of a segment's text used by the final model to collapse
/// duplicates: lowercased, whitespace/punct stripped, placeholders reduced to
/// `type_n` tokens.
pub fn build_dedupe_key(text: &str) -> String {
    let with_tokens = placeholder_in_text().replace_all(text, |caps: &Captures| {
        format!("{}_{}", caps[1].to_lowercase(), &caps[2])
    });
    dedupe_strip()
        .replace_all(&with_tokens, "")
        .to_lowercase()
}

/// Build the ordered JSON segment manifest from enforced labels.
///
/// `order` is 1-based by segment start. RED segments carry `text: null` and no
/// dedupe key; `must_include` lists the placeholders that must survive.
pub fn build_ordered_segments(
    labeled_segments: &[LabeledSegment],
    _spans: &[LockedSpan],
) -> Vec<OrderedSegment> {
    let mut sorted: Vec<&LabeledSegment> = labeled_segments.iter().collect();
    sorted.sort_by_key(|s| s.start);

    sorted
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            let red = seg.tier() == LabelTier::Red;
            let text = (!red).then(|| seg.text.clone());
            let dedupe_key = (!red).then(|| build_dedupe_key(&seg.text));
            let must_include = extract_placeholders(text.as_deref());
            OrderedSegment {
                id: seg.segment_id.clone(),
                order: i + 1,
                tier: seg.tier().to_string(),
                label: seg.label.name().to_string(),
                text,
                dedupe_key,
                must_include,
            }
        })
        .collect()
}

/// Compose the final-model system prompt.
pub fn build_system_prompt(
    template: &StructureTemplate,
    effective_sections: &[StructureSection],
    sa_result: &SituationAnalysisResult,
    cushion: Option<&CushionStrategy>,
    metadata: Option<&PromptMetadata>,
) -> String {
    let mut out = String::new();

    out.push_str(
        "역할: 한국어 비즈니스 메시지 변환 전문가\n\
         입력: 3단계(GREEN/YELLOW/RED) 라벨이 부여된 세그먼트 JSON + 고정 표현 목록\n\
         출력: 완성된 비즈니스 메시지 본문만. 설명/메타 발언/제목/코드블록 금지.\n\n\
         ## 절대 규칙\n\
         1. 이모지 사용 금지.\n\
         2. 변환 과정에 대한 언급 금지 (\"변환 결과\", \"다음과 같이\" 류 전부 금지).\n\
         3. `{{TYPE_N}}` 형식 플레이스홀더는 한 글자도 바꾸지 말고 그대로 출력하세요. \
         mustInclude에 나열된 플레이스홀더는 반드시 출력에 포함되어야 합니다.\n\
         4. 원문에 없는 숫자/날짜/사실을 새로 만들지 마세요.\n\
         5. RED 세그먼트(text가 null)는 존재하지 않았던 것처럼 완전히 무시하세요. \
         삭제 흔적([삭제됨], [REDACTED] 등)을 절대 남기지 마세요.\n\
         6. dedupeKey가 동일한 세그먼트는 내용이 중복된 것입니다. order가 더 큰 쪽 하나만 반영하세요.\n\n\
         ## 라벨별 처리 전략\n\
         - CORE_FACT: 내용 보존, 수치/날짜/상태 정확 유지, 문체만 비즈니스체로\n\
         - CORE_INTENT: 요청/제안 의도 보존, 완곡한 요청형으로\n\
         - REQUEST: 요청 내용과 기한/조건 보존, 부담을 줄이는 표현으로\n\
         - APOLOGY: 간결하고 진정성 있게, 과잉 사과 금지\n\
         - COURTESY: 관례적 인사로 자연스럽게, 중복 시 한 번만\n\
         - ACCOUNTABILITY: 비난/판단 제거, 주어를 상황·시스템·프로세스로 전환, 사실 관계만 전달\n\
         - SELF_JUSTIFICATION: 방어적 프레임 제거, 원인이 되는 업무 맥락 사실만 남기기\n\
         - NEGATIVE_FEEDBACK: 긍정 인정 선행 후 개선 요청 프레임으로 전환, 심각도는 보존\n\
         - EMOTIONAL: 감정을 삭제하지 말고 간접·절제된 표현으로 전환, 협조 의지로 마무리\n\
         - EXCESS_DETAIL: 핵심만 압축, 추측은 가능성 표현으로 전환\n\
         - AGGRESSION / PERSONAL_ATTACK / PRIVATE_TMI / PURE_GRUMBLE: 완전 삭제 (침묵 삭제)\n\n\
         ## YELLOW 쿠션 정책\n\
         YELLOW 세그먼트는 쿠션(완충 표현)을 앞세워 재작성합니다. \
         쿠션은 짧게(15자 이내), 본문 사실이 주연입니다.\n\n",
    );

    out.push_str("## 금지 표현\n다음 표현(및 유사 표현)을 출력에 사용하지 마세요:\n");
    for phrase in AVOID_PHRASES {
        out.push_str("- ");
        out.push_str(phrase);
        out.push('\n');
    }
    out.push('\n');

    // Template-specific section block
    out.push_str(&format!(
        "## 출력 구조 - {} ({})\n제약: {}\n아래 섹션 순서대로 작성하세요. 섹션 제목은 출력하지 마세요.\n",
        template.name, template.id, template.constraints
    ));
    for section in effective_sections {
        out.push_str(&format!(
            "- {} [{}] ({}): {}\n",
            section.name(),
            section.label(),
            section.length_hint(),
            section.instruction()
        ));
        let pool = section.expression_pool();
        if !pool.is_empty() {
            out.push_str(&format!("  표현 풀: {}\n", pool.join(" / ")));
        }
    }
    out.push('\n');

    // Dynamic persona/context/tone block
    if let Some(meta) = metadata {
        out.push_str(&format!(
            "## 수신자/상황\n받는 사람: {}\n상황: {}\n말투 강도: {}\n수신자와의 관계에 맞는 경어 수준을 유지하세요.\n",
            meta.persona.label(),
            meta.contexts
                .iter()
                .map(|c| c.label())
                .collect::<Vec<_>>()
                .join(", "),
            meta.tone_level.label()
        ));
        if let Some(rule) = template.skip_rules.get(&meta.persona) {
            for section in effective_sections {
                if rule.shorten_sections.contains(section) {
                    out.push_str(&format!(
                        "- {} 섹션은 이 수신자에게는 한 문장 이내로 짧게 작성하세요.\n",
                        section.name()
                    ));
                }
                if rule.expand_sections.contains(section) {
                    out.push_str(&format!(
                        "- {} 섹션은 이 수신자에게는 충분히 구체적으로 작성하세요.\n",
                        section.name()
                    ));
                }
            }
        }
        out.push('\n');
    }

    // SA intent block
    if !sa_result.intent.is_empty() {
        out.push_str(&format!(
            "## 화자의 핵심 의도\n{}\n이 의도가 훼손되지 않도록 변환하세요.\n\n",
            sa_result.intent
        ));
    }

    // Cushion strategy block
    if let Some(cushion) = cushion.filter(|c| !c.is_empty()) {
        out.push_str("## 쿠션 전략 (YELLOW 세그먼트별)\n");
        if !cushion.overall_tone.is_empty() {
            out.push_str(&format!("전체 톤: {}\n", cushion.overall_tone));
        }
        for s in &cushion.strategies {
            out.push_str(&format!(
                "- {} ({}): 접근={} / 쿠션=\"{}\" / 금지={}\n",
                s.segment_id, s.label, s.approach, s.cushion_phrase, s.avoid
            ));
        }
        if !cushion.transition_notes.is_empty() {
            out.push_str(&format!("전환 지침: {}\n", cushion.transition_notes));
        }
        out.push('\n');
    }

    out
}

/// Assemble the final-model user message: optional SA block, optional RAG
/// block, and the fenced JSON segment manifest.
pub fn build_user_message(
    ordered: &[OrderedSegment],
    spans: &[LockedSpan],
    sa_result: &SituationAnalysisResult,
    sender_info: Option<&str>,
    metadata: Option<&PromptMetadata>,
    template: &StructureTemplate,
    effective_sections: &[StructureSection],
    rag_results: Option<&RagResults>,
) -> String {
    let mut out = String::new();

    if !sa_result.facts.is_empty() || !sa_result.intent.is_empty() {
        out.push_str("[상황 분석]\n");
        for fact in &sa_result.facts {
            if fact.source.is_empty() {
                out.push_str(&format!("- {}\n", fact.content));
            } else {
                out.push_str(&format!("- {} (근거: \"{}\")\n", fact.content, fact.source));
            }
        }
        if !sa_result.intent.is_empty() {
            out.push_str(&format!("의도: {}\n", sa_result.intent));
        }
        out.push('\n');
    }

    if let Some(rag) = rag_results.filter(|r| !r.is_empty()) {
        out.push_str(&rag_block(rag));
        out.push('\n');
    }

    let meta = json!({
        "receiver": metadata.map(|m| m.persona.label()),
        "context": metadata.map(|m| {
            m.contexts.iter().map(|c| c.label()).collect::<Vec<_>>()
        }),
        "tone": metadata
            .map(|m| m.tone_level.label())
            .unwrap_or(ToneLevel::Polite.label()),
        "sender": sender_info,
        "template": template.id,
        "sections": effective_sections.iter().map(|s| s.name()).collect::<Vec<_>>(),
    });

    let placeholders: serde_json::Map<String, serde_json::Value> = spans
        .iter()
        .map(|s| (s.placeholder.clone(), json!(&s.original_text)))
        .collect();

    let document = json!({
        "meta": meta,
        "segments": ordered,
        "placeholders": placeholders,
    });

    out.push_str("[세그먼트 문서]\n```json\n");
    out.push_str(&serde_json::to_string_pretty(&document).unwrap_or_else(|_| "{}".to_string()));
    out.push_str("\n```");

    out
}

fn rag_block(rag: &RagResults) -> String {
    let mut out = String::from("[참고 자료]\n");

    let sections: [(&str, &[crate::rag::RagSearchHit]); 6] = [
        ("표현 풀", &rag.expression_pool),
        ("쿠션 표현", &rag.cushion),
        ("금지 표현", &rag.forbidden),
        ("정책/규정", &rag.policy),
        ("예시", &rag.example),
        ("도메인 맥락", &rag.domain_context),
    ];

    for (title, hits) in sections {
        if hits.is_empty() {
            continue;
        }
        out.push_str(&format!("### {}\n", title));
        for hit in hits {
            match &hit.alternative {
                Some(alt) if !alt.is_empty() => {
                    out.push_str(&format!("- {} → {}\n", hit.content, alt));
                }
                _ => out.push_str(&format!("- {}\n", hit.content)),
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::Fact;
    use crate::label::SegmentLabel;
    use crate::preprocess::extract;
    use crate::template::TemplateRegistry;
    use pretty_assertions::assert_eq;

    fn labeled(id: &str, label: SegmentLabel, text: &str, start: usize) -> LabeledSegment {
        LabeledSegment::new(id, label, text, start, start + text.len())
    }

    #[test]
    fn test_dedupe_key_strips_and_lowercases() {
        assert_eq!(build_dedupe_key("확인 부탁드립니다!!"), "확인부탁드립니다");
        assert_eq!(build_dedupe_key("Check THIS, please."), "checkthisplease");
    }

    #[test]
    fn test_dedupe_key_placeholder_tokens() {
        assert_eq!(
            build_dedupe_key("기한은 {{DATE_1}} 까지"),
            "기한은date_1까지"
        );
    }

    #[test]
    fn test_ordered_segments_order_by_start_and_red_null() {
        let segments = vec![
            labeled("T2", SegmentLabel::Aggression, "욕설", 50),
            labeled("T1", SegmentLabel::CoreFact, "기한은 {{DATE_1}} 까지", 0),
        ];
        let ordered = build_ordered_segments(&segments, &[]);
        assert_eq!(ordered[0].id, "T1");
        assert_eq!(ordered[0].order, 1);
        assert_eq!(ordered[0].must_include, vec!["{{DATE_1}}"]);
        assert!(ordered[0].dedupe_key.is_some());

        assert_eq!(ordered[1].id, "T2");
        assert_eq!(ordered[1].tier, "RED");
        assert_eq!(ordered[1].text, None);
        assert_eq!(ordered[1].dedupe_key, None);
    }

    #[test]
    fn test_system_prompt_contains_sections_and_avoids() {
        let registry = TemplateRegistry::new();
        let template = registry.get("T05_APOLOGY").clone();
        let prompt = build_system_prompt(
            &template,
            &template.section_order,
            &SituationAnalysisResult::default(),
            None,
            None,
        );
        assert!(prompt.contains("T05_APOLOGY"));
        assert!(prompt.contains("S2_OUR_EFFORT"));
        assert!(prompt.contains("내부 확인 결과"));
        assert!(prompt.contains("변환 결과"));
        assert!(prompt.contains("이모지"));
    }

    #[test]
    fn test_system_prompt_applies_persona_skip_rules() {
        let registry = TemplateRegistry::new();
        let template = registry.get("T05_APOLOGY").clone();
        let meta = PromptMetadata {
            persona: crate::types::Persona::Client,
            contexts: vec![crate::types::SituationContext::Apology],
            tone_level: crate::types::ToneLevel::Polite,
        };
        let prompt = build_system_prompt(
            &template,
            &template.section_order,
            &SituationAnalysisResult::default(),
            None,
            Some(&meta),
        );
        // CLIENT expands S1/S2 on the apology template
        assert!(prompt.contains("S1_ACKNOWLEDGE 섹션은 이 수신자에게는 충분히 구체적으로"));
        assert!(prompt.contains("고객"));
    }

    #[test]
    fn test_user_message_contains_manifest_and_placeholders() {
        let original = "기한은 2024-03-15 까지입니다";
        let spans = extract(original);
        let segments = vec![labeled(
            "T1",
            SegmentLabel::CoreFact,
            "기한은 {{DATE_1}} 까지입니다",
            0,
        )];
        let ordered = build_ordered_segments(&segments, &spans);

        let registry = TemplateRegistry::new();
        let template = registry.get_default().clone();
        let sa = SituationAnalysisResult {
            facts: vec![Fact {
                content: "기한 고지".into(),
                source: "기한은 {{DATE_1}} 까지입니다".into(),
            }],
            intent: "기한 안내".into(),
            ..Default::default()
        };

        let msg = build_user_message(
            &ordered,
            &spans,
            &sa,
            Some("김민수"),
            None,
            &template,
            &template.section_order,
            None,
        );

        assert!(msg.contains("```json"));
        assert!(msg.contains("{{DATE_1}}"));
        assert!(msg.contains("2024-03-15"));
        assert!(msg.contains("[상황 분석]"));
        assert!(msg.contains("기한 안내"));
        assert!(msg.contains("\"dedupeKey\""));
        assert!(msg.contains("\"mustInclude\""));
    }
}
