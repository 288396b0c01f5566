//! Situation analysis: extracts objective facts, core intent, and (in the
//! metadata-aware variant) metadata validation.
//!
//! Runs in parallel with segmentation+labeling to hide its latency. The
//! RED-overlap filter drops facts sourced from segments the labeler deleted.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::Result;
use crate::label::{LabelTier, LabeledSegment};
use crate::llm::{LlmRequest, LlmRouter};
use crate::types::{Persona, Purpose, SituationContext, ToneLevel, Topic};

const MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f64 = 0.2;
const MAX_TOKENS: u32 = 650;
pub const OVERRIDE_CONFIDENCE_THRESHOLD: f64 = 0.72;

const STOPWORDS: [&str; 20] = [
    "그리고", "하지만", "그래서", "때문에", "그런데", "그러나", "또한", "이런", "저런", "그런",
    "이것", "저것", "그것", "여기", "거기", "저기", "우리", "너희", "이번", "다음",
];

fn korean_word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("[가-힣]{2,}").unwrap())
}

fn normalize_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("[^가-힣a-zA-Z0-9]").unwrap())
}

/// One grounded fact: a short summary plus the verbatim source quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
    pub content: String,
    pub source: String,
}

/// Metadata validation result from the metadata-aware variant.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataCheck {
    pub should_override: bool,
    pub confidence: f64,
    pub inferred_topic: Option<Topic>,
    pub inferred_purpose: Option<Purpose>,
    pub inferred_primary_context: Option<SituationContext>,
}

impl MetadataCheck {
    /// Whether the override may actually be applied.
    pub fn meets_threshold(&self) -> bool {
        self.should_override && self.confidence >= OVERRIDE_CONFIDENCE_THRESHOLD
    }
}

/// Situation analysis outcome.
#[derive(Debug, Clone, Default)]
pub struct SituationAnalysisResult {
    pub facts: Vec<Fact>,
    pub intent: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub metadata_check: Option<MetadataCheck>,
}

const SYSTEM_PROMPT: &str = concat!(
    "당신은 한국어 메시지 상황 분석 전문가입니다.\n",
    "원문과 메타데이터를 분석하여 객관적 사실(facts)과 화자의 핵심 목적(intent)을 추출합니다.\n",
    "또한 사용자가 선택한 메타데이터(주제/목적)가 실제 텍스트와 일치하는지 검증합니다.\n\n",
    "## 규칙\n",
    "1. facts: 원문에서 직접 읽히는 객관적 사실만 추출 (최대 5개)\n",
    "2. 각 fact의 content: 사실을 명확한 1문장으로 요약\n",
    "3. 각 fact의 source: 해당 사실의 근거가 되는 원문 구절을 **정확히 인용** (변형 금지)\n",
    "4. intent: 화자의 핵심 전달 목적을 1~2문장으로 요약\n",
    "5. 지시대명사(\"그거\", \"이것\", \"저기\") → 원문 맥락에서 해석하여 구체적 대상으로 복원\n",
    "6. 생략된 주어 → 문맥에서 추론하여 복원\n",
    "7. `{{TYPE_N}}` 형식 플레이스홀더(예: {{DATE_1}}, {{PHONE_1}})는 그대로 유지\n",
    "8. 근거 없는 추측 금지. 원문에서 직접 읽히는 것만\n\n",
    "## 메타데이터 검증 규칙\n",
    "주제(topic)와 목적(purpose)이 제공된 경우, 실제 텍스트 내용과 비교하여 검증합니다.\n",
    "- 메타데이터가 텍스트와 **명백히 불일치**할 때만 should_override=true\n",
    "- 애매하거나 부분적으로 일치하면 should_override=false (사용자 의도 존중)\n",
    "- confidence: 불일치 확신도 (0.0~1.0)\n",
    "- inferred 값은 확신이 있을 때만 제공, 아니면 null\n\n",
    "Topic 값: REFUND_CANCEL, OUTAGE_ERROR, ACCOUNT_PERMISSION, DATA_FILE, SCHEDULE_DEADLINE, ",
    "COST_BILLING, CONTRACT_TERMS, HR_EVALUATION, ACADEMIC_GRADE, COMPLAINT_REGULATION, OTHER\n",
    "Purpose 값: INFO_DELIVERY, DATA_REQUEST, SCHEDULE_COORDINATION, APOLOGY_RECOVERY, ",
    "RESPONSIBILITY_SEPARATION, REJECTION_NOTICE, REFUND_REJECTION, WARNING_PREVENTION, ",
    "RELATIONSHIP_RECOVERY, NEXT_ACTION_CONFIRM, ANNOUNCEMENT\n",
    "Context 값: REQUEST, SCHEDULE_DELAY, URGING, REJECTION, APOLOGY, COMPLAINT, ANNOUNCEMENT, ",
    "FEEDBACK, BILLING, SUPPORT, CONTRACT, RECRUITING, CIVIL_COMPLAINT, GRATITUDE\n\n",
    "## 출력 형식 (JSON만, 다른 텍스트 금지)\n",
    "{\n",
    "  \"facts\": [\n",
    "    {\"content\": \"사실 요약\", \"source\": \"원문 그대로 인용\"},\n",
    "    ...\n",
    "  ],\n",
    "  \"intent\": \"화자의 핵심 목적\",\n",
    "  \"metadata_check\": {\n",
    "    \"should_override\": false,\n",
    "    \"confidence\": 0.0,\n",
    "    \"inferred\": {\n",
    "      \"topic\": null,\n",
    "      \"purpose\": null,\n",
    "      \"primary_context\": null\n",
    "    }\n",
    "  }\n",
    "}\n\n",
    "## 예시\n\n",
    "입력:\n",
    "받는 사람: 학부모\n",
    "상황: 피드백\n",
    "원문:\n",
    "아이가 수학 시험에서 {{NUMBER_1}} 맞았는데 그거 반 평균보다 낮은 거잖아요. ",
    "선생님이 보충수업 해주신다고 했는데 아직 연락이 없어서요.\n\n",
    "출력:\n",
    "{\n",
    "  \"facts\": [\n",
    "    {\"content\": \"아이의 수학 시험 점수가 {{NUMBER_1}}이다\", ",
    "\"source\": \"아이가 수학 시험에서 {{NUMBER_1}} 맞았는데\"},\n",
    "    {\"content\": \"아이의 점수가 반 평균보다 낮다\", ",
    "\"source\": \"그거 반 평균보다 낮은 거잖아요\"},\n",
    "    {\"content\": \"선생님이 보충수업을 해주기로 했으나 아직 연락이 없다\", ",
    "\"source\": \"선생님이 보충수업 해주신다고 했는데 아직 연락이 없어서요\"}\n",
    "  ],\n",
    "  \"intent\": \"보충수업 일정을 확인하고, 아이의 성적 개선을 위한 후속 조치를 요청하려는 목적\",\n",
    "  \"metadata_check\": {\n",
    "    \"should_override\": false,\n",
    "    \"confidence\": 0.0,\n",
    "    \"inferred\": {\"topic\": null, \"purpose\": null, \"primary_context\": null}\n",
    "  }\n",
    "}",
);

const SYSTEM_PROMPT_TEXT_ONLY: &str = concat!(
    "당신은 한국어 메시지 상황 분석 전문가입니다.\n",
    "원문에서 객관적 사실(facts)과 화자의 핵심 목적(intent)을 추출합니다.\n\n",
    "## 규칙\n",
    "1. facts: 원문에서 직접 읽히는 객관적 사실만 추출 (최대 5개)\n",
    "2. 각 fact의 content: 사실을 명확한 1문장으로 요약\n",
    "3. 각 fact의 source: 해당 사실의 근거가 되는 원문 구절을 **정확히 인용** (변형 금지)\n",
    "4. intent: 화자의 핵심 전달 목적을 1~2문장으로 요약\n",
    "5. 지시대명사(\"그거\", \"이것\", \"저기\") → 원문 맥락에서 해석하여 구체적 대상으로 복원\n",
    "6. 생략된 주어 → 문맥에서 추론하여 복원\n",
    "7. `{{TYPE_N}}` 형식 플레이스홀더(예: {{DATE_1}}, {{PHONE_1}})는 그대로 유지\n",
    "8. 근거 없는 추측 금지. 원문에서 직접 읽히는 것만\n\n",
    "## 출력 형식 (JSON만, 다른 텍스트 금지)\n",
    "{\n",
    "  \"facts\": [\n",
    "    {\"content\": \"사실 요약\", \"source\": \"원문 그대로 인용\"},\n",
    "    ...\n",
    "  ],\n",
    "  \"intent\": \"화자의 핵심 목적\"\n",
    "}",
);

/// Metadata attached to the metadata-aware analysis variant.
#[derive(Debug, Clone)]
pub struct AnalysisMetadata {
    pub persona: Persona,
    pub contexts: Vec<SituationContext>,
    pub tone_level: ToneLevel,
    pub topic: Option<Topic>,
    pub purpose: Option<Purpose>,
}

/// Run text-only situation analysis (facts + intent only, no metadata_check).
///
/// LLM faults degrade to an empty result; the orchestrator decides fatality
/// at the join point.
pub async fn analyze_text_only(
    masked_text: &str,
    sender_info: Option<&str>,
    user_prompt: Option<&str>,
    llm: &LlmRouter,
) -> Result<SituationAnalysisResult> {
    let mut parts: Vec<String> = Vec::new();
    if let Some(sender) = sender_info.filter(|s| !s.trim().is_empty()) {
        parts.push(format!("보내는 사람: {}", sender));
    }
    if let Some(prompt) = user_prompt.filter(|s| !s.trim().is_empty()) {
        parts.push(format!("추가 정보: {}", prompt));
    }
    parts.push(format!("\n원문:\n{}", masked_text));
    let user_message = parts.join("\n");

    let request = LlmRequest::new(MODEL, SYSTEM_PROMPT_TEXT_ONLY, user_message)
        .with_temperature(TEMPERATURE)
        .with_max_tokens(MAX_TOKENS);

    match llm.complete(&request).await {
        Ok(result) => Ok(parse_result(&result.content, result.prompt_tokens, result.completion_tokens, false)),
        Err(e) => {
            tracing::warn!(
                "[SituationAnalysis] Text-only LLM call failed, returning empty result: {}",
                e
            );
            Ok(SituationAnalysisResult::default())
        }
    }
}

/// Run the metadata-aware analysis variant with integrated metadata
/// validation.
pub async fn analyze(
    metadata: &AnalysisMetadata,
    masked_text: &str,
    user_prompt: Option<&str>,
    sender_info: Option<&str>,
    llm: &LlmRouter,
) -> Result<SituationAnalysisResult> {
    let mut parts: Vec<String> = Vec::new();
    parts.push(format!("받는 사람: {}", metadata.persona.label()));
    parts.push(format!(
        "상황: {}",
        metadata
            .contexts
            .iter()
            .map(|c| c.label())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    parts.push(format!("말투 강도: {}", metadata.tone_level.label()));
    if let Some(topic) = &metadata.topic {
        parts.push(format!("주제: {}", topic.name()));
    }
    if let Some(purpose) = &metadata.purpose {
        parts.push(format!("목적: {}", purpose.name()));
    }
    if let Some(sender) = sender_info.filter(|s| !s.trim().is_empty()) {
        parts.push(format!("보내는 사람: {}", sender));
    }
    if let Some(prompt) = user_prompt.filter(|s| !s.trim().is_empty()) {
        parts.push(format!("참고 맥락: {}", prompt));
    }
    parts.push(format!("\n원문:\n{}", masked_text));
    let user_message = parts.join("\n");

    let request = LlmRequest::new(MODEL, SYSTEM_PROMPT, user_message)
        .with_temperature(TEMPERATURE)
        .with_max_tokens(MAX_TOKENS);

    match llm.complete(&request).await {
        Ok(result) => Ok(parse_result(&result.content, result.prompt_tokens, result.completion_tokens, true)),
        Err(e) => {
            tracing::warn!("[SituationAnalysis] LLM call failed, returning empty result: {}", e);
            Ok(SituationAnalysisResult::default())
        }
    }
}

/// Drop facts whose source overlaps with RED-labeled segments.
///
/// Matching strategy (3-tier fallback):
/// 1. Exact find → position-based overlap check
/// 2. Normalized containment (strip non-alphanumeric-Korean, lowercase)
/// 3. Semantic word overlap: 2+ meaningful words co-occur in a RED segment
pub fn filter_red_facts(
    original: SituationAnalysisResult,
    masked_text: &str,
    labeled_segments: &[LabeledSegment],
) -> SituationAnalysisResult {
    let red_segments: Vec<&LabeledSegment> = labeled_segments
        .iter()
        .filter(|ls| ls.tier() == LabelTier::Red)
        .collect();

    if red_segments.is_empty() {
        return original;
    }

    let mut filtered: Vec<Fact> = Vec::new();
    'facts: for fact in original.facts {
        if fact.source.trim().is_empty() {
            filtered.push(fact);
            continue;
        }

        // 1. Exact find with position-based overlap
        if let Some(fact_start) = masked_text.find(&fact.source) {
            let fact_end = fact_start + fact.source.len();
            let overlaps_red = red_segments
                .iter()
                .any(|red| fact_start < red.end && fact_end > red.start);
            if overlaps_red {
                tracing::info!(
                    "[SituationAnalysis] Filtered RED-overlapping fact (exact): {}",
                    fact.content
                );
                continue;
            }
            filtered.push(fact);
            continue;
        }

        // 2. Normalized containment
        let normalized_source = normalize_for_match(&fact.source);
        if !normalized_source.is_empty() {
            for red in &red_segments {
                if normalize_for_match(&red.text).contains(&normalized_source) {
                    tracing::info!(
                        "[SituationAnalysis] Filtered RED-overlapping fact (normalized): {}",
                        fact.content
                    );
                    continue 'facts;
                }
            }
        }

        // 3. Semantic word overlap
        let source_words = extract_meaning_words(&fact.source);
        if source_words.len() >= 2 {
            let semantic_match = red_segments.iter().any(|red| {
                source_words
                    .iter()
                    .filter(|w| red.text.contains(w.as_str()))
                    .count()
                    >= 2
            });
            if semantic_match {
                tracing::info!(
                    "[SituationAnalysis] Filtered RED-overlapping fact (semantic): {}",
                    fact.content
                );
                continue;
            }
        }

        filtered.push(fact);
    }

    SituationAnalysisResult {
        facts: filtered,
        ..original
    }
}

fn normalize_for_match(text: &str) -> String {
    normalize_pattern().replace_all(text, "").to_lowercase()
}

fn extract_meaning_words(text: &str) -> Vec<String> {
    korean_word_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

// Lenient wire shapes: the model sometimes wraps JSON in fences or stray text.

#[derive(Deserialize)]
struct WireResult {
    #[serde(default)]
    facts: Vec<WireFact>,
    #[serde(default)]
    intent: String,
    #[serde(default)]
    metadata_check: Option<WireMetadataCheck>,
}

#[derive(Deserialize)]
struct WireFact {
    #[serde(default)]
    content: String,
    #[serde(default)]
    source: String,
}

#[derive(Deserialize)]
struct WireMetadataCheck {
    #[serde(default)]
    should_override: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    inferred: Option<WireInferred>,
}

#[derive(Deserialize)]
struct WireInferred {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    purpose: Option<String>,
    #[serde(default)]
    primary_context: Option<String>,
}

fn parse_result(
    content: &str,
    prompt_tokens: u64,
    completion_tokens: u64,
    expect_metadata: bool,
) -> SituationAnalysisResult {
    let Some(json) = extract_json_object(content) else {
        tracing::warn!("[SituationAnalysis] Parse failed: no JSON object found");
        return SituationAnalysisResult {
            prompt_tokens,
            completion_tokens,
            ..Default::default()
        };
    };

    match serde_json::from_str::<WireResult>(json) {
        Ok(root) => {
            let facts = root
                .facts
                .into_iter()
                .filter(|f| !f.content.is_empty())
                .map(|f| Fact {
                    content: f.content,
                    source: f.source,
                })
                .collect();

            let metadata_check = if expect_metadata {
                root.metadata_check.map(|mc| {
                    let inferred = mc.inferred.unwrap_or(WireInferred {
                        topic: None,
                        purpose: None,
                        primary_context: None,
                    });
                    MetadataCheck {
                        should_override: mc.should_override,
                        confidence: mc.confidence,
                        inferred_topic: inferred.topic.as_deref().and_then(Topic::parse),
                        inferred_purpose: inferred.purpose.as_deref().and_then(Purpose::parse),
                        inferred_primary_context: inferred
                            .primary_context
                            .as_deref()
                            .and_then(SituationContext::parse),
                    }
                })
            } else {
                None
            };

            SituationAnalysisResult {
                facts,
                intent: root.intent,
                prompt_tokens,
                completion_tokens,
                metadata_check,
            }
        }
        Err(e) => {
            tracing::warn!("[SituationAnalysis] Parse failed: {}", e);
            SituationAnalysisResult {
                prompt_tokens,
                completion_tokens,
                ..Default::default()
            }
        }
    }
}

/// Find the first balanced top-level `{...}` in possibly fenced model output.
pub(crate) fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
