//! Rule-based post-processing validator for the final model output.
//!
//! Fires 14 rules. ERROR severity aborts success; WARNING is informational
//! except for the retryable subset that triggers the single silent retry.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::label::{LabelStats, LabeledSegment};
use crate::preprocess::LockedSpan;
use crate::template::StructureSection;
use crate::types::Persona;

/// Validation rule identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationIssueKind {
    Emoji,
    ForbiddenPhrase,
    HallucinatedFact,
    EndingRepetition,
    LengthOverexpansion,
    PerspectiveError,
    LockedSpanMissing,
    RedactedReentry,
    RedactionTrace,
    CoreNumberMissing,
    CoreDateMissing,
    SoftenContentDropped,
    SectionS2Missing,
    InformalConjunction,
}

impl ValidationIssueKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Emoji => "EMOJI",
            Self::ForbiddenPhrase => "FORBIDDEN_PHRASE",
            Self::HallucinatedFact => "HALLUCINATED_FACT",
            Self::EndingRepetition => "ENDING_REPETITION",
            Self::LengthOverexpansion => "LENGTH_OVEREXPANSION",
            Self::PerspectiveError => "PERSPECTIVE_ERROR",
            Self::LockedSpanMissing => "LOCKED_SPAN_MISSING",
            Self::RedactedReentry => "REDACTED_REENTRY",
            Self::RedactionTrace => "REDACTION_TRACE",
            Self::CoreNumberMissing => "CORE_NUMBER_MISSING",
            Self::CoreDateMissing => "CORE_DATE_MISSING",
            Self::SoftenContentDropped => "SOFTEN_CONTENT_DROPPED",
            Self::SectionS2Missing => "SECTION_S2_MISSING",
            Self::InformalConjunction => "INFORMAL_CONJUNCTION",
        }
    }
}

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
        }
    }
}

/// WARNING kinds that, alone, still trigger the single allowed retry.
pub const RETRYABLE_WARNINGS: [ValidationIssueKind; 5] = [
    ValidationIssueKind::CoreNumberMissing,
    ValidationIssueKind::CoreDateMissing,
    ValidationIssueKind::SoftenContentDropped,
    ValidationIssueKind::SectionS2Missing,
    ValidationIssueKind::InformalConjunction,
];

/// One rule violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub kind: ValidationIssueKind,
    pub severity: Severity,
    pub message: String,
    pub matched_text: Option<String>,
}

impl ValidationIssue {
    fn error(kind: ValidationIssueKind, message: impl Into<String>, matched: Option<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
            matched_text: matched,
        }
    }

    fn warning(
        kind: ValidationIssueKind,
        message: impl Into<String>,
        matched: Option<String>,
    ) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
            matched_text: matched,
        }
    }

    pub fn is_retryable_warning(&self) -> bool {
        self.severity == Severity::Warning && RETRYABLE_WARNINGS.contains(&self.kind)
    }
}

/// Aggregate validation outcome.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub passed: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .collect()
    }

    pub fn has_retryable_warning(&self) -> bool {
        self.issues.iter().any(|i| i.is_retryable_warning())
    }
}

// ── Patterns ──

struct ValidatorPatterns {
    emoji: Regex,
    ending: Regex,
    deuriget: Regex,
    core_number: Regex,
    safe_number_context: Regex,
    korean_number: Regex,
    date_patterns: Vec<Regex>,
    korean_word: Regex,
    s2_effort: Regex,
    informal_conjunction: Regex,
    normalize_match: Regex,
    digits_only: Regex,
    placeholder: Regex,
    digit_run: Regex,
}

fn patterns() -> &'static ValidatorPatterns {
    static PATTERNS: OnceLock<ValidatorPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ValidatorPatterns {
        emoji: Regex::new(concat!(
            "[",
            "\u{1F600}-\u{1F64F}",
            "\u{1F300}-\u{1F5FF}",
            "\u{1F680}-\u{1F6FF}",
            "\u{1F1E0}-\u{1F1FF}",
            "\u{FE00}-\u{FE0F}",
            "\u{1F3FB}-\u{1F3FF}",
            "\u{200D}",
            "\u{1F900}-\u{1F9FF}",
            "\u{1FA00}-\u{1FA6F}",
            "\u{1FA70}-\u{1FAFF}",
            "\u{2600}-\u{26FF}",
            "\u{2700}-\u{27BF}",
            "\u{231A}-\u{231B}",
            "\u{23E9}-\u{23F3}",
            "\u{23F8}-\u{23FA}",
            "\u{25AA}-\u{25AB}",
            "\u{25B6}\u{25C0}",
            "\u{25FB}-\u{25FE}",
            "\u{2B05}-\u{2B07}",
            "\u{2B1B}-\u{2B1C}",
            "\u{2B50}\u{2B55}",
            "\u{3030}\u{303D}\u{3297}\u{3299}",
            "]",
        ))
        .unwrap(),
        ending: Regex::new(
            "(?m)[가-힣]*?(드리겠습니다|겠습니다|드립니다|할게요|합니다|됩니다|됩니까|십시오|습니다|니다|세요|에요|해요|예요|네요|군요|는데요|거든요|잖아요|지요|죠|요)[.!?]?\\s*$",
        )
        .unwrap(),
        deuriget: Regex::new("드리겠습니다").unwrap(),
        core_number: Regex::new(r"\d{1,3}(?:,\d{3})+|\d{3,}").unwrap(),
        safe_number_context: Regex::new("\\d{2,4}년|제\\d+|\\d+호|\\d+층|\\d+차|\\d+번째").unwrap(),
        korean_number: Regex::new(
            "(?:약\\s*)?(?:\\d+)?(?:십|백|천|만|억|조)\\s*(?:십|백|천|만|억|조)?\\s*(?:원|명|개|건|일|시간|분|배)",
        )
        .unwrap(),
        date_patterns: vec![
            Regex::new(r"\d{4}[./\-]\d{1,2}(?:[./\-]\d{1,2})?").unwrap(),
            Regex::new("\\d{1,2}월\\s*\\d{1,2}일").unwrap(),
            Regex::new(r"\d{1,2}:\d{2}").unwrap(),
        ],
        korean_word: Regex::new("[가-힣]{2,}").unwrap(),
        s2_effort: Regex::new("확인|점검|검토|살펴|조사|파악|내부.*결과|담당.*확인|로그.*기준").unwrap(),
        informal_conjunction: Regex::new("어쨌든|아무튼|걍|근데").unwrap(),
        normalize_match: Regex::new("[^가-힣a-zA-Z0-9]").unwrap(),
        digits_only: Regex::new(r"\D").unwrap(),
        placeholder: Regex::new(r"\{\{\s*([A-Z]+)[-_](\d+)\s*\}\}").unwrap(),
        digit_run: Regex::new(r"\d{3,}").unwrap(),
    })
}

/// Forbidden meta-commentary phrases (rule 2).
const FORBIDDEN_PHRASES: [&str; 10] = [
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
];

/// Recipient-perspective phrases (rule 6): service-desk phrasing that is wrong
/// unless the sender actually is the provider side.
const PERSPECTIVE_PHRASES: [&str; 12] = [
    "확인해 드리겠습니다",
    "접수되었습니다",
    "처리해 드리겠습니다",
    "안내해 드리겠습니다",
    "도와드리겠습니다",
    "답변드리겠습니다",
    "알려드리겠습니다",
    "연락드리겠습니다",
    "보내드리겠습니다",
    "전달드리겠습니다",
    "안내 드리겠습니다",
    "처리 드리겠습니다",
];

/// Censorship trace phrases (rule 8b).
const CENSORSHIP_TRACES: [&str; 7] = [
    "[삭제됨]",
    "[REDACTED",
    "삭제된 내용",
    "제거된 부분",
    "삭제된 부분",
    "일부 내용을 삭제",
    "부적절한 내용이 제거",
];

/// Validator stopwords (rules 8 and 11).
const STOPWORDS: [&str; 38] = [
    "은", "는", "이", "가", "을", "를", "에", "의", "와", "과",
    "로", "도", "만", "까지", "부터", "에서", "처럼", "보다",
    "그리고", "하지만", "또한", "그래서", "그런데", "따라서",
    "문제", "확인", "요청", "부분", "경우", "상황", "내용",
    "것", "수", "등", "및", "위해", "대해", "통해",
];

const MAX_ABSOLUTE_OUTPUT_LENGTH: usize = 6000;

/// Validate the unmasked final text against rules 1–11 and 13.
#[allow(clippy::too_many_arguments)]
pub fn validate(
    final_text: &str,
    original_text: &str,
    spans: &[LockedSpan],
    raw_llm_output: Option<&str>,
    persona: Persona,
    redaction_map: &HashMap<String, String>,
    yellow_segment_texts: &[String],
) -> ValidationResult {
    let mut issues: Vec<ValidationIssue> = Vec::new();

    check_emoji(final_text, &mut issues);
    check_forbidden_phrases(final_text, &mut issues);
    check_hallucinated_facts(final_text, original_text, spans, &mut issues);
    check_ending_repetition(final_text, &mut issues);
    check_length_overexpansion(final_text, original_text, &mut issues);
    check_perspective_error(final_text, persona, &mut issues);
    check_locked_span_missing(raw_llm_output, final_text, spans, &mut issues);
    check_redacted_reentry(final_text, redaction_map, &mut issues);
    check_core_number_missing(final_text, original_text, spans, &mut issues);
    check_core_date_missing(final_text, original_text, &mut issues);
    check_soften_content_dropped(final_text, yellow_segment_texts, &mut issues);
    check_informal_conjunction(final_text, &mut issues);

    let passed = !issues.iter().any(|i| i.severity == Severity::Error);

    if !issues.is_empty() {
        tracing::info!(
            "Validation completed: {} issues ({} errors, {} warnings)",
            issues.len(),
            issues.iter().filter(|i| i.severity == Severity::Error).count(),
            issues.iter().filter(|i| i.severity == Severity::Warning).count()
        );
    }

    ValidationResult { passed, issues }
}

/// Validate with the template-aware S2 presence check (rule 12) on top of the
/// base rule set.
#[allow(clippy::too_many_arguments)]
pub fn validate_with_template(
    final_text: &str,
    original_text: &str,
    spans: &[LockedSpan],
    raw_llm_output: Option<&str>,
    persona: Persona,
    redaction_map: &HashMap<String, String>,
    yellow_segment_texts: &[String],
    effective_sections: &[StructureSection],
    labeled_segments: &[LabeledSegment],
) -> ValidationResult {
    let mut result = validate(
        final_text,
        original_text,
        spans,
        raw_llm_output,
        persona,
        redaction_map,
        yellow_segment_texts,
    );

    check_section_s2_missing(
        final_text,
        effective_sections,
        labeled_segments,
        &mut result.issues,
    );
    result.passed = !result.issues.iter().any(|i| i.severity == Severity::Error);
    result
}

/// Build a specific retry hint listing every missing placeholder with its
/// original surface form (rule 14).
pub fn build_locked_span_retry_hint(issues: &[ValidationIssue], spans: &[LockedSpan]) -> String {
    let missing: Vec<&str> = issues
        .iter()
        .filter(|i| i.kind == ValidationIssueKind::LockedSpanMissing && i.severity == Severity::Error)
        .filter_map(|i| i.matched_text.as_deref())
        .collect();

    if missing.is_empty() || spans.is_empty() {
        return String::new();
    }

    let mut parts =
        vec!["\n\n[고정 표현 누락 오류] 다음 고정 표현이 출력에 반드시 포함되어야 합니다:\n".to_string()];
    for span in spans {
        if missing.contains(&span.placeholder.as_str()) {
            parts.push(format!("- {} → \"{}\"\n", span.placeholder, span.original_text));
        }
    }
    parts.push("위 플레이스홀더를 변환 결과에 반드시 자연스럽게 포함하세요. 절대 누락하지 마세요.".to_string());
    parts.concat()
}

// ── Rule 1: emoji ──

fn check_emoji(final_text: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(m) = patterns().emoji.find(final_text) {
        issues.push(ValidationIssue::error(
            ValidationIssueKind::Emoji,
            "출력에 이모지가 포함되어 있습니다.",
            Some(m.as_str().to_string()),
        ));
    }
}

// ── Rule 2: forbidden phrases ──

fn check_forbidden_phrases(final_text: &str, issues: &mut Vec<ValidationIssue>) {
    for phrase in FORBIDDEN_PHRASES {
        if final_text.contains(phrase) {
            issues.push(ValidationIssue::error(
                ValidationIssueKind::ForbiddenPhrase,
                format!("메타 발언 표현이 포함되어 있습니다: \"{}\"", phrase),
                Some(phrase.to_string()),
            ));
        }
    }
}

// ── Rule 3: hallucinated facts ──

fn check_hallucinated_facts(
    final_text: &str,
    original_text: &str,
    spans: &[LockedSpan],
    issues: &mut Vec<ValidationIssue>,
) {
    let p = patterns();

    // Positions in the output covered by safe contextual markers
    let safe_ranges: Vec<(usize, usize)> = p
        .safe_number_context
        .find_iter(final_text)
        .map(|m| (m.start(), m.end()))
        .collect();

    for m in p.digit_run.find_iter(final_text) {
        let num = m.as_str();
        if original_text.contains(num) {
            continue;
        }
        if spans.iter().any(|s| s.original_text.contains(num)) {
            continue;
        }
        if safe_ranges
            .iter()
            .any(|&(s, e)| m.start() >= s && m.end() <= e)
        {
            continue;
        }
        issues.push(ValidationIssue::warning(
            ValidationIssueKind::HallucinatedFact,
            format!("원문에 없는 숫자가 출력에 등장합니다: {}", num),
            Some(num.to_string()),
        ));
    }

    // Korean spelled-out large-number expressions not present in the original
    let original_stripped: String = original_text.split_whitespace().collect();
    for m in p.korean_number.find_iter(final_text) {
        let stripped: String = m.as_str().split_whitespace().collect();
        if !original_stripped.contains(&stripped) {
            issues.push(ValidationIssue::warning(
                ValidationIssueKind::HallucinatedFact,
                format!("원문에 없는 수량 표현이 출력에 등장합니다: {}", m.as_str()),
                Some(m.as_str().to_string()),
            ));
        }
    }
}

// ── Rule 4: ending repetition ──

fn check_ending_repetition(final_text: &str, issues: &mut Vec<ValidationIssue>) {
    let p = patterns();

    let endings: Vec<&str> = p
        .ending
        .captures_iter(final_text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    let mut consecutive = 1;
    for w in endings.windows(2) {
        if w[0] == w[1] {
            consecutive += 1;
            if consecutive >= 3 {
                issues.push(ValidationIssue::warning(
                    ValidationIssueKind::EndingRepetition,
                    format!("같은 문장 종결어가 3회 연속 반복됩니다: {}", w[1]),
                    Some(w[1].to_string()),
                ));
                break;
            }
        } else {
            consecutive = 1;
        }
    }

    let deuriget_count = p.deuriget.find_iter(final_text).count();
    if deuriget_count >= 3 {
        issues.push(ValidationIssue::warning(
            ValidationIssueKind::EndingRepetition,
            format!("'드리겠습니다'가 {}회 사용되었습니다.", deuriget_count),
            Some("드리겠습니다".to_string()),
        ));
    }
}

// ── Rule 5: length overexpansion ──

fn check_length_overexpansion(
    final_text: &str,
    original_text: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let out_len = final_text.chars().count();
    let orig_len = original_text.chars().count();

    if orig_len >= 20 && out_len > orig_len * 3 {
        issues.push(ValidationIssue::warning(
            ValidationIssueKind::LengthOverexpansion,
            format!("출력({}자)이 원문({}자)의 3배를 초과합니다.", out_len, orig_len),
            None,
        ));
    } else if out_len > MAX_ABSOLUTE_OUTPUT_LENGTH {
        issues.push(ValidationIssue::warning(
            ValidationIssueKind::LengthOverexpansion,
            format!("출력이 절대 길이 한도({}자)를 초과합니다.", MAX_ABSOLUTE_OUTPUT_LENGTH),
            None,
        ));
    }
}

// ── Rule 6: perspective errors ──

fn check_perspective_error(final_text: &str, persona: Persona, issues: &mut Vec<ValidationIssue>) {
    if matches!(persona, Persona::Client | Persona::Official) {
        return;
    }
    for phrase in PERSPECTIVE_PHRASES {
        if final_text.contains(phrase) {
            issues.push(ValidationIssue::warning(
                ValidationIssueKind::PerspectiveError,
                format!("수신자 관점에 맞지 않는 표현입니다: \"{}\"", phrase),
                Some(phrase.to_string()),
            ));
            return;
        }
    }
}

// ── Rule 7: locked span missing ──

fn check_locked_span_missing(
    raw_llm_output: Option<&str>,
    final_text: &str,
    spans: &[LockedSpan],
    issues: &mut Vec<ValidationIssue>,
) {
    if spans.is_empty() {
        return;
    }
    let raw = raw_llm_output.unwrap_or(final_text);
    let p = patterns();

    // Canonical forms of every tolerant placeholder variant present in raw
    let tolerant: Vec<String> = p
        .placeholder
        .captures_iter(raw)
        .map(|caps| format!("{{{{{}_{}}}}}", &caps[1], &caps[2]))
        .collect();

    for span in spans {
        let preserved = raw.contains(&span.placeholder)
            || tolerant.iter().any(|t| *t == span.placeholder)
            || raw.contains(&span.original_text)
            || final_text.contains(&span.original_text);
        if !preserved {
            issues.push(ValidationIssue::error(
                ValidationIssueKind::LockedSpanMissing,
                format!(
                    "고정 표현 {}(\"{}\")이 출력에서 누락되었습니다.",
                    span.placeholder, span.original_text
                ),
                Some(span.placeholder.clone()),
            ));
        }
    }
}

// ── Rule 8: redacted reentry + censorship traces ──

fn check_redacted_reentry(
    final_text: &str,
    redaction_map: &HashMap<String, String>,
    issues: &mut Vec<ValidationIssue>,
) {
    let p = patterns();
    let normalized_output = p.normalize_match.replace_all(final_text, "").to_lowercase();

    for (marker, redacted_text) in redaction_map {
        let normalized_redacted = p
            .normalize_match
            .replace_all(redacted_text, "")
            .to_lowercase();
        if !normalized_redacted.is_empty() && normalized_output.contains(&normalized_redacted) {
            issues.push(ValidationIssue::error(
                ValidationIssueKind::RedactedReentry,
                format!("삭제 대상 내용이 출력에 다시 나타났습니다 ({})", marker),
                Some(redacted_text.clone()),
            ));
            continue;
        }

        // Partial reentry: 2+ distinctive content words co-occur
        let distinctive: Vec<&str> = p
            .korean_word
            .find_iter(redacted_text)
            .map(|m| m.as_str())
            .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w))
            .collect();
        if distinctive.len() >= 2 {
            let found = distinctive
                .iter()
                .filter(|w| final_text.contains(**w))
                .count();
            if found >= 2 {
                issues.push(ValidationIssue::warning(
                    ValidationIssueKind::RedactedReentry,
                    format!("삭제 대상 내용의 일부 단어가 출력에 나타났습니다 ({})", marker),
                    Some(redacted_text.clone()),
                ));
            }
        }
    }

    for trace in CENSORSHIP_TRACES {
        if final_text.contains(trace) {
            issues.push(ValidationIssue::error(
                ValidationIssueKind::RedactionTrace,
                format!("검열 흔적 표현이 출력에 포함되어 있습니다: \"{}\"", trace),
                Some(trace.to_string()),
            ));
        }
    }
}

// ── Rule 9: core number missing ──

fn check_core_number_missing(
    final_text: &str,
    original_text: &str,
    spans: &[LockedSpan],
    issues: &mut Vec<ValidationIssue>,
) {
    let p = patterns();

    let safe_ranges: Vec<(usize, usize)> = p
        .safe_number_context
        .find_iter(original_text)
        .map(|m| (m.start(), m.end()))
        .collect();

    let output_no_commas = final_text.replace(',', "");

    for m in p.core_number.find_iter(original_text) {
        let num = m.as_str();
        if spans.iter().any(|s| s.original_text.contains(num)) {
            continue;
        }
        if safe_ranges
            .iter()
            .any(|&(s, e)| m.start() >= s && m.end() <= e)
        {
            continue;
        }

        let comma_normalized = num.replace(',', "");
        if final_text.contains(num) || output_no_commas.contains(&comma_normalized) {
            continue;
        }
        issues.push(ValidationIssue::warning(
            ValidationIssueKind::CoreNumberMissing,
            format!("원문의 핵심 숫자가 출력에서 누락되었습니다: {}", num),
            Some(num.to_string()),
        ));
    }
}

// ── Rule 10: core date missing ──

fn check_core_date_missing(
    final_text: &str,
    original_text: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let p = patterns();
    let output_digits = p.digits_only.replace_all(final_text, "");

    for date_pattern in &p.date_patterns {
        for m in date_pattern.find_iter(original_text) {
            let date = m.as_str();
            if final_text.contains(date) {
                continue;
            }

            // Separator-normalized comparison
            let normalized: String = date
                .chars()
                .filter(|c| !matches!(c, '.' | '/' | '-' | ' '))
                .collect();
            let output_normalized: String = final_text
                .chars()
                .filter(|c| !matches!(c, '.' | '/' | '-' | ' '))
                .collect();
            if output_normalized.contains(&normalized) {
                continue;
            }

            // Numeric-sequence comparison
            let date_digits = p.digits_only.replace_all(date, "");
            if !date_digits.is_empty() && output_digits.contains(date_digits.as_ref()) {
                continue;
            }

            issues.push(ValidationIssue::warning(
                ValidationIssueKind::CoreDateMissing,
                format!("원문의 날짜/시각이 출력에서 누락되었습니다: {}", date),
                Some(date.to_string()),
            ));
        }
    }
}

// ── Rule 11: soften content dropped ──

fn check_soften_content_dropped(
    final_text: &str,
    yellow_segment_texts: &[String],
    issues: &mut Vec<ValidationIssue>,
) {
    let p = patterns();

    for yellow_text in yellow_segment_texts {
        if yellow_text.chars().count() < 15 {
            continue;
        }

        let content_words: Vec<&str> = p
            .korean_word
            .find_iter(yellow_text)
            .map(|m| m.as_str())
            .filter(|w| !STOPWORDS.contains(w))
            .collect();
        if content_words.len() < 2 {
            continue;
        }

        // A word survives if the output contains it or a 2+-char prefix of it
        // (particle variation).
        let any_word_survives = content_words.iter().any(|word| {
            let chars: Vec<char> = word.chars().collect();
            (2..=chars.len()).rev().any(|len| {
                let prefix: String = chars[..len].iter().collect();
                final_text.contains(&prefix)
            })
        });
        if any_word_survives {
            continue;
        }

        let any_digits_survive = p
            .digit_run
            .find_iter(yellow_text)
            .any(|m| final_text.contains(m.as_str()));
        if any_digits_survive {
            continue;
        }

        issues.push(ValidationIssue::warning(
            ValidationIssueKind::SoftenContentDropped,
            format!(
                "완곡 재작성 대상 내용이 통째로 삭제된 것으로 보입니다: \"{}\"",
                truncate_chars(yellow_text, 30)
            ),
            Some(yellow_text.clone()),
        ));
    }
}

// ── Rule 12: section S2 missing ──

fn check_section_s2_missing(
    final_text: &str,
    effective_sections: &[StructureSection],
    labeled_segments: &[LabeledSegment],
    issues: &mut Vec<ValidationIssue>,
) {
    if !effective_sections.contains(&StructureSection::S2OurEffort) {
        return;
    }
    let stats = LabelStats::from_segments(labeled_segments);
    if !(stats.has_accountability || stats.has_negative_feedback) {
        return;
    }
    if patterns().s2_effort.is_match(final_text) {
        return;
    }
    issues.push(ValidationIssue::warning(
        ValidationIssueKind::SectionS2Missing,
        "내부 확인/점검(S2) 섹션에 해당하는 표현이 출력에 없습니다.",
        None,
    ));
}

// ── Rule 13: informal conjunctions ──

fn check_informal_conjunction(final_text: &str, issues: &mut Vec<ValidationIssue>) {
    let found: Vec<&str> = patterns()
        .informal_conjunction
        .find_iter(final_text)
        .map(|m| m.as_str())
        .collect();
    if !found.is_empty() {
        issues.push(ValidationIssue::warning(
            ValidationIssueKind::InformalConjunction,
            format!("구어체 접속사가 출력에 포함되어 있습니다: {}", found.join(", ")),
            Some(found.join(", ")),
        ));
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::SegmentLabel;
    use crate::preprocess::extract;

    fn base_validate(final_text: &str, original_text: &str) -> ValidationResult {
        validate(
            final_text,
            original_text,
            &[],
            None,
            Persona::Other,
            &HashMap::new(),
            &[],
        )
    }

    fn kinds(result: &ValidationResult, kind: ValidationIssueKind) -> Vec<&ValidationIssue> {
        result.issues.iter().filter(|i| i.kind == kind).collect()
    }

    #[test]
    fn test_emoji_detection() {
        let result = base_validate("안녕하세요 😊", "안녕하세요");
        let found = kinds(&result, ValidationIssueKind::Emoji);
        assert!(!found.is_empty());
        assert_eq!(found[0].severity, Severity::Error);
        assert!(!result.passed);
    }

    #[test]
    fn test_forbidden_phrase_detection() {
        let result = base_validate("변환 결과입니다. 좋은 하루 되세요.", "원문");
        let found = kinds(&result, ValidationIssueKind::ForbiddenPhrase);
        assert!(!found.is_empty());
        assert_eq!(found[0].severity, Severity::Error);
    }

    #[test]
    fn test_hallucinated_fact_number() {
        let result = base_validate("총 50000원이 청구되었습니다.", "금액을 확인해주세요.");
        let found = kinds(&result, ValidationIssueKind::HallucinatedFact);
        assert!(!found.is_empty());
        assert_eq!(found[0].severity, Severity::Warning);
    }

    #[test]
    fn test_hallucinated_number_safe_context() {
        // Year context is a safe contextual marker
        let result = base_validate("2024년 계획을 말씀드립니다.", "계획을 말씀드립니다");
        assert!(kinds(&result, ValidationIssueKind::HallucinatedFact).is_empty());
    }

    #[test]
    fn test_ending_repetition_detection() {
        let text = "확인하겠습니다.\n보고하겠습니다.\n처리하겠습니다.\n전달하겠습니다.\n안내하겠습니다.";
        let result = base_validate(text, "원문");
        assert!(!kinds(&result, ValidationIssueKind::EndingRepetition).is_empty());
    }

    #[test]
    fn test_deuriget_three_times() {
        let text = "확인해 드리겠습니다. 전달해 드리겠습니다. 보고 드리겠습니다.";
        let result = base_validate(text, "원문");
        assert!(!kinds(&result, ValidationIssueKind::EndingRepetition).is_empty());
    }

    #[test]
    fn test_length_overexpansion() {
        let original = "이것은 테스트 문장입니다 확인 바랍니다";
        let output = original.repeat(5);
        let result = base_validate(&output, original);
        let found = kinds(&result, ValidationIssueKind::LengthOverexpansion);
        assert!(!found.is_empty());
        assert_eq!(found[0].severity, Severity::Warning);
    }

    #[test]
    fn test_perspective_error() {
        let result = base_validate("확인해 드리겠습니다. 감사합니다.", "확인해 주세요");
        let found = kinds(&result, ValidationIssueKind::PerspectiveError);
        assert!(!found.is_empty());
        assert_eq!(found[0].severity, Severity::Warning);
    }

    #[test]
    fn test_perspective_allowed_for_client() {
        let result = validate(
            "확인해 드리겠습니다. 감사합니다.",
            "확인해 주세요",
            &[],
            None,
            Persona::Client,
            &HashMap::new(),
            &[],
        );
        assert!(kinds(&result, ValidationIssueKind::PerspectiveError).is_empty());
    }

    #[test]
    fn test_locked_span_missing() {
        let original = "test@email.com으로 연락주세요";
        let spans = extract(original);
        let result = validate(
            "이메일 주소가 없습니다.",
            original,
            &spans,
            Some("변환된 결과입니다."),
            Persona::Other,
            &HashMap::new(),
            &[],
        );
        let found = kinds(&result, ValidationIssueKind::LockedSpanMissing);
        assert!(!found.is_empty());
        assert_eq!(found[0].severity, Severity::Error);
        assert!(!result.passed);
    }

    #[test]
    fn test_locked_span_present_via_placeholder() {
        let original = "test@email.com으로 연락주세요";
        let spans = extract(original);
        let result = validate(
            "test@email.com으로 연락 부탁드립니다.",
            original,
            &spans,
            Some("{{EMAIL_1}}으로 연락 부탁드립니다."),
            Persona::Other,
            &HashMap::new(),
            &[],
        );
        assert!(kinds(&result, ValidationIssueKind::LockedSpanMissing).is_empty());
    }

    #[test]
    fn test_locked_span_tolerant_variant_accepted() {
        let original = "test@email.com으로 연락주세요";
        let spans = extract(original);
        let result = validate(
            "메일로 연락 부탁드립니다.",
            original,
            &spans,
            Some("{{ EMAIL-1 }}으로 연락 부탁드립니다."),
            Persona::Other,
            &HashMap::new(),
            &[],
        );
        assert!(kinds(&result, ValidationIssueKind::LockedSpanMissing).is_empty());
    }

    #[test]
    fn test_redacted_reentry() {
        let mut redaction_map = HashMap::new();
        redaction_map.insert(
            "[REDACTED:AGGRESSION_1]".to_string(),
            "이 멍청한 놈아 진짜 짜증나네".to_string(),
        );
        let result = validate(
            "이 멍청한 놈아 진짜 짜증나네 확인 바랍니다.",
            "원문",
            &[],
            None,
            Persona::Other,
            &redaction_map,
            &[],
        );
        assert!(!kinds(&result, ValidationIssueKind::RedactedReentry).is_empty());
        assert!(!result.passed);
    }

    #[test]
    fn test_redaction_trace() {
        let result = base_validate("내용입니다. [삭제됨] 확인 바랍니다.", "원문");
        let found = kinds(&result, ValidationIssueKind::RedactionTrace);
        assert!(!found.is_empty());
        assert_eq!(found[0].severity, Severity::Error);
    }

    #[test]
    fn test_core_number_missing() {
        let result = base_validate("금액을 확인해주세요.", "50000원을 입금해주세요.");
        let found = kinds(&result, ValidationIssueKind::CoreNumberMissing);
        assert!(!found.is_empty());
        assert_eq!(found[0].severity, Severity::Warning);
    }

    #[test]
    fn test_core_number_comma_normalized_match() {
        let result = base_validate("50,000원 입금 부탁드립니다.", "50000원을 입금해주세요.");
        assert!(kinds(&result, ValidationIssueKind::CoreNumberMissing).is_empty());
    }

    #[test]
    fn test_core_date_missing() {
        let result = base_validate("기한을 확인해주세요.", "2024-03-15까지 제출해주세요.");
        let found = kinds(&result, ValidationIssueKind::CoreDateMissing);
        assert!(!found.is_empty());
        assert_eq!(found[0].severity, Severity::Warning);
    }

    #[test]
    fn test_core_date_separator_normalized() {
        let result = base_validate(
            "2024.03.15 까지 제출하겠습니다.",
            "2024-03-15까지 제출해주세요.",
        );
        assert!(kinds(&result, ValidationIssueKind::CoreDateMissing).is_empty());
    }

    #[test]
    fn test_soften_content_dropped() {
        let yellow = vec!["디자인팀 자료가 지연되어 일정이 밀렸습니다".to_string()];
        let result = validate(
            "확인 부탁드립니다.",
            "원문입니다",
            &[],
            None,
            Persona::Other,
            &HashMap::new(),
            &yellow,
        );
        assert!(!kinds(&result, ValidationIssueKind::SoftenContentDropped).is_empty());
    }

    #[test]
    fn test_soften_content_preserved_with_particle_variation() {
        let yellow = vec!["디자인팀 자료가 지연되어 일정이 밀렸습니다".to_string()];
        let result = validate(
            "디자인팀의 자료 전달이 늦어진 점을 공유드립니다.",
            "원문입니다",
            &[],
            None,
            Persona::Other,
            &HashMap::new(),
            &yellow,
        );
        assert!(kinds(&result, ValidationIssueKind::SoftenContentDropped).is_empty());
    }

    #[test]
    fn test_section_s2_missing() {
        let sections = vec![
            StructureSection::S0Greeting,
            StructureSection::S2OurEffort,
            StructureSection::S3Facts,
        ];
        let labeled = vec![LabeledSegment::new(
            "T1",
            SegmentLabel::Accountability,
            "귀사 설정 문제",
            0,
            10,
        )];
        let result = validate_with_template(
            "전달드립니다. 감사합니다.",
            "원문",
            &[],
            None,
            Persona::Other,
            &HashMap::new(),
            &[],
            &sections,
            &labeled,
        );
        assert!(!kinds(&result, ValidationIssueKind::SectionS2Missing).is_empty());

        let ok = validate_with_template(
            "내부 점검 결과를 전달드립니다.",
            "원문",
            &[],
            None,
            Persona::Other,
            &HashMap::new(),
            &[],
            &sections,
            &labeled,
        );
        assert!(kinds(&ok, ValidationIssueKind::SectionS2Missing).is_empty());
    }

    #[test]
    fn test_informal_conjunction() {
        let result = base_validate(
            "어쨌든 확인 부탁드립니다. 아무튼 일정을 조율하겠습니다.",
            "어쨌든 확인해주세요.",
        );
        let found = kinds(&result, ValidationIssueKind::InformalConjunction);
        assert!(!found.is_empty());
        assert_eq!(found[0].severity, Severity::Warning);
        assert!(found[0].is_retryable_warning());
    }

    #[test]
    fn test_clean_output_passes() {
        let result = base_validate("보고서 제출 부탁드립니다.", "보고서 제출해주세요.");
        assert!(result.passed);
        assert!(!result.has_errors());
    }

    #[test]
    fn test_retry_hint_lists_missing_placeholders() {
        let original = "test@email.com으로 연락주세요";
        let spans = extract(original);
        let issues = vec![ValidationIssue::error(
            ValidationIssueKind::LockedSpanMissing,
            "누락",
            Some("{{EMAIL_1}}".to_string()),
        )];
        let hint = build_locked_span_retry_hint(&issues, &spans);
        assert!(hint.contains("{{EMAIL_1}}"));
        assert!(hint.contains("test@email.com"));

        assert!(build_locked_span_retry_hint(&[], &spans).is_empty());
    }

    #[test]
    fn test_validation_result_helpers() {
        let result = base_validate("안녕 😊 변환 결과", "안녕");
        assert!(result.has_errors());
        assert!(!result.errors().is_empty());
        assert!(result
            .errors()
            .iter()
            .all(|i| i.severity == Severity::Error));
        assert!(result
            .warnings()
            .iter()
            .all(|i| i.severity == Severity::Warning));
    }
}
