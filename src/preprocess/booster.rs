//! Semantic locked-span booster.
//!
//! Optional LLM pass that extracts proper nouns, product names, and other
//! unique identifiers the regex set cannot catch. Found spans become SEMANTIC
//! locked spans indexed after the existing ones.

use regex::Regex;

use crate::config::settings;
use crate::error::Result;
use crate::llm::{LlmRequest, LlmRouter};

use super::extractor::{LockedSpan, LockedSpanKind};

const TEMPERATURE: f64 = 0.2;
const MAX_TOKENS: u32 = 300;

const SYSTEM_PROMPT: &str = "당신은 텍스트에서 변경 불가능한 고유 표현을 추출하는 전문가입니다.\n\
정규식으로 잡을 수 없는, 대체하면 의미가 달라지는 고유 식별자만 찾습니다.\n\n\
이미 마스킹된 {{TYPE_N}} 형식의 플레이스홀더(예: {{DATE_1}}, {{PHONE_1}})는 무시하세요.\n\
날짜, 시간, 전화번호, 이메일, URL, 금액 등은 이미 처리되었으므로 제외하세요.\n\n\
## 추출 대상 (고유 식별자만)\n\
- 사람/회사/기관의 고유 이름 (예: 김민수, ㈜한빛소프트)\n\
- 프로젝트/제품/서비스 고유 명칭 (예: Project Alpha, 스터디플랜 v2)\n\
- 파일명, 코드명, 시스템명 (예: report_final.xlsx, ERP)\n\n\
## 제외 대상 (절대 추출 금지)\n\
- 일반 명사, 보통 명사, 일상 어휘\n\
- 관계/역할 호칭 (학부모, 담임, 교수, 팀장, 고객, 선생님 등)\n\
- 메타데이터에 이미 명시된 정보 (받는 사람, 상황 등)\n\
- 누구나 쓸 수 있는 범용 단어\n\n\
기준: \"이 단어를 다른 말로 바꾸면 지칭 대상이 달라지는가?\" → Yes만 추출.\n\n\
변경 불가 표현을 한 줄에 하나씩, \"- \" 접두사로 작성하세요.\n\
예:\n\
- 김민수\n\
- report_final.xlsx\n\
- ㈜한빛소프트\n\n\
예시 (추출 없음):\n\
원문: 내일까지 보고서 제출 부탁드립니다\n\
출력: 없음\n\n\
변경 불가 표현이 없으면 \"없음\"이라고만 작성하세요.";

/// Result of the booster pass.
#[derive(Debug, Clone)]
pub struct BoosterResult {
    /// Newly found SEMANTIC spans only.
    pub extra_spans: Vec<LockedSpan>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Extract semantic locked spans using the label model.
pub async fn boost(
    normalized_text: &str,
    current_spans: &[LockedSpan],
    masked_text: &str,
    llm: &LlmRouter,
) -> Result<BoosterResult> {
    let request = LlmRequest::new(
        settings().gemini_label_model.clone(),
        SYSTEM_PROMPT,
        format!("원문:\n{}", masked_text),
    )
    .with_temperature(TEMPERATURE)
    .with_max_tokens(MAX_TOKENS);

    let result = llm.complete(&request).await?;

    let extra_spans = parse_semantic_spans(normalized_text, current_spans, &result.content);
    if !extra_spans.is_empty() {
        tracing::info!("[IdentityBooster] Found {} semantic spans", extra_spans.len());
    }

    Ok(BoosterResult {
        extra_spans,
        prompt_tokens: result.prompt_tokens,
        completion_tokens: result.completion_tokens,
    })
}

fn parse_semantic_spans(
    normalized_text: &str,
    existing_spans: &[LockedSpan],
    output: &str,
) -> Vec<LockedSpan> {
    let output = output.trim();
    if output.is_empty() || output == "없음" {
        return Vec::new();
    }

    let mut known: Vec<(usize, usize)> = existing_spans.iter().map(|s| (s.start, s.end)).collect();
    let mut next_index = existing_spans.len();
    let mut result = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        let Some(text) = line.strip_prefix("- ") else {
            continue;
        };
        let text = text.trim();
        if text.chars().count() < 2 {
            continue;
        }

        let Ok(pattern) = build_word_boundary_pattern(text) else {
            continue;
        };
        for m in pattern.find_iter(normalized_text) {
            let overlaps = known.iter().any(|&(s, e)| m.start() < e && m.end() > s);
            if overlaps {
                continue;
            }

            let prefix = LockedSpanKind::Semantic.placeholder_prefix();
            let span = LockedSpan {
                index: next_index,
                original_text: text.to_string(),
                placeholder: format!("{{{{{}_{}}}}}", prefix, next_index),
                kind: LockedSpanKind::Semantic,
                start: m.start(),
                end: m.end(),
            };
            known.push((span.start, span.end));
            next_index += 1;
            result.push(span);
        }
    }

    result
}

/// Word-boundary-aware pattern: `\b` for latin edges, Hangul-adjacency checks
/// for Korean edges (the regex crate has no lookaround, so the Hangul case
/// matches a bounding group and reports the inner range via capture 1).
fn build_word_boundary_pattern(text: &str) -> std::result::Result<WordBoundaryPattern, regex::Error> {
    let first = text.chars().next().unwrap_or(' ');
    let last = text.chars().last().unwrap_or(' ');
    let quoted = regex::escape(text);

    let prefix_korean = is_korean_char(first);
    let suffix_korean = is_korean_char(last);

    let prefix = if prefix_korean {
        r"(?:^|[^가-힣ㄱ-ㅎㅏ-ㅣ])"
    } else {
        r"\b"
    };
    let suffix = if suffix_korean {
        r"(?:[^가-힣ㄱ-ㅎㅏ-ㅣ]|$)"
    } else {
        r"\b"
    };

    let regex = Regex::new(&format!("{}({}){}", prefix, quoted, suffix))?;
    Ok(WordBoundaryPattern { regex })
}

struct WordBoundaryPattern {
    regex: Regex,
}

struct BoundaryMatch {
    start: usize,
    end: usize,
}

impl BoundaryMatch {
    fn start(&self) -> usize {
        self.start
    }
    fn end(&self) -> usize {
        self.end
    }
}

impl WordBoundaryPattern {
    fn find_iter<'a>(&'a self, text: &'a str) -> impl Iterator<Item = BoundaryMatch> + 'a {
        self.regex.captures_iter(text).filter_map(|caps| {
            caps.get(1).map(|m| BoundaryMatch {
                start: m.start(),
                end: m.end(),
            })
        })
    }
}

fn is_korean_char(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7A3}' | '\u{3131}'..='\u{314E}' | '\u{314F}'..='\u{3163}')
}
