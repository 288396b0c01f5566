//! LLM-based segment refiner for long segments.
//!
//! After the rule-based segmenter, segments exceeding the length threshold are
//! batched into a single LLM call for semantic splitting.
//!
//! Flow:
//!   1. Filter segments > min_length (default 30 chars)
//!   2. Batch long segments into one prompt, numbered `[1]..[k]`
//!   3. The model inserts `|||` delimiters at semantic boundaries
//!   4. Parse the response, validate sub-texts exist in the original in order
//!   5. Rebuild the segment list with updated IDs (T1..Tn)
//!
//! If the LLM fails or produces invalid output, original segments are kept.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::Result;
use crate::llm::{LlmRequest, LlmRouter};
use crate::types::Segment;

const MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f64 = 0.0;
const MAX_TOKENS: u32 = 600;
pub const MIN_LENGTH_DEFAULT: usize = 30;

const SYSTEM_PROMPT: &str = "당신은 한국어 텍스트 의미 분절 전문가입니다.\n\n\
각 항목이 둘 이상의 독립된 의미 단위(완결된 생각/주장/사실)를 포함할 때만 분리하세요.\n\
하나의 의미 단위라면 길더라도 원문 그대로 출력하세요. 무리하게 쪼개지 마세요.\n\n\
규칙:\n\
1. 분리 시 ||| 를 삽입하세요\n\
2. 원문 텍스트를 정확히 보존하세요 (한 글자도 변경/추가/삭제 금지)\n\
3. {{TYPE_N}} 형식 플레이스홀더(예: {{DATE_1}}, {{PHONE_1}})는 절대 분리하지 마세요\n\
4. 너무 짧은 조각(10자 미만)이 생기지 않도록 하세요\n\
5. [N] 번호를 유지하고, 각 항목을 한 줄에 출력하세요";

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\[(\d+)]\s*(.+)$").unwrap())
}

/// Refinement outcome.
#[derive(Debug, Clone)]
pub struct RefineResult {
    pub segments: Vec<Segment>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Refine long segments using the LLM, keeping originals on any failure.
pub async fn refine(
    segments: Vec<Segment>,
    masked_text: &str,
    llm: &LlmRouter,
    min_length: usize,
) -> Result<RefineResult> {
    let long_indices: Vec<usize> = segments
        .iter()
        .enumerate()
        .filter(|(_, seg)| seg.text.chars().count() > min_length)
        .map(|(i, _)| i)
        .collect();

    if long_indices.is_empty() {
        tracing::debug!("[SegmentRefiner] No segments > {} chars, skipping LLM", min_length);
        return Ok(RefineResult {
            segments,
            prompt_tokens: 0,
            completion_tokens: 0,
        });
    }

    tracing::info!(
        "[SegmentRefiner] {} segments > {} chars, invoking LLM",
        long_indices.len(),
        min_length
    );

    let user_msg = long_indices
        .iter()
        .enumerate()
        .map(|(i, &idx)| format!("[{}] {}", i + 1, segments[idx].text))
        .collect::<Vec<_>>()
        .join("\n");

    let request = LlmRequest::new(MODEL, SYSTEM_PROMPT, user_msg)
        .with_temperature(TEMPERATURE)
        .with_max_tokens(MAX_TOKENS);

    match llm.complete(&request).await {
        Ok(result) => {
            let splits = parse_response(&result.content, &segments, &long_indices);
            let refined = rebuild_segments(&segments, &long_indices, &splits, masked_text);
            tracing::info!(
                "[SegmentRefiner] {} -> {} segments (LLM split {} long segments)",
                segments.len(),
                refined.len(),
                long_indices.len()
            );
            Ok(RefineResult {
                segments: refined,
                prompt_tokens: result.prompt_tokens,
                completion_tokens: result.completion_tokens,
            })
        }
        Err(e) => {
            tracing::warn!("[SegmentRefiner] LLM call failed, keeping original segments: {}", e);
            Ok(RefineResult {
                segments,
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }
    }
}

fn parse_response(
    response: &str,
    segments: &[Segment],
    long_indices: &[usize],
) -> Vec<Vec<String>> {
    // Initialize with originals as fallback
    let mut result: Vec<Vec<String>> = long_indices
        .iter()
        .map(|&idx| vec![segments[idx].text.clone()])
        .collect();

    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(caps) = entry_pattern().captures(line) else {
            continue;
        };

        let entry_num: usize = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if entry_num < 1 || entry_num > long_indices.len() {
            continue;
        }

        let entry_idx = entry_num - 1;
        let original_text = &segments[long_indices[entry_idx]].text;

        let parts: Vec<String> = caps[2]
            .split("|||")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if parts.len() > 1 && validate_parts(&parts, original_text) {
            result[entry_idx] = parts;
        } else if parts.len() == 1 {
            result[entry_idx] = vec![original_text.clone()];
        }
    }

    result
}

/// All parts must occur in the original text in order (whitespace-normalized
/// containment as a fallback).
fn validate_parts(parts: &[String], original_text: &str) -> bool {
    static WS: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").unwrap());

    let mut search_from = 0usize;
    for part in parts {
        let pos = match original_text[search_from..].find(part.as_str()) {
            Some(p) => search_from + p,
            None => {
                let normalized = ws.replace_all(part, " ");
                match original_text[search_from..].find(normalized.as_ref()) {
                    Some(p) => search_from + p,
                    None => {
                        tracing::debug!(
                            "[SegmentRefiner] Part '{}...' not found in original at offset {}",
                            part.chars().take(30).collect::<String>(),
                            search_from
                        );
                        return false;
                    }
                }
            }
        };
        search_from = pos + part.len();
    }
    true
}

fn rebuild_segments(
    original: &[Segment],
    long_indices: &[usize],
    splits: &[Vec<String>],
    masked_text: &str,
) -> Vec<Segment> {
    let mut result: Vec<Segment> = Vec::new();
    let mut long_idx = 0usize;
    let mut seg_id = 1usize;

    for (i, seg) in original.iter().enumerate() {
        if long_idx < long_indices.len() && long_indices[long_idx] == i {
            let parts = &splits[long_idx];
            let mut search_from = seg.start.min(masked_text.len());

            for part in parts {
                let pos = match masked_text[search_from..].find(part.as_str()) {
                    Some(p) => search_from + p,
                    None => {
                        tracing::warn!(
                            "[SegmentRefiner] Split part not found in maskedText, using fallback pos {}",
                            search_from
                        );
                        search_from
                    }
                };
                let end = (pos + part.len()).min(masked_text.len());
                result.push(Segment::new(seg_id, part.clone(), pos, end));
                seg_id += 1;
                search_from = end;
            }

            long_idx += 1;
        } else {
            result.push(Segment::new(seg_id, seg.text.clone(), seg.start, seg.end));
            seg_id += 1;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::llm::MockProvider;
    use pretty_assertions::assert_eq;

    fn seg(order: usize, text: &str, start: usize) -> Segment {
        Segment::new(order, text, start, start + text.len())
    }

    #[tokio::test]
    async fn test_short_segments_skip_llm() {
        let mock = Arc::new(MockProvider::new());
        let router = LlmRouter::single(mock.clone());
        let segments = vec![seg(1, "짧은 문장", 0)];

        let result = refine(segments.clone(), "짧은 문장", &router, MIN_LENGTH_DEFAULT)
            .await
            .unwrap();
        assert_eq!(result.segments, segments);
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_split_accepted_and_renumbered() {
        let text = "디자인팀 자료가 늦게 와서 일정이 밀렸고 보고서 품질도 영향을 받았습니다";
        let masked = text;
        let segments = vec![seg(1, text, 0)];

        let mock = Arc::new(MockProvider::new());
        mock.push_response(format!(
            "[1] {} ||| {}",
            "디자인팀 자료가 늦게 와서 일정이 밀렸고", "보고서 품질도 영향을 받았습니다"
        ));
        let router = LlmRouter::single(mock);

        let result = refine(segments, masked, &router, MIN_LENGTH_DEFAULT).await.unwrap();
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[0].id, "T1");
        assert_eq!(result.segments[1].id, "T2");
        assert!(result.segments[0].start < result.segments[1].start);
    }

    #[tokio::test]
    async fn test_invalid_split_keeps_original() {
        let text = "원문과 전혀 무관한 분할 결과가 돌아오면 원본을 유지해야 합니다";
        let segments = vec![seg(1, text, 0)];

        let mock = Arc::new(MockProvider::new());
        mock.push_response("[1] 완전히 ||| 다른 텍스트");
        let router = LlmRouter::single(mock);

        let result = refine(segments.clone(), text, &router, MIN_LENGTH_DEFAULT)
            .await
            .unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].text, text);
    }

    #[tokio::test]
    async fn test_llm_failure_keeps_originals() {
        let text = "모델 호출이 실패하더라도 기존 세그먼트가 그대로 유지되어야 합니다";
        let segments = vec![seg(1, text, 0)];

        let mock = Arc::new(MockProvider::new());
        mock.push_error("rate limited");
        let router = LlmRouter::single(mock);

        let result = refine(segments.clone(), text, &router, MIN_LENGTH_DEFAULT)
            .await
            .unwrap();
        assert_eq!(result.segments, segments);
        assert_eq!(result.prompt_tokens, 0);
    }

    #[test]
    fn test_validate_parts_in_order() {
        let original = "가나다 라마바 사아자";
        assert!(validate_parts(
            &["가나다".to_string(), "라마바 사아자".to_string()],
            original
        ));
        // Out of order fails
        assert!(!validate_parts(
            &["라마바".to_string(), "가나다".to_string()],
            original
        ));
    }
}
