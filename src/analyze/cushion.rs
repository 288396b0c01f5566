//! Cushion strategy for YELLOW segment rewriting guidance.
//!
//! Makes parallel per-YELLOW LLM calls and merges the results. Per-segment
//! failures are tolerated; an empty overall result is valid.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::settings;
use crate::error::Result;
use crate::label::{LabelTier, LabeledSegment};
use crate::llm::{LlmRequest, LlmRouter};

use super::situation::SituationAnalysisResult;

const TEMPERATURE: f64 = 0.3;
const PER_SEGMENT_MAX_TOKENS: u32 = 800;
const THINKING_BUDGET: u32 = 512;
const CUSHION_PHRASE_MAX_CHARS: usize = 15;

const PER_SEGMENT_SYSTEM_PROMPT: &str = concat!(
    "역할: 한국어 비즈니스 커뮤니케이션 쿠션 전략 설계 전문가\n\n",
    "## 임무\n",
    "주어진 YELLOW 세그먼트 1개에 대해 **쿠션 전략**을 설계하세요.\n",
    "쿠션 = YELLOW 내용을 수신자가 받아들이기 쉽게 만드는 완충 표현/접근법입니다.\n\n",
    "## 출력 형식\n",
    "아래 키를 가진 flat JSON 객체 하나만 출력. 마크다운 코드블록/설명 없이 순수 JSON만.\n",
    "{\n",
    "  \"segment_id\": \"세그먼트 ID (예: T2)\",\n",
    "  \"label\": \"세그먼트 라벨\",\n",
    "  \"approach\": \"재작성 접근법 1문장 (예: 상황 주어로 전환하여 책임 분산)\",\n",
    "  \"cushion_phrase\": \"실제 사용할 쿠션 표현 (예: 확인해 본 결과)\",\n",
    "  \"avoid\": \"금지 표현/패턴 (예: 직접적 책임 지적)\"\n",
    "}\n\n",
    "## 쿠션 표현 제약 (필수)\n",
    "- cushion_phrase는 **최대 15자**. 짧고 자연스러운 비즈니스 표현만.\n",
    "- 과잉 보상 금지:\n",
    "  ✗ 고어/과잉 사과: \"금할 길이 없습니다\", \"송구스럽기 그지없습니다\", \"면목이 없습니다\"\n",
    "  ✗ 과잉 감정: \"진심으로 깊이\", \"마음이 무겁습니다\", \"죄송한 마음 금할 길이\"\n",
    "  ✗ 과도한 겸양: \"감히 말씀드리기 어렵지만\", \"부족한 저로서는\"\n",
    "- 자연스러운 예시: \"확인해 보니\" / \"살펴본 바로는\" / \"말씀드리면\" / \"관련하여\" / \"배경을 말씀드리면\"\n\n",
    "## 라벨별 제약\n",
    "- ACCOUNTABILITY: 상황/시스템 주어 전환. 직접 귀책 금지.\n",
    "- SELF_JUSTIFICATION: 방어 프레임 제거. 업무 맥락만 사실로 전환.\n",
    "- NEGATIVE_FEEDBACK: 긍정 인정 선행. 직접 거부/판단 금지.\n",
    "- EMOTIONAL: 감정 삭제 금지, 간접 전환만. 과잉 공감 금지.\n",
    "- EXCESS_DETAIL: 압축 중심. 쿠션은 최소화.\n\n",
    "## 예시\n\n",
    "입력: T2 | ACCOUNTABILITY | \"귀사 서버 설정이 이상해서 생긴거고\"\n\n",
    "출력:\n",
    "{\n",
    "  \"segment_id\": \"T2\",\n",
    "  \"label\": \"ACCOUNTABILITY\",\n",
    "  \"approach\": \"상황/시스템 주어로 전환, 비난 제거\",\n",
    "  \"cushion_phrase\": \"확인해 본 결과\",\n",
    "  \"avoid\": \"직접 귀책 지목, 비난 어조\"\n",
    "}\n\n",
    "## 주의사항\n",
    "- 화자 의도(SA intent)를 훼손하지 않는 범위에서 쿠션 적용\n",
    "- 쿠션이 본문보다 길어지면 안 됨 - 쿠션은 보조, 본문 사실이 주연\n",
);

/// One per-segment cushion strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStrategy {
    pub segment_id: String,
    pub label: String,
    pub approach: String,
    pub cushion_phrase: String,
    pub avoid: String,
}

/// The merged cushion strategy across all YELLOW segments.
#[derive(Debug, Clone, Default)]
pub struct CushionStrategy {
    pub raw_json: String,
    pub overall_tone: String,
    pub strategies: Vec<SegmentStrategy>,
    pub transition_notes: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl CushionStrategy {
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Generate cushion strategies for YELLOW segments via parallel per-segment
/// LLM calls. Returns an empty strategy if there are no YELLOW segments or
/// every call fails.
pub async fn generate(
    sa_result: &SituationAnalysisResult,
    labeled_segments: &[LabeledSegment],
    sender_info: Option<&str>,
    llm: &LlmRouter,
) -> Result<CushionStrategy> {
    let yellow: Vec<&LabeledSegment> = labeled_segments
        .iter()
        .filter(|s| s.tier() == LabelTier::Yellow)
        .collect();
    if yellow.is_empty() {
        tracing::info!("[CushionStrategy] No YELLOW segments, skipping");
        return Ok(CushionStrategy::default());
    }

    let tasks = yellow
        .iter()
        .map(|seg| generate_single(sa_result, seg, labeled_segments, sender_info, llm));
    let results = join_all(tasks).await;

    let mut strategies: Vec<SegmentStrategy> = Vec::new();
    let mut total_prompt = 0u64;
    let mut total_completion = 0u64;
    for r in results.into_iter().flatten() {
        strategies.push(r.strategy);
        total_prompt += r.prompt_tokens;
        total_completion += r.completion_tokens;
    }

    if strategies.is_empty() {
        tracing::warn!("[CushionStrategy] All per-segment calls failed, returning empty");
        return Ok(CushionStrategy::default());
    }

    let overall_tone = derive_overall_tone(&strategies);
    let transition_notes = derive_transition_notes(&strategies);
    let raw_json = json!({
        "overall_tone": &overall_tone,
        "strategies": &strategies,
        "transition_notes": &transition_notes,
    })
    .to_string();

    tracing::info!(
        "[CushionStrategy] Generated {}/{} strategies",
        strategies.len(),
        yellow.len()
    );

    Ok(CushionStrategy {
        raw_json,
        overall_tone,
        strategies,
        transition_notes,
        prompt_tokens: total_prompt,
        completion_tokens: total_completion,
    })
}

struct SingleResult {
    strategy: SegmentStrategy,
    prompt_tokens: u64,
    completion_tokens: u64,
}

async fn generate_single(
    sa_result: &SituationAnalysisResult,
    target: &LabeledSegment,
    all_segments: &[LabeledSegment],
    sender_info: Option<&str>,
    llm: &LlmRouter,
) -> Option<SingleResult> {
    let user_message = build_per_segment_user_message(sa_result, target, all_segments, sender_info);

    let request = LlmRequest::new(
        settings().gemini_label_model.clone(),
        PER_SEGMENT_SYSTEM_PROMPT,
        user_message,
    )
    .with_temperature(TEMPERATURE)
    .with_max_tokens(PER_SEGMENT_MAX_TOKENS)
    .with_thinking_budget(Some(THINKING_BUDGET));

    let result = match llm.complete(&request).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(
                "[CushionStrategy] generate_single failed for {}: {}",
                target.segment_id,
                e
            );
            return None;
        }
    };

    let json = super::situation::extract_json_object(&result.content)?;
    let mut strategy: SegmentStrategy = match serde_json::from_str(json) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(
                "[CushionStrategy] Invalid JSON for {}: {}",
                target.segment_id,
                e
            );
            return None;
        }
    };

    // Enforce the cushion phrase length cap
    if strategy.cushion_phrase.chars().count() > CUSHION_PHRASE_MAX_CHARS {
        strategy.cushion_phrase = strategy
            .cushion_phrase
            .chars()
            .take(CUSHION_PHRASE_MAX_CHARS)
            .collect();
    }

    Some(SingleResult {
        strategy,
        prompt_tokens: result.prompt_tokens,
        completion_tokens: result.completion_tokens,
    })
}

fn build_per_segment_user_message(
    sa_result: &SituationAnalysisResult,
    target: &LabeledSegment,
    all_segments: &[LabeledSegment],
    sender_info: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push("## 상황 분석\n".to_string());
    for f in &sa_result.facts {
        parts.push(format!("- {}\n", f.content));
    }
    if !sa_result.intent.is_empty() {
        parts.push(format!("의도: {}\n", sa_result.intent));
    }
    if let Some(sender) = sender_info {
        parts.push(format!("발신자: {}\n", sender));
    }
    parts.push("\n".to_string());

    parts.push("## 대상 YELLOW 세그먼트\n".to_string());
    parts.push(format!(
        "- {} | {} | {}\n\n",
        target.segment_id, target.label, target.text
    ));

    // Adjacent segments for context (1 before, 1 after)
    let mut sorted: Vec<&LabeledSegment> = all_segments.iter().collect();
    sorted.sort_by_key(|s| s.start);
    if let Some(idx) = sorted
        .iter()
        .position(|s| s.segment_id == target.segment_id)
    {
        let mut neighbors: Vec<&LabeledSegment> = Vec::new();
        if idx > 0 {
            neighbors.push(sorted[idx - 1]);
        }
        if idx + 1 < sorted.len() {
            neighbors.push(sorted[idx + 1]);
        }
        if !neighbors.is_empty() {
            parts.push("## 인접 세그먼트 (맥락용)\n".to_string());
            for seg in neighbors {
                let text = if seg.tier() == LabelTier::Red {
                    "[삭제됨]"
                } else {
                    seg.text.as_str()
                };
                parts.push(format!(
                    "- {} | {}/{} | {}\n",
                    seg.segment_id,
                    seg.tier(),
                    seg.label,
                    text
                ));
            }
        }
    }

    parts.concat()
}

const LABEL_PRIORITY: [(&str, &str); 5] = [
    ("ACCOUNTABILITY", "상황 중심 건설적 톤"),
    ("NEGATIVE_FEEDBACK", "긍정 전환 요청 톤"),
    ("SELF_JUSTIFICATION", "사실 기반 간결 톤"),
    ("EMOTIONAL", "공감 기반 절제된 톤"),
    ("EXCESS_DETAIL", "핵심 위주 간결 톤"),
];

/// Pick the overall tone from the highest-priority label present.
fn derive_overall_tone(strategies: &[SegmentStrategy]) -> String {
    for (label, tone) in LABEL_PRIORITY {
        if strategies.iter().any(|s| s.label == label) {
            return tone.to_string();
        }
    }
    "정중하고 명확한 전달 톤".to_string()
}

/// Auto-generate transition hints when 2+ strategies exist.
fn derive_transition_notes(strategies: &[SegmentStrategy]) -> String {
    if strategies.len() < 2 {
        return String::new();
    }
    let unique: std::collections::HashSet<&str> =
        strategies.iter().map(|s| s.label.as_str()).collect();
    if unique.len() >= 2 {
        "서로 다른 유형의 YELLOW 세그먼트가 있으므로 각 쿠션 표현이 중복되지 않도록 다양하게 전환하세요."
            .to_string()
    } else {
        "동일 유형 YELLOW 세그먼트가 반복되므로 쿠션 표현에 변화를 주어 단조로움을 피하세요."
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::label::SegmentLabel;
    use crate::llm::MockProvider;
    use pretty_assertions::assert_eq;

    fn yellow(id: &str, label: SegmentLabel, text: &str, start: usize) -> LabeledSegment {
        LabeledSegment::new(id, label, text, start, start + text.len())
    }

    fn strategy_json(id: &str, label: &str, phrase: &str) -> String {
        json!({
            "segment_id": id,
            "label": label,
            "approach": "상황 주어 전환",
            "cushion_phrase": phrase,
            "avoid": "직접 귀책 지목",
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_no_yellow_segments_is_empty() {
        let router = LlmRouter::single(Arc::new(MockProvider::new()));
        let segments = vec![yellow("T1", SegmentLabel::CoreFact, "사실", 0)];
        let result = generate(&SituationAnalysisResult::default(), &segments, None, &router)
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_per_segment_failure_tolerated() {
        let mock = Arc::new(MockProvider::new());
        mock.push_response(strategy_json("T1", "ACCOUNTABILITY", "확인해 본 결과"));
        mock.push_error("timeout");
        let router = LlmRouter::single(mock);

        let segments = vec![
            yellow("T1", SegmentLabel::Accountability, "귀사 설정이 문제였고요", 0),
            yellow("T2", SegmentLabel::Emotional, "정말 답답합니다", 40),
        ];
        let result = generate(&SituationAnalysisResult::default(), &segments, None, &router)
            .await
            .unwrap();
        assert_eq!(result.strategies.len(), 1);
        assert_eq!(result.overall_tone, "상황 중심 건설적 톤");
    }

    #[tokio::test]
    async fn test_cushion_phrase_truncated_to_15_chars() {
        let mock = Arc::new(MockProvider::new());
        mock.push_response(strategy_json(
            "T1",
            "EMOTIONAL",
            "정말 너무너무 길고 장황한 쿠션 표현이 들어왔습니다",
        ));
        let router = LlmRouter::single(mock);

        let segments = vec![yellow("T1", SegmentLabel::Emotional, "정말 답답합니다", 0)];
        let result = generate(&SituationAnalysisResult::default(), &segments, None, &router)
            .await
            .unwrap();
        assert_eq!(
            result.strategies[0].cushion_phrase.chars().count(),
            CUSHION_PHRASE_MAX_CHARS
        );
    }

    #[test]
    fn test_overall_tone_priority() {
        let acc = SegmentStrategy {
            segment_id: "T1".into(),
            label: "ACCOUNTABILITY".into(),
            approach: String::new(),
            cushion_phrase: String::new(),
            avoid: String::new(),
        };
        let emo = SegmentStrategy {
            label: "EMOTIONAL".into(),
            ..acc.clone()
        };
        assert_eq!(
            derive_overall_tone(&[emo.clone(), acc.clone()]),
            "상황 중심 건설적 톤"
        );
        assert_eq!(derive_overall_tone(&[emo]), "공감 기반 절제된 톤");
    }

    #[test]
    fn test_transition_notes() {
        let a = SegmentStrategy {
            segment_id: "T1".into(),
            label: "EMOTIONAL".into(),
            approach: String::new(),
            cushion_phrase: String::new(),
            avoid: String::new(),
        };
        assert!(derive_transition_notes(&[a.clone()]).is_empty());
        let b = SegmentStrategy {
            label: "ACCOUNTABILITY".into(),
            ..a.clone()
        };
        assert!(derive_transition_notes(&[a.clone(), b]).contains("서로 다른 유형"));
        assert!(derive_transition_notes(&[a.clone(), a]).contains("동일 유형"));
    }
}
