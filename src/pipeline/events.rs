//! Typed events for the streaming pipeline.
//!
//! Every event carries a fixed wire name and a payload: `delta`/`delta_b` are
//! raw text fragments, everything else serializes to JSON. The orchestrator
//! pushes events onto a bounded queue in producer order; the server drains
//! FIFO and frames them as SSE.

use serde::Serialize;
use serde_json::{json, Value};

use crate::analyze::{CushionStrategy, SituationAnalysisResult};
use crate::label::LabeledSegment;
use crate::preprocess::LockedSpan;
use crate::rag::RagResults;
use crate::template::StructureTemplate;
use crate::types::Segment;

use super::stats::{PipelineStats, UsageSummary};
use super::validator::ValidationIssue;

/// One streaming event.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    name: &'static str,
    data: String,
}

impl PipelineEvent {
    /// The SSE event name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The SSE data payload (raw text for deltas, JSON otherwise).
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_done(&self) -> bool {
        self.name == "done"
    }

    pub fn is_error(&self) -> bool {
        self.name == "error"
    }

    fn text(name: &'static str, data: impl Into<String>) -> Self {
        Self {
            name,
            data: data.into(),
        }
    }

    fn json<T: Serialize>(name: &'static str, payload: &T) -> Self {
        Self {
            name,
            data: serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string()),
        }
    }

    // Constructors for the fixed event set

    pub fn phase(phase: &str) -> Self {
        Self::text("phase", phase)
    }

    pub fn spans(spans: &[LockedSpan]) -> Self {
        let data: Vec<Value> = spans
            .iter()
            .map(|s| {
                json!({
                    "placeholder": &s.placeholder,
                    "original": &s.original_text,
                    "type": s.kind.name(),
                })
            })
            .collect();
        Self::json("spans", &data)
    }

    pub fn masked_text(masked: &str) -> Self {
        Self::text("maskedText", masked)
    }

    pub fn segments(segments: &[Segment]) -> Self {
        Self::json("segments", &segments)
    }

    pub fn labels(labeled: &[LabeledSegment]) -> Self {
        let data: Vec<Value> = labeled
            .iter()
            .map(|s| {
                json!({
                    "segmentId": &s.segment_id,
                    "label": s.label.name(),
                    "tier": s.tier().to_string(),
                    "text": &s.text,
                })
            })
            .collect();
        Self::json("labels", &data)
    }

    pub fn situation_analysis(sa: &SituationAnalysisResult) -> Self {
        let data = json!({
            "facts": sa.facts.iter().map(|f| json!({
                "content": &f.content,
                "source": &f.source,
            })).collect::<Vec<_>>(),
            "intent": &sa.intent,
        });
        Self::json("situationAnalysis", &data)
    }

    /// Post-redaction view: RED segments carry `text: null`.
    pub fn processed_segments(labeled: &[LabeledSegment]) -> Self {
        let data: Vec<Value> = labeled
            .iter()
            .map(|s| {
                let text = if s.tier() == crate::label::LabelTier::Red {
                    Value::Null
                } else {
                    Value::String(s.text.clone())
                };
                json!({
                    "id": &s.segment_id,
                    "tier": s.tier().to_string(),
                    "label": s.label.name(),
                    "text": text,
                })
            })
            .collect();
        Self::json("processedSegments", &data)
    }

    pub fn template_selected(template: &StructureTemplate, metadata_overridden: bool) -> Self {
        let data = json!({
            "templateId": template.id,
            "templateName": template.name,
            "metadataOverridden": metadata_overridden,
        });
        Self::json("templateSelected", &data)
    }

    pub fn cushion_strategy(cushion: &CushionStrategy) -> Self {
        let data = json!({
            "overallTone": &cushion.overall_tone,
            "strategies": &cushion.strategies,
            "transitionNotes": &cushion.transition_notes,
        });
        Self::json("cushionStrategy", &data)
    }

    pub fn rag_results(rag: &RagResults) -> Self {
        let mut categories = serde_json::Map::new();
        for cat in crate::rag::RagCategory::ALL {
            let hits = rag.category(cat);
            if !hits.is_empty() {
                categories.insert(cat.name().to_string(), json!(hits.len()));
            }
        }
        let data = json!({
            "totalHits": rag.total_hits(),
            "categories": categories,
        });
        Self::json("ragResults", &data)
    }

    /// A raw token fragment from the final model.
    pub fn delta(fragment: &str) -> Self {
        Self::text("delta", fragment)
    }

    /// Variant-B token fragment (A/B mode).
    pub fn delta_b(fragment: &str) -> Self {
        Self::text("delta_b", fragment)
    }

    pub fn retry(reason: &str) -> Self {
        Self::text("retry", reason)
    }

    pub fn validation_issues(issues: &[ValidationIssue]) -> Self {
        Self::json("validationIssues", &issues_payload(issues))
    }

    pub fn stats(stats: &PipelineStats) -> Self {
        Self::json("stats", stats)
    }

    pub fn usage(usage: &UsageSummary) -> Self {
        Self::json("usage", usage)
    }

    pub fn done(final_text: &str) -> Self {
        Self::text("done", final_text)
    }

    pub fn error(message: &str) -> Self {
        Self::text("error", message)
    }

    // A/B parallel event names

    pub fn done_a(final_text: &str) -> Self {
        Self::text("done_a", final_text)
    }

    pub fn done_b(final_text: &str) -> Self {
        Self::text("done_b", final_text)
    }

    pub fn validation_a(issues: &[ValidationIssue]) -> Self {
        Self::json("validation_a", &issues_payload(issues))
    }

    pub fn validation_b(issues: &[ValidationIssue]) -> Self {
        Self::json("validation_b", &issues_payload(issues))
    }

    pub fn stats_a(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self::json(
            "stats_a",
            &json!({
                "finalPromptTokens": prompt_tokens,
                "finalCompletionTokens": completion_tokens,
            }),
        )
    }

    pub fn stats_b(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self::json(
            "stats_b",
            &json!({
                "finalPromptTokens": prompt_tokens,
                "finalCompletionTokens": completion_tokens,
            }),
        )
    }
}

fn issues_payload(issues: &[ValidationIssue]) -> Vec<Value> {
    issues
        .iter()
        .map(|i| {
            json!({
                "type": i.kind.name(),
                "severity": i.severity.name(),
                "message": &i.message,
                "matchedText": &i.matched_text,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::SegmentLabel;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delta_is_raw_text() {
        let event = PipelineEvent::delta("안녕");
        assert_eq!(event.name(), "delta");
        assert_eq!(event.data(), "안녕");
    }

    #[test]
    fn test_labels_payload_is_json() {
        let labeled = vec![LabeledSegment::new("T1", SegmentLabel::CoreFact, "사실", 0, 6)];
        let event = PipelineEvent::labels(&labeled);
        let parsed: Vec<Value> = serde_json::from_str(event.data()).unwrap();
        assert_eq!(parsed[0]["segmentId"], "T1");
        assert_eq!(parsed[0]["tier"], "GREEN");
    }

    #[test]
    fn test_processed_segments_red_text_null() {
        let labeled = vec![
            LabeledSegment::new("T1", SegmentLabel::CoreFact, "사실", 0, 6),
            LabeledSegment::new("T2", SegmentLabel::Aggression, "욕설", 7, 13),
        ];
        let event = PipelineEvent::processed_segments(&labeled);
        let parsed: Vec<Value> = serde_json::from_str(event.data()).unwrap();
        assert_eq!(parsed[0]["text"], "사실");
        assert!(parsed[1]["text"].is_null());
    }

    #[test]
    fn test_done_and_error_flags() {
        assert!(PipelineEvent::done("결과").is_done());
        assert!(PipelineEvent::error("오류").is_error());
        assert!(!PipelineEvent::phase("segmenting").is_done());
    }
}
