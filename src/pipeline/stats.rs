//! Per-request pipeline statistics and the batch result type.

use serde::{Deserialize, Serialize};

use super::validator::ValidationIssue;

/// Token counters, tier counts, and stage flags for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub analysis_prompt_tokens: u64,
    pub analysis_completion_tokens: u64,
    pub final_prompt_tokens: u64,
    pub final_completion_tokens: u64,
    pub segment_count: usize,
    pub green_count: usize,
    pub yellow_count: usize,
    pub red_count: usize,
    pub locked_span_count: usize,
    pub retry_count: u32,
    pub identity_booster_fired: bool,
    pub situation_analysis_fired: bool,
    pub metadata_overridden: bool,
    pub chosen_template_id: String,
    pub latency_ms: u64,
    pub yellow_recovery_applied: bool,
    pub yellow_upgrade_count: usize,
    pub cushion_applied: bool,
}

/// Cost estimate and monthly projections sent on the `usage` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub analysis_prompt_tokens: u64,
    pub analysis_completion_tokens: u64,
    pub final_prompt_tokens: u64,
    pub final_completion_tokens: u64,
    pub total_cost_usd: f64,
    pub monthly: MonthlyProjection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyProjection {
    pub mvp: f64,
    pub growth: f64,
    pub mature: f64,
}

impl UsageSummary {
    /// gpt-4o-mini pricing as the cost yardstick: $0.15/M in, $0.60/M out.
    pub fn compute(
        analysis_prompt: u64,
        analysis_completion: u64,
        final_prompt: u64,
        final_completion: u64,
    ) -> Self {
        let analysis_cost =
            (analysis_prompt as f64 * 0.15 + analysis_completion as f64 * 0.60) / 1_000_000.0;
        let final_cost =
            (final_prompt as f64 * 0.15 + final_completion as f64 * 0.60) / 1_000_000.0;
        let total = analysis_cost + final_cost;

        Self {
            analysis_prompt_tokens: analysis_prompt,
            analysis_completion_tokens: analysis_completion,
            final_prompt_tokens: final_prompt,
            final_completion_tokens: final_completion,
            total_cost_usd: total,
            monthly: MonthlyProjection {
                mvp: total * 1500.0,
                growth: total * 6000.0,
                mature: total * 20000.0,
            },
        }
    }
}

/// Batch-mode pipeline outcome.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub transformed_text: String,
    pub validation_issues: Vec<ValidationIssue>,
    pub stats: PipelineStats,
}
