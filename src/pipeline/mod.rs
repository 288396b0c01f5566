//! The pipeline orchestrator, streaming events, validation, and stats.

pub mod events;
pub mod orchestrator;
mod proptest;
pub mod stats;
pub mod validator;

pub use events::PipelineEvent;
pub use orchestrator::{
    compute_thinking_budget, AnalysisPhase, EventSink, MetadataOptions, Orchestrator,
    PipelineEventStream, TransformRequest,
};
pub use stats::{MonthlyProjection, PipelineResult, PipelineStats, UsageSummary};
pub use validator::{
    build_locked_span_retry_hint, validate, validate_with_template, Severity, ValidationIssue,
    ValidationIssueKind, ValidationResult, RETRYABLE_WARNINGS,
};
