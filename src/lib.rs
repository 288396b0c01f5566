//! # politely
//!
//! A Korean-language tone-transformation pipeline: rewrites informal, blunt,
//! or emotionally charged Korean messages into situation-appropriate, polite
//! business prose.
//!
//! ## Core Components
//!
//! - **Preprocess**: normalization, locked-span extraction, placeholder
//!   masking (entities that must survive verbatim)
//! - **Segment**: a precision-first 7-stage rule-based splitter with optional
//!   LLM refinement of long units
//! - **Label**: three-tier 14-label classification (GREEN preserve / YELLOW
//!   rewrite / RED delete) with a deterministic RED enforcer and all-GREEN
//!   recovery
//! - **Analyze**: parallel situation analysis (grounded facts + intent) and
//!   per-YELLOW cushion strategies
//! - **Template**: 12 section-ordered output templates with S2 enforcement
//! - **Pipeline**: the orchestrator (batch, streaming, A/B), the 14-rule
//!   output validator, and per-request stats
//! - **Llm**: the provider abstraction with model-name routing
//! - **Rag**: optional in-memory vector retrieval with metadata pre-filtering
//!   and MMR dedup
//!
//! ## Example
//!
//! ```rust,ignore
//! use politely::{Orchestrator, TransformRequest};
//!
//! let orchestrator = Orchestrator::new();
//! let request = TransformRequest {
//!     original_text: "내일까지 user@example.com 으로 보고서 보내주세요".into(),
//!     ..Default::default()
//! };
//! let result = orchestrator.execute(&request).await?;
//! println!("{}", result.transformed_text);
//! ```

pub mod analyze;
pub mod config;
pub mod error;
pub mod label;
pub mod llm;
pub mod pipeline;
pub mod preprocess;
pub mod prompt;
pub mod rag;
pub mod redaction;
pub mod segment;
#[cfg(feature = "server")]
pub mod server;
pub mod template;
pub mod types;

// Re-exports for convenience
pub use analyze::{
    analyze, analyze_text_only, filter_red_facts, AnalysisMetadata, CushionStrategy, Fact,
    MetadataCheck, SituationAnalysisResult,
};
pub use config::{settings, Settings};
pub use error::{Error, Result};
pub use label::{
    enforce, label, label_text_only, scan_yellow_triggers, LabelMetadata, LabelStats, LabelTier,
    LabeledSegment, SegmentLabel, StructureLabelResult, YellowUpgrade,
};
pub use llm::{
    GeminiClient, LlmCallResult, LlmChunk, LlmProvider, LlmRequest, LlmRouter, LlmStream,
    MockProvider, OpenAiClient, TokenUsage,
};
pub use pipeline::{
    compute_thinking_budget, validate, validate_with_template, MetadataOptions, Orchestrator,
    PipelineEvent, PipelineEventStream, PipelineResult, PipelineStats, Severity, TransformRequest,
    UsageSummary, ValidationIssue, ValidationIssueKind, ValidationResult,
};
pub use preprocess::{extract, mask, normalize, unmask, LockedSpan, LockedSpanKind, UnmaskResult};
pub use prompt::{build_dedupe_key, build_ordered_segments, OrderedSegment, PromptMetadata};
pub use rag::{RagCategory, RagEntry, RagIndex, RagQueryFilters, RagResults, RagSearchHit, RagStore};
pub use redaction::RedactionResult;
pub use segment::{refine, segment, segment_with, RefineResult, SegmenterConfig};
pub use template::{
    select_template, StructureSection, StructureTemplate, TemplateRegistry,
    TemplateSelectionResult,
};
pub use types::{Persona, Purpose, Segment, SituationContext, ToneLevel, Topic};
