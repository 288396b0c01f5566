//! Situation analysis and cushion strategy.

pub mod cushion;
pub mod situation;

pub use cushion::{generate as generate_cushion, CushionStrategy, SegmentStrategy};
pub use situation::{
    analyze, analyze_text_only, filter_red_facts, AnalysisMetadata, Fact, MetadataCheck,
    SituationAnalysisResult, OVERRIDE_CONFIDENCE_THRESHOLD,
};
