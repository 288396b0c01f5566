//! Final-model prompt assembly.

pub mod builder;

pub use builder::{
    build_dedupe_key, build_ordered_segments, build_system_prompt, build_user_message,
    extract_placeholders, OrderedSegment, PromptMetadata, AVOID_PHRASES,
};
