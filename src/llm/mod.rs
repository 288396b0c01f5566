//! LLM provider abstraction with model-name routing.
//!
//! One abstract operation serves the whole pipeline:
//! `router.complete(LlmRequest { model, system, user, .. })`. The model-name
//! prefix picks the provider (`gemini-*` → Gemini, everything else → OpenAI);
//! each provider classifies HTTP faults into user-safe Korean messages, so
//! upper layers never see raw transport errors.

mod client;
pub mod metrics;
mod router;
mod types;

pub use client::{GeminiClient, LlmProvider, LlmStream, MockProvider, OpenAiClient};
pub use router::LlmRouter;
pub use types::{LlmCallResult, LlmChunk, LlmRequest, TokenUsage};
