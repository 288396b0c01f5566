//! LLM request/response types shared by all providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single provider call: one system prompt, one user message.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier; its prefix selects the provider.
    pub model: String,
    /// System prompt / system instruction.
    pub system: String,
    /// User message.
    pub user: String,
    /// Sampling temperature. `None` uses the configured default.
    pub temperature: Option<f64>,
    /// Output token cap. `None` uses the configured default.
    pub max_tokens: Option<u32>,
    /// Thinking budget hint for reasoning-capable models (Gemini only).
    pub thinking_budget: Option<u32>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            user: user.into(),
            temperature: None,
            max_tokens: None,
            thinking_budget: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_thinking_budget(mut self, budget: Option<u32>) -> Self {
        self.thinking_budget = budget;
        self
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Completed (non-streaming) provider response.
#[derive(Debug, Clone)]
pub struct LlmCallResult {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// When the response arrived.
    pub timestamp: DateTime<Utc>,
}

impl LlmCallResult {
    pub fn new(content: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            content: content.into(),
            prompt_tokens,
            completion_tokens,
            timestamp: Utc::now(),
        }
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, self.completion_tokens)
    }
}

/// One fragment of a streamed response. Usage arrives on whichever chunk the
/// provider attaches it to (typically the last).
#[derive(Debug, Clone)]
pub struct LlmChunk {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = LlmRequest::new("gemini-2.5-flash", "system", "user")
            .with_temperature(0.2)
            .with_max_tokens(800)
            .with_thinking_budget(Some(512));
        assert_eq!(req.model, "gemini-2.5-flash");
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(800));
        assert_eq!(req.thinking_budget, Some(512));
    }

    #[test]
    fn test_token_usage_total() {
        assert_eq!(TokenUsage::new(100, 50).total(), 150);
    }
}
