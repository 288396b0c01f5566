//! Model-name-based LLM call routing.
//!
//! `gemini-*` models go to the Gemini provider, everything else to OpenAI.
//! Providers are constructed lazily so that offline stages never require
//! credentials.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::Result;

use super::client::{GeminiClient, LlmProvider, LlmStream, OpenAiClient};
use super::types::{LlmCallResult, LlmRequest};

/// Routes each request to the provider selected by its model-name prefix.
pub struct LlmRouter {
    gemini: OnceCell<Arc<dyn LlmProvider>>,
    openai: OnceCell<Arc<dyn LlmProvider>>,
}

impl LlmRouter {
    /// Router backed by the real providers (lazily initialized).
    pub fn new() -> Self {
        Self {
            gemini: OnceCell::new(),
            openai: OnceCell::new(),
        }
    }

    /// Router with explicit providers (tests use [`super::MockProvider`]).
    pub fn with_providers(
        gemini: Arc<dyn LlmProvider>,
        openai: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            gemini: OnceCell::new_with(Some(gemini)),
            openai: OnceCell::new_with(Some(openai)),
        }
    }

    /// Router sending every model to one provider (tests).
    pub fn single(provider: Arc<dyn LlmProvider>) -> Self {
        Self::with_providers(provider.clone(), provider)
    }

    async fn provider_for(&self, model: &str) -> Result<&Arc<dyn LlmProvider>> {
        if model.starts_with("gemini-") {
            self.gemini
                .get_or_try_init(|| async {
                    GeminiClient::new().map(|c| Arc::new(c) as Arc<dyn LlmProvider>)
                })
                .await
        } else {
            self.openai
                .get_or_try_init(|| async {
                    OpenAiClient::new().map(|c| Arc::new(c) as Arc<dyn LlmProvider>)
                })
                .await
        }
    }

    /// Complete a request on the provider selected by the model prefix.
    pub async fn complete(&self, request: &LlmRequest) -> Result<LlmCallResult> {
        let provider = self.provider_for(&request.model).await?;
        tracing::debug!("Routing {} to {}", request.model, provider.name());
        provider.complete(request).await
    }

    /// Stream a request on the provider selected by the model prefix.
    pub async fn stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let provider = self.provider_for(&request.model).await?;
        tracing::debug!("Routing {} stream to {}", request.model, provider.name());
        provider.stream(request).await
    }
}

impl Default for LlmRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::MockProvider;

    #[tokio::test]
    async fn test_prefix_routing() {
        let gemini = Arc::new(MockProvider::new());
        let openai = Arc::new(MockProvider::new());
        gemini.push_response("from gemini");
        openai.push_response("from openai");

        let router = LlmRouter::with_providers(gemini.clone(), openai.clone());

        let g = router
            .complete(&LlmRequest::new("gemini-2.5-flash-lite", "s", "u"))
            .await
            .unwrap();
        assert_eq!(g.content, "from gemini");

        let o = router
            .complete(&LlmRequest::new("gpt-4o-mini", "s", "u"))
            .await
            .unwrap();
        assert_eq!(o.content, "from openai");

        assert_eq!(gemini.requests().len(), 1);
        assert_eq!(openai.requests().len(), 1);
    }
}
