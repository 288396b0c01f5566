//! LLM provider trait and provider implementations.
//!
//! Providers are written against the raw wire with reqwest; upper layers only
//! ever see [`crate::error::Error::AiTransform`] with user-safe Korean
//! messages, never raw HTTP faults.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::settings;
use crate::error::{Error, Result};

use super::metrics;
use super::types::{LlmCallResult, LlmChunk, LlmRequest, TokenUsage};

/// Ordered stream of response fragments.
pub type LlmStream = BoxStream<'static, Result<LlmChunk>>;

/// One LLM provider (Gemini, OpenAI, or a test double).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete a request and return the full response.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCallResult>;

    /// Stream a request as ordered text fragments.
    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

fn build_http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_default()
}

/// Classify a transport-level reqwest error into a user-safe Korean message.
fn classify_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "AI 서비스 응답 시간 초과: 잠시 후 다시 시도해주세요.".to_string()
    } else if e.is_connect() {
        "AI 서비스 연결 실패: 네트워크 상태를 확인해주세요.".to_string()
    } else {
        "AI 변환 서비스에 일시적인 오류가 발생했습니다. 잠시 후 다시 시도해주세요.".to_string()
    }
}

/// Classify a non-success HTTP status into a user-safe Korean message.
fn classify_status_error(status: reqwest::StatusCode, body: &str) -> String {
    match status.as_u16() {
        401 | 403 => "AI 서비스 인증 오류: API 키가 유효하지 않습니다. 서버 설정을 확인해주세요.".to_string(),
        429 => "AI 서비스 요청 한도 초과: 잠시 후 다시 시도해주세요.".to_string(),
        408 | 504 => "AI 서비스 응답 시간 초과: 잠시 후 다시 시도해주세요.".to_string(),
        _ => {
            if body.to_lowercase().contains("quota") || body.contains("rate limit") {
                "AI 서비스 요청 한도 초과: 잠시 후 다시 시도해주세요.".to_string()
            } else {
                "AI 변환 서비스에 일시적인 오류가 발생했습니다. 잠시 후 다시 시도해주세요.".to_string()
            }
        }
    }
}

/// Turn a byte stream of an SSE/line-delimited response into complete lines.
///
/// Yields each `\n`-terminated line with the terminator stripped; a trailing
/// unterminated fragment is flushed at end of stream.
fn line_stream(
    response: reqwest::Response,
) -> impl futures::Stream<Item = Result<String>> + Send + 'static {
    struct State {
        inner: BoxStream<'static, reqwest::Result<Vec<u8>>>,
        buffer: String,
        pending: VecDeque<String>,
        done: bool,
    }

    let state = State {
        inner: response
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()))
            .boxed(),
        buffer: String::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.pending.pop_front() {
                return Some((Ok(line), st));
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = st.buffer.find('\n') {
                        let line = st.buffer[..pos].trim_end_matches('\r').to_string();
                        st.buffer.drain(..=pos);
                        st.pending.push_back(line);
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(Error::ai_transform(classify_transport_error(&e))), st));
                }
                None => {
                    st.done = true;
                    if !st.buffer.is_empty() {
                        let line = std::mem::take(&mut st.buffer);
                        st.pending.push_back(line);
                    }
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// Google Gemini client (generateContent / streamGenerateContent).
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// Gemini API types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<GeminiThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u64>,
    #[serde(default)]
    candidates_token_count: Option<u64>,
}

impl GeminiClient {
    pub fn new() -> Result<Self> {
        let key = settings().require_gemini_key().map_err(|_| {
            Error::ai_transform("Gemini API 키가 설정되지 않았습니다. 서버 설정을 확인해주세요.")
        })?;
        Ok(Self {
            http: build_http_client(120),
            api_key: key.to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    /// Test constructor with an explicit endpoint and key.
    pub fn with_endpoint(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: build_http_client(120),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn build_body(&self, request: &LlmRequest) -> GeminiRequest {
        let temperature = request
            .temperature
            .unwrap_or(settings().openai_temperature);
        let max_tokens = request.max_tokens.unwrap_or(settings().openai_max_tokens);

        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(request.user.clone()),
                }],
            }],
            system_instruction: (!request.system.is_empty()).then(|| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(request.system.clone()),
                }],
            }),
            generation_config: GeminiGenerationConfig {
                temperature,
                max_output_tokens: max_tokens,
                thinking_config: request
                    .thinking_budget
                    .map(|b| GeminiThinkingConfig { thinking_budget: b }),
            },
        }
    }

    fn response_text(response: &GeminiResponse) -> String {
        response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for GeminiClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCallResult> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );
        let body = self.build_body(request);

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Gemini API call failed [{}]: {}", request.model, e);
                Error::ai_transform(classify_transport_error(&e))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::ai_transform(classify_transport_error(&e)))?;

        if !status.is_success() {
            tracing::error!("Gemini API error [{}] ({}): {}", request.model, status, text);
            return Err(Error::ai_transform(classify_status_error(status, &text)));
        }

        let parsed: GeminiResponse = serde_json::from_str(&text)
            .map_err(|_| Error::ai_transform("Gemini 응답에 내용이 없습니다."))?;

        let content = Self::response_text(&parsed);
        if content.is_empty() {
            return Err(Error::ai_transform("Gemini 응답에 내용이 없습니다."));
        }

        let (prompt_tokens, completion_tokens) = parsed
            .usage_metadata
            .map(|u| {
                (
                    u.prompt_token_count.unwrap_or(0),
                    u.candidates_token_count.unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));

        tracing::info!(
            "Token usage [{}] - prompt: {}, completion: {}, total: {}",
            request.model,
            prompt_tokens,
            completion_tokens,
            prompt_tokens + completion_tokens
        );

        Ok(LlmCallResult::new(
            content.trim(),
            prompt_tokens,
            completion_tokens,
        ))
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, request.model, self.api_key
        );
        let body = self.build_body(request);

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ai_transform(classify_transport_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("Gemini stream error [{}] ({}): {}", request.model, status, text);
            return Err(Error::ai_transform(classify_status_error(status, &text)));
        }

        let stream = line_stream(response).filter_map(|line| async move {
            let line = match line {
                Ok(l) => l,
                Err(e) => return Some(Err(e)),
            };
            let payload = line.strip_prefix("data:").map(str::trim)?;
            if payload.is_empty() {
                return None;
            }
            let parsed: GeminiResponse = serde_json::from_str(payload).ok()?;
            let text = GeminiClient::response_text(&parsed);
            let usage = parsed.usage_metadata.map(|u| {
                TokenUsage::new(
                    u.prompt_token_count.unwrap_or(0),
                    u.candidates_token_count.unwrap_or(0),
                )
            });
            if text.is_empty() && usage.is_none() {
                return None;
            }
            Some(Ok(LlmChunk { text, usage }))
        });

        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

/// OpenAI chat-completions client.
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

const OPENAI_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f64,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Debug, Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: Option<OpenAiMessage>,
    #[serde(default)]
    delta: Option<OpenAiDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<OpenAiPromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct OpenAiPromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

impl OpenAiClient {
    pub fn new() -> Result<Self> {
        let key = settings().require_openai_key().map_err(|_| {
            Error::ai_transform("OpenAI API 키가 설정되지 않았습니다. 서버 설정을 확인해주세요.")
        })?;
        Ok(Self {
            http: build_http_client(120),
            api_key: key.to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
        })
    }

    /// Test constructor with an explicit endpoint and key.
    pub fn with_endpoint(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: build_http_client(120),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn build_body(&self, request: &LlmRequest, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: vec![
                OpenAiMessage {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                OpenAiMessage {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            temperature: request
                .temperature
                .unwrap_or(settings().openai_temperature),
            max_completion_tokens: request.max_tokens.unwrap_or(settings().openai_max_tokens),
            stream,
            stream_options: stream.then_some(OpenAiStreamOptions {
                include_usage: true,
            }),
        }
    }

    /// Embed texts with the configured embedding model (1536-dim vectors).
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }
        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }
        #[derive(Deserialize)]
        struct EmbeddingData {
            index: usize,
            embedding: Vec<f32>,
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmbeddingRequest {
                model: &settings().rag_embedding_model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| Error::ai_transform(classify_transport_error(&e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::ai_transform(classify_transport_error(&e)))?;
        if !status.is_success() {
            tracing::error!("OpenAI embeddings error ({}): {}", status, body);
            return Err(Error::ai_transform(classify_status_error(status, &body)));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|_| Error::ai_transform("임베딩 응답을 해석할 수 없습니다."))?;
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::ai_transform("임베딩 응답을 해석할 수 없습니다."))
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCallResult> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_body(request, false);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("OpenAI API call failed [{}]: {}", request.model, e);
                Error::ai_transform(classify_transport_error(&e))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::ai_transform(classify_transport_error(&e)))?;

        if !status.is_success() {
            tracing::error!("OpenAI API error [{}] ({}): {}", request.model, status, text);
            return Err(Error::ai_transform(classify_status_error(status, &text)));
        }

        let parsed: OpenAiResponse = serde_json::from_str(&text)
            .map_err(|_| Error::ai_transform("OpenAI 응답에 내용이 없습니다."))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(Error::ai_transform("OpenAI 응답에 내용이 없습니다."));
        }

        let mut prompt_tokens = 0;
        let mut completion_tokens = 0;
        if let Some(usage) = &parsed.usage {
            prompt_tokens = usage.prompt_tokens;
            completion_tokens = usage.completion_tokens;
            tracing::info!(
                "Token usage [{}] - prompt: {}, completion: {}, total: {}",
                request.model,
                prompt_tokens,
                completion_tokens,
                prompt_tokens + completion_tokens
            );
            let cached = usage
                .prompt_tokens_details
                .as_ref()
                .and_then(|d| d.cached_tokens)
                .unwrap_or(0);
            metrics::record_usage(prompt_tokens, cached);
        }

        Ok(LlmCallResult::new(
            content.trim(),
            prompt_tokens,
            completion_tokens,
        ))
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_body(request, true);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ai_transform(classify_transport_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("OpenAI stream error [{}] ({}): {}", request.model, status, text);
            return Err(Error::ai_transform(classify_status_error(status, &text)));
        }

        let stream = line_stream(response).filter_map(|line| async move {
            let line = match line {
                Ok(l) => l,
                Err(e) => return Some(Err(e)),
            };
            let payload = line.strip_prefix("data:").map(str::trim)?;
            if payload.is_empty() || payload == "[DONE]" {
                return None;
            }
            let parsed: OpenAiResponse = serde_json::from_str(payload).ok()?;

            let text = parsed
                .choices
                .iter()
                .filter_map(|c| c.delta.as_ref().and_then(|d| d.content.as_deref()))
                .collect::<String>();
            let usage = parsed.usage.as_ref().map(|u| {
                let cached = u
                    .prompt_tokens_details
                    .as_ref()
                    .and_then(|d| d.cached_tokens)
                    .unwrap_or(0);
                metrics::record_usage(u.prompt_tokens, cached);
                TokenUsage::new(u.prompt_tokens, u.completion_tokens)
            });
            if text.is_empty() && usage.is_none() {
                return None;
            }
            Some(Ok(LlmChunk { text, usage }))
        });

        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

/// Scripted provider for tests: returns queued responses in order and records
/// every request it served.
#[derive(Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn push_response(&self, content: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(content.into()));
    }

    /// Queue a failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(Error::ai_transform(message)));
    }

    /// Requests served so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &LlmRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::ai_transform_generic()))
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCallResult> {
        let content = self.next(request)?;
        let completion_tokens = content.chars().count() as u64;
        Ok(LlmCallResult::new(content, 10, completion_tokens))
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let content = self.next(request)?;
        let completion_tokens = content.chars().count() as u64;

        // Split the scripted response into a few fragments to exercise
        // delta ordering in consumers.
        let chars: Vec<char> = content.chars().collect();
        let mut chunks: Vec<Result<LlmChunk>> = chars
            .chunks(8.max(chars.len() / 4).max(1))
            .map(|c| {
                Ok(LlmChunk {
                    text: c.iter().collect(),
                    usage: None,
                })
            })
            .collect();
        chunks.push(Ok(LlmChunk {
            text: String::new(),
            usage: Some(TokenUsage::new(10, completion_tokens)),
        }));

        Ok(futures::stream::iter(chunks).boxed())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_scripted_responses() {
        let mock = MockProvider::new();
        mock.push_response("first");
        mock.push_response("second");

        let req = LlmRequest::new("gpt-4o-mini", "s", "u");
        let a = mock.complete(&req).await.unwrap();
        let b = mock.complete(&req).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_provider_exhausted_queue_errors() {
        let mock = MockProvider::new();
        let req = LlmRequest::new("gpt-4o-mini", "s", "u");
        assert!(mock.complete(&req).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_stream_preserves_order() {
        let mock = MockProvider::new();
        mock.push_response("안녕하세요 반갑습니다 오늘도 좋은 하루 되세요");

        let req = LlmRequest::new("gemini-2.5-flash", "s", "u");
        let mut stream = mock.stream(&req).await.unwrap();
        let mut collected = String::new();
        let mut saw_usage = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            collected.push_str(&chunk.text);
            saw_usage |= chunk.usage.is_some();
        }
        assert_eq!(collected, "안녕하세요 반갑습니다 오늘도 좋은 하루 되세요");
        assert!(saw_usage);
    }
}
