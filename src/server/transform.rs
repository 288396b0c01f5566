//! Transform endpoint handlers.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::config::settings;
use crate::error::{Error, Result};
use crate::pipeline::{PipelineEventStream, TransformRequest};

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequestBody {
    pub original_text: String,
    #[serde(default)]
    pub sender_info: Option<String>,
    #[serde(default)]
    pub user_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResponse {
    pub transformed_text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierInfoResponse {
    pub tier: &'static str,
    pub max_text_length: usize,
    pub prompt_enabled: bool,
}

fn validate_body(body: &TransformRequestBody) -> Result<TransformRequest> {
    let max_length = settings().tier_paid_max_text_length;
    let text_len = body.original_text.chars().count();
    if text_len == 0 {
        return Err(Error::validation("변환할 텍스트를 입력해주세요."));
    }
    if text_len > max_length {
        return Err(Error::validation(format!(
            "최대 {}자까지 입력할 수 있습니다.",
            max_length
        )));
    }
    if body
        .sender_info
        .as_deref()
        .is_some_and(|s| s.chars().count() > 100)
    {
        return Err(Error::validation("보내는 사람 정보는 100자 이하여야 합니다."));
    }
    if body
        .user_prompt
        .as_deref()
        .is_some_and(|s| s.chars().count() > 500)
    {
        return Err(Error::validation("참고 맥락은 500자 이하여야 합니다."));
    }

    Ok(TransformRequest {
        original_text: body.original_text.clone(),
        sender_info: body.sender_info.clone(),
        user_prompt: body.user_prompt.clone(),
    })
}

/// `POST /api/v1/transform` - batch transform.
pub async fn transform(
    State(state): State<AppState>,
    Json(body): Json<TransformRequestBody>,
) -> Result<Json<TransformResponse>> {
    let request = validate_body(&body)?;
    let result = state.orchestrator.execute(&request).await?;
    Ok(Json(TransformResponse {
        transformed_text: result.transformed_text,
    }))
}

/// `POST /api/v1/transform/stream` - SSE streaming transform.
pub async fn stream_transform(
    State(state): State<AppState>,
    Json(body): Json<TransformRequestBody>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let request = validate_body(&body)?;
    let events = state.orchestrator.stream(request);
    Ok(Sse::new(sse_stream(events)).keep_alive(KeepAlive::default()))
}

/// `POST /api/v1/transform/stream-ab` - SSE A/B comparison.
pub async fn stream_transform_ab(
    State(state): State<AppState>,
    Json(body): Json<TransformRequestBody>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let request = validate_body(&body)?;
    let events = state.orchestrator.stream_ab(request);
    Ok(Sse::new(sse_stream(events)).keep_alive(KeepAlive::default()))
}

/// `GET /api/v1/transform/tier` - tier info.
pub async fn tier_info() -> Json<TierInfoResponse> {
    Json(TierInfoResponse {
        tier: "PAID",
        max_text_length: settings().tier_paid_max_text_length,
        prompt_enabled: true,
    })
}

/// Frame pipeline events as `event: <name>\ndata: <payload>\n\n`. The stream
/// ends after the producer's sentinel; `next()` then joins the producer task,
/// so a fully-drained response leaves no work behind.
fn sse_stream(
    events: PipelineEventStream,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    futures::stream::unfold(events, |mut events| async move {
        let event = events.next().await?;
        let sse_event = Event::default().event(event.name()).data(event.data());
        Some((Ok(sse_event), events))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn body(text: &str) -> TransformRequestBody {
        TransformRequestBody {
            original_text: text.to_string(),
            sender_info: None,
            user_prompt: None,
        }
    }

    #[test]
    fn test_validate_body_length_caps() {
        assert!(validate_body(&body("정상 입력입니다")).is_ok());
        assert!(validate_body(&body("")).is_err());

        let over = "가".repeat(settings().tier_paid_max_text_length + 1);
        let err = validate_body(&body(&over)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_validate_optional_field_caps() {
        let mut b = body("정상 입력");
        b.sender_info = Some("가".repeat(101));
        assert!(validate_body(&b).is_err());

        let mut b = body("정상 입력");
        b.user_prompt = Some("가".repeat(501));
        assert!(validate_body(&b).is_err());
    }

    #[test]
    fn test_request_body_accepts_camel_case() {
        let parsed: TransformRequestBody = serde_json::from_str(
            r#"{"originalText": "안녕하세요", "senderInfo": "김민수", "userPrompt": null}"#,
        )
        .unwrap();
        assert_eq!(parsed.original_text, "안녕하세요");
        assert_eq!(parsed.sender_info.as_deref(), Some("김민수"));
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let json = serde_json::to_string(&TransformResponse {
            transformed_text: "결과".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"transformedText\""));
    }
}
