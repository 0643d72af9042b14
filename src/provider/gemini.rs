use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    StatusCode,
    header::{CONTENT_TYPE, HeaderValue},
};
use serde::{Deserialize, Serialize};

use crate::{
    dual_debug,
    provider::{CompletionProvider, ProviderError},
};

pub(crate) const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub(crate) const DEFAULT_MODEL: &str = "gemini-1.5-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(
        base_url: impl AsRef<str>,
        model: impl AsRef<str>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            model: model.as_ref().to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, ProviderError> {
        let api_key = HeaderValue::from_str(api_key)
            .map_err(|_| ProviderError::Authentication("API key is not a valid header value".to_string()))?;

        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
        };

        dual_debug!("Sending to Gemini API ({})", self.model);

        let response = self
            .http
            .post(self.endpoint())
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Overloaded(format!("Request timed out: {e}"))
                } else {
                    ProviderError::Unknown(format!("Failed to reach Gemini: {e}"))
                }
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Unknown(format!("Failed to read the response body: {e}")))?;

        if !status.is_success() {
            return Err(classify_failure(status, &String::from_utf8_lossy(&bytes)));
        }

        let parsed: GenerateContentResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Unknown(format!("Failed to parse the response: {e}")))?;

        parsed.into_text()
    }
}

/// Map a non-success HTTP answer from Gemini onto a [`ProviderError`].
pub(crate) fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| format!("{status}: {}", envelope.error.message))
        .unwrap_or_else(|_| format!("{status}: {}", body.trim()));

    if body.contains("API_KEY_INVALID") || body.contains("UNAUTHENTICATED") {
        return ProviderError::Authentication(detail);
    }
    if body.contains("PERMISSION_DENIED") {
        return ProviderError::Permission(detail);
    }
    if body.contains("RESOURCE_EXHAUSTED") {
        return ProviderError::QuotaExceeded(detail);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => ProviderError::Authentication(detail),
        StatusCode::FORBIDDEN => ProviderError::Permission(detail),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::QuotaExceeded(detail),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ProviderError::Overloaded(detail),
        _ if body.to_lowercase().contains("overloaded") => ProviderError::Overloaded(detail),
        _ => ProviderError::Unknown(detail),
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// Finish reasons for which Gemini withholds the candidate text
const BLOCKED_FINISH_REASONS: [&str; 4] = ["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

impl GenerateContentResponse {
    fn into_text(self) -> Result<String, ProviderError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProviderError::SafetyBlocked(format!(
                "Prompt was blocked: {reason}"
            )));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Unknown("Response contained no candidates".to_string()))?;

        if let Some(reason) = &candidate.finish_reason
            && BLOCKED_FINISH_REASONS.contains(&reason.as_str())
        {
            return Err(ProviderError::SafetyBlocked(format!(
                "Candidate was blocked: {reason}"
            )));
        }

        let text: String = candidate
            .content
            .unwrap_or_default()
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    use super::*;

    fn provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new(server.base_url(), DEFAULT_MODEL, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_generate_returns_candidate_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-1.5-flash:generateContent")
                    .header("x-goog-api-key", "test-key")
                    .json_body(json!({
                        "contents": [{"parts": [{"text": "Explain osmosis"}]}]
                    }));
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": {"parts": [{"text": "Osmosis is "}, {"text": "diffusion of water."}]},
                        "finishReason": "STOP"
                    }]
                }));
            })
            .await;

        let text = provider(&server)
            .generate("test-key", "Explain osmosis")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(text, "Osmosis is diffusion of water.");
    }

    #[tokio::test]
    async fn test_generate_maps_invalid_key() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(400).json_body(json!({
                    "error": {
                        "code": 400,
                        "message": "API key not valid. Please pass a valid API key.",
                        "status": "INVALID_ARGUMENT",
                        "details": [{"reason": "API_KEY_INVALID"}]
                    }
                }));
            })
            .await;

        let err = provider(&server).generate("bad", "hi").await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Authentication(
                "400 Bad Request: API key not valid. Please pass a valid API key.".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_generate_timeout_is_overload() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200)
                    .delay(Duration::from_secs(2))
                    .json_body(json!({"candidates": []}));
            })
            .await;

        let provider =
            GeminiProvider::new(server.base_url(), DEFAULT_MODEL, Duration::from_millis(200)).unwrap();
        let err = provider.generate("k", "hi").await.unwrap_err();

        assert!(matches!(err, ProviderError::Overloaded(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unusable_key_is_authentication_error() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200);
            })
            .await;

        let err = provider(&server).generate("bad\nkey", "hi").await.unwrap_err();

        assert!(matches!(err, ProviderError::Authentication(_)));
        mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_generate_reports_prompt_block() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({
                    "promptFeedback": {"blockReason": "SAFETY"}
                }));
            })
            .await;

        let err = provider(&server).generate("k", "hi").await.unwrap_err();
        assert!(matches!(err, ProviderError::SafetyBlocked(_)));
    }

    #[test]
    fn test_classify_by_status() {
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, "{}"),
            ProviderError::Permission(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::SERVICE_UNAVAILABLE, "The model is overloaded."),
            ProviderError::Overloaded(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, "models/foo is not found"),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, "malformed"),
            ProviderError::Unknown(_)
        ));
    }

    #[test]
    fn test_blocked_finish_reason() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();

        assert!(matches!(
            response.into_text(),
            Err(ProviderError::SafetyBlocked(_))
        ));
    }

    #[test]
    fn test_missing_candidates_is_unknown() {
        let response: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(response.into_text(), Err(ProviderError::Unknown(_))));
    }
}
