//! Completion client for OpenAI-compatible chat APIs.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rag_core::{
    ChatMessage, CompletionClient, CompletionRequest, CompletionResponse, FragmentStream,
    LlmConfig, RagError, Result, TokenUsage,
};

use crate::sse::sse_fragments;

/// Chat-completions client.
///
/// The underlying HTTP connection pool is shared by every call made through
/// one client.
pub struct OpenAiClient {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAiClient {
    /// Create a client from the completion section of the configuration.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        info!(
            "Initializing completion client: endpoint={}, model={}",
            config.endpoint, config.model
        );

        let mut headers = HeaderMap::new();
        match &config.api_key {
            Some(key) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| RagError::config(format!("Invalid API key format: {}", e)))?;
                headers.insert(AUTHORIZATION, value);
            }
            None => warn!("No API key configured for {}", config.endpoint),
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| RagError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
        })
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<Response> {
        let body = ChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream,
        };

        debug!(
            "Sending completion request: model={}, messages={}, stream={}",
            request.model,
            request.messages.len(),
            stream
        );

        let response = self
            .client
            .post(&self.url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        Ok(response)
    }
}

/// Map a transport failure to the provider taxonomy.
fn classify_transport(e: reqwest::Error) -> RagError {
    if e.is_timeout() {
        RagError::provider_timeout(format!("Completion timed out: {}", e))
    } else {
        RagError::provider_connectivity(format!("Completion request failed: {}", e))
    }
}

/// Map a non-success HTTP status to the provider taxonomy.
fn classify_status(status: StatusCode, body: &str) -> RagError {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.to_string());
    let message = format!("Completion API error ({}): {}", status, detail);

    match status {
        StatusCode::TOO_MANY_REQUESTS => RagError::provider_rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            RagError::provider_timeout(message)
        }
        s if s.is_client_error() => RagError::provider_invalid_request(message),
        _ => RagError::provider_connectivity(message),
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let response = self.send(request, false).await?;

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                classify_transport(e)
            } else {
                RagError::internal(format!("Malformed completion response: {}", e))
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            model: parsed.model,
            usage: parsed.usage,
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<FragmentStream> {
        let response = self.send(request, true).await?;
        let body = Box::pin(response.bytes_stream().map_err(classify_transport));
        Ok(sse_fragments(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::StreamExt;

    async fn spawn_provider(app: Router) -> LlmConfig {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        LlmConfig {
            endpoint: format!("http://{}/v1", addr),
            api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        }
    }

    fn request(timeout: Duration) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::user("Say hi")],
            timeout,
            stream: false,
        }
    }

    #[tokio::test]
    async fn test_complete_parses_usage() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["messages"][0]["role"], "user");
                assert_eq!(body["stream"], false);
                Json(serde_json::json!({
                    "model": "gpt-4o-mini-2024-07-18",
                    "choices": [{"message": {"role": "assistant", "content": "Hi!"}}],
                    "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}
                }))
            }),
        );
        let client = OpenAiClient::new(&spawn_provider(app).await).unwrap();

        let response = client.complete(&request(Duration::from_secs(5))).await.unwrap();
        assert_eq!(response.content, "Hi!");
        assert_eq!(response.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(response.usage.unwrap().prompt_tokens, Some(9));
    }

    #[tokio::test]
    async fn test_missing_usage_is_none() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                Json(serde_json::json!({
                    "model": "m",
                    "choices": [{"message": {"content": "ok"}}]
                }))
            }),
        );
        let client = OpenAiClient::new(&spawn_provider(app).await).unwrap();

        let response = client.complete(&request(Duration::from_secs(5))).await.unwrap();
        assert!(response.usage.is_none());
    }

    #[tokio::test]
    async fn test_bad_request_is_invalid_request() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    AxumStatus::BAD_REQUEST,
                    Json(serde_json::json!({"error": {"message": "messages too long"}})),
                )
            }),
        );
        let client = OpenAiClient::new(&spawn_provider(app).await).unwrap();

        let err = client.complete(&request(Duration::from_secs(5))).await.unwrap_err();
        assert_eq!(err.error_code(), "PROVIDER_INVALID_REQUEST");
        assert!(err.to_string().contains("messages too long"));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(serde_json::json!({"model": "m", "choices": []}))
            }),
        );
        let client = OpenAiClient::new(&spawn_provider(app).await).unwrap();

        let err = client
            .complete(&request(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PROVIDER_TIMEOUT");
    }

    #[tokio::test]
    async fn test_stream_yields_fragments() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                let body = [
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                    "data: [DONE]\n\n",
                ]
                .concat();
                ([("content-type", "text/event-stream")], body).into_response()
            }),
        );
        let client = OpenAiClient::new(&spawn_provider(app).await).unwrap();

        let stream = client
            .complete_stream(&request(Duration::from_secs(5)))
            .await
            .unwrap();
        let text: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(text.concat(), "Hello");
    }

    #[tokio::test]
    async fn test_stream_rate_limit_before_first_fragment() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { AxumStatus::TOO_MANY_REQUESTS }),
        );
        let client = OpenAiClient::new(&spawn_provider(app).await).unwrap();

        let result = client.complete_stream(&request(Duration::from_secs(5))).await;
        assert_eq!(result.err().unwrap().error_code(), "PROVIDER_RATE_LIMITED");
    }
}
