use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::{ContentBlock, LlmError, LlmResult, ModelProvider, ModelRequest, ModelResponse};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Thinking budgets at or above this force a streamed call; the provider
/// rejects long-running non-streaming requests.
const STREAMING_THINKING_BUDGET: u32 = 8192;

/// HTTP client for the Anthropic messages API.
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body(&self, request: &ModelRequest, stream: bool) -> Value {
        let system: Vec<Value> = request
            .system
            .iter()
            .map(|block| {
                let mut b = json!({ "type": "text", "text": block.text });
                if block.cache {
                    b["cache_control"] = json!({ "type": "ephemeral" });
                }
                b
            })
            .collect();

        let content: Vec<Value> = request
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text(text) => json!({ "type": "text", "text": text }),
                ContentBlock::Image { media_type, data } => json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": media_type,
                        "data": data,
                    },
                }),
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": content }],
        });

        if let Some(max_uses) = request.web_search_max_uses {
            body["tools"] = json!([{
                "type": "web_search_20250305",
                "name": "web_search",
                "max_uses": max_uses,
            }]);
        }

        if let Some(budget) = request.thinking_budget {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }

        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    /// Send with bounded retry on rate-limit and server errors.
    async fn send(
        &self,
        body: &Value,
        timeout: Duration,
    ) -> LlmResult<reqwest::Response> {
        let url = format!("{}/v1/messages", self.base_url);

        for attempt in 0..3u32 {
            let response = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .timeout(timeout)
                .json(body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        LlmError::Timeout(timeout.as_secs())
                    } else {
                        LlmError::Http(e.to_string())
                    }
                })?;

            let status = response.status().as_u16();
            if status == 429 || status >= 500 {
                let wait = Duration::from_secs(2u64.pow(attempt + 1));
                tracing::warn!(
                    "Model provider returned {}, retrying in {}s ({}/3)",
                    status,
                    wait.as_secs(),
                    attempt + 1
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !response.status().is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(LlmError::Api { status, message });
            }

            return Ok(response);
        }

        Err(LlmError::Api {
            status: 429,
            message: "rate limited after 3 retries".to_string(),
        })
    }

    async fn complete_buffered(&self, request: &ModelRequest) -> LlmResult<ModelResponse> {
        let body = self.build_body(request, false);
        let response = self.send(&body, request.timeout).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text: String = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect();

        Ok(ModelResponse {
            text,
            stop_reason: parsed.stop_reason,
        })
    }

    /// Streamed variant: accumulate `text_delta` events until the stream
    /// ends. Thinking deltas are discarded; only final text matters here.
    async fn complete_streamed(&self, request: &ModelRequest) -> LlmResult<ModelResponse> {
        let body = self.build_body(request, true);
        let response = self.send(&body, request.timeout).await?;

        let mut text = String::new();
        let mut stop_reason = None;
        let mut buffer = String::new();

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Http(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(event) = serde_json::from_str::<Value>(payload) else {
                    continue;
                };

                match event.get("type").and_then(Value::as_str) {
                    Some("content_block_delta") => {
                        if let Some(delta) = event.get("delta") {
                            if delta.get("type").and_then(Value::as_str) == Some("text_delta") {
                                if let Some(t) = delta.get("text").and_then(Value::as_str) {
                                    text.push_str(t);
                                }
                            }
                        }
                    }
                    Some("message_delta") => {
                        stop_reason = event
                            .pointer("/delta/stop_reason")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .or(stop_reason);
                    }
                    Some("error") => {
                        let message = event
                            .pointer("/error/message")
                            .and_then(Value::as_str)
                            .unwrap_or("stream error")
                            .to_string();
                        return Err(LlmError::Api { status: 500, message });
                    }
                    _ => {}
                }
            }
        }

        if text.is_empty() {
            return Err(LlmError::InvalidResponse(
                "stream produced no text".to_string(),
            ));
        }

        Ok(ModelResponse { text, stop_reason })
    }
}

#[async_trait::async_trait]
impl ModelProvider for AnthropicClient {
    async fn complete(&self, request: ModelRequest) -> LlmResult<ModelResponse> {
        let stream = request
            .thinking_budget
            .map(|b| b >= STREAMING_THINKING_BUDGET)
            .unwrap_or(false);

        if stream {
            self.complete_streamed(&request).await
        } else {
            self.complete_buffered(&request).await
        }
    }

    fn backend_name(&self) -> &'static str {
        "anthropic"
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Content block of a buffered response; non-text blocks (tool use,
/// thinking) deserialize with `text: None` and are skipped.
#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemBlock;

    fn client() -> AnthropicClient {
        AnthropicClient::new("key".into(), "model-id".into())
    }

    #[test]
    fn body_carries_cache_hint_and_images() {
        let request = ModelRequest::new(
            vec![SystemBlock::cached("static prefix"), SystemBlock::new("daily")],
            vec![ContentBlock::text("chart"), ContentBlock::png(b"img")],
        )
        .with_web_search(5);

        let body = client().build_body(&request, false);

        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert!(body["system"][1].get("cache_control").is_none());
        assert_eq!(body["messages"][0]["content"][1]["type"], "image");
        assert_eq!(body["tools"][0]["name"], "web_search");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn thinking_budget_sets_thinking_block() {
        let request = ModelRequest::new(vec![], vec![ContentBlock::text("x")])
            .with_thinking_budget(16_000);
        let body = client().build_body(&request, true);
        assert_eq!(body["thinking"]["budget_tokens"], 16_000);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn transient_classification() {
        assert!(LlmError::Timeout(30).is_transient());
        assert!(LlmError::Api { status: 529, message: String::new() }.is_transient());
        assert!(!LlmError::Api { status: 400, message: String::new() }.is_transient());
    }
}
