//! HTTP transport for OpenAI-compatible chat completion endpoints.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::retry::{RetryConfig, retry_transport};
use super::transport::{ModelReply, ModelRequest, ModelTransport, TransportFuture};
use crate::{EngineError, Message, ToolCall, ToolDef, UsageInfo};

/// Default chat completions endpoint (OpenRouter).
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Body of a chat completion request.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

impl ChatRequest {
    fn from_model_request(req: &ModelRequest<'_>) -> Self {
        Self {
            model: req.model.to_string(),
            messages: req.messages.to_vec(),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            tools: if req.tools.is_empty() {
                None
            } else {
                Some(req.tools.to_vec())
            },
        }
    }
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Chat completion client. Implements [`ModelTransport`] with retries.
pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    title: String,
    retry: RetryConfig,
}

impl ChatClient {
    /// Create a client for the default endpoint.
    pub fn new(api_key: impl Into<String>) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("keel-rs/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| EngineError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            title: "keel".to_string(),
            retry: RetryConfig::default(),
        })
    }

    /// Point the client at another OpenAI-compatible base URL.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    /// Send one chat completion request without retries.
    pub async fn chat(&self, body: &ChatRequest) -> crate::Result<ModelReply> {
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}, temp={}",
            body.model,
            body.messages.len(),
            body.tools.as_ref().map_or(0, |t| t.len()),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| EngineError::Transport(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(EngineError::Transport(format!("API HTTP {status}: {text}")));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| EngineError::Transport(format!("failed to parse response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(EngineError::Transport(format!("API error: {}", err.message)));
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        Ok(match choice {
            Some(c) => ModelReply {
                text: c.message.content,
                tool_calls: c.message.tool_calls.unwrap_or_default(),
                usage: parsed.usage,
            },
            None => {
                debug!("LLM output: empty (no choices)");
                ModelReply {
                    usage: parsed.usage,
                    ..Default::default()
                }
            }
        })
    }
}

impl ModelTransport for ChatClient {
    fn complete<'a>(&'a self, request: ModelRequest<'a>) -> TransportFuture<'a> {
        let body = ChatRequest::from_model_request(&request);
        Box::pin(async move { retry_transport(&self.retry, || self.chat(&body)).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_skips_empty_fields() {
        let msgs = [Message::user("hi")];
        let req = ChatRequest::from_model_request(&ModelRequest {
            model: "m",
            messages: &msgs,
            tools: &[],
            max_tokens: 0,
            temperature: 0.0,
        });
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["model"], "m");
    }

    #[test]
    fn api_base_trailing_slash_trimmed() {
        let client = ChatClient::new("k").unwrap().with_api_base("http://localhost:8080/v1/");
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn raw_response_with_tool_calls_parses() {
        let raw = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"c1","type":"function","function":{"name":"file_meta","arguments":"{}"}}]}}]}"#;
        let parsed: RawChatResponse = serde_json::from_str(raw).unwrap();
        let choice = parsed.choices.unwrap().into_iter().next().unwrap();
        assert_eq!(choice.message.tool_calls.unwrap()[0].function.name, "file_meta");
    }
}
