//! OpenAI-compatible provider using the `/v1/chat/completions` API.
//!
//! Works against any server that speaks the OpenAI chat format, which is what
//! model-serving stacks such as vLLM expose for self-hosted models.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ModelConfig;

use super::{
    check_http_response, ChatMessage, CompletionRequest, CompletionResponse, FinishReason,
    LlmProvider, ProviderError, RequestedCall, TokenUsage,
};

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Chat completions request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiRequest {
    /// Model identifier.
    pub model: String,
    /// System instruction followed by the transcript.
    pub messages: Vec<OpenAiMessage>,
    /// Function definitions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Stop sequences.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// A transcript entry in chat format.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiMessage {
    /// `system`, `user`, `assistant` or `tool`.
    pub role: &'static str,
    /// Text content; `null` for a pure tool-call turn.
    pub content: Option<String>,
    /// Assistant tool calls.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<OpenAiToolCall>,
    /// Call answered by a `tool` entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// A tool call as the API encodes it.
#[doc(hidden)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    /// Call identifier.
    pub id: String,
    /// Always `function`.
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    /// Function name and JSON-encoded arguments.
    pub function: OpenAiFunctionCall,
}

/// Function payload of a tool call.
#[doc(hidden)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    /// Function name.
    pub name: String,
    /// Arguments encoded as a JSON string.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    model: String,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn function_kind() -> String {
    "function".to_owned()
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat completions provider.
#[derive(Clone)]
pub struct OpenAiProvider {
    model_name: String,
    endpoint: String,
    api_key: String,
    tool_calling: bool,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("model_name", &self.model_name)
            .field("endpoint", &self.endpoint)
            .field("tool_calling", &self.tool_calling)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    /// Create a provider for the configured model and inference server.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &ModelConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            model_name: config.name.clone(),
            endpoint: chat_completions_url(&config.inference_url),
            api_key: config.api_key.clone(),
            tool_calling: config.native_tool_calling,
            client,
        })
    }

    /// The full completions URL this provider posts to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Build the chat completions URL from an inference server base URL.
///
/// Accepts bases with or without a trailing `/v1`.
#[doc(hidden)]
pub fn chat_completions_url(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_owned()
    } else if trimmed.ends_with("/v1") {
        format!("{trimmed}/chat/completions")
    } else {
        format!("{trimmed}/v1/chat/completions")
    }
}

// ---------------------------------------------------------------------------
// Request / Response mapping (pub for integration testing)
// ---------------------------------------------------------------------------

/// Encode a completion request in chat completions format.
#[doc(hidden)]
pub fn build_request(model: &str, request: &CompletionRequest) -> OpenAiRequest {
    let system = OpenAiMessage {
        role: "system",
        content: Some(request.system.clone()),
        tool_calls: Vec::new(),
        tool_call_id: None,
    };
    let messages = std::iter::once(system)
        .chain(request.messages.iter().map(encode_message))
        .collect();

    let tools = request
        .tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();

    OpenAiRequest {
        model: model.to_owned(),
        messages,
        tools,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stop: request.stop.clone(),
    }
}

fn encode_message(message: &ChatMessage) -> OpenAiMessage {
    let tool_calls: Vec<OpenAiToolCall> = message
        .tool_calls
        .iter()
        .map(|call| OpenAiToolCall {
            id: call.id.clone(),
            kind: function_kind(),
            function: OpenAiFunctionCall {
                name: call.name.clone(),
                arguments: match &call.arguments {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                },
            },
        })
        .collect();
    // Assistant turns that only call tools carry `null` content.
    let content = if message.content.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(message.content.clone())
    };
    OpenAiMessage {
        role: message.role.as_str(),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

/// Decode a chat completions response.
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the body is not a chat completion or
/// has no choices. Tool call arguments that are not valid JSON are kept as a
/// JSON string so the caller can report the mistake back to the model.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<CompletionResponse, ProviderError> {
    let resp: OpenAiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("missing choices[0]".to_owned()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| RequestedCall {
            arguments: serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments)),
            id: call.id,
            name: call.function.name,
        })
        .collect();

    let finish_reason = match choice.finish_reason.as_deref() {
        None | Some("stop") => FinishReason::Stop,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        Some(other) => FinishReason::Other(other.to_owned()),
    };

    Ok(CompletionResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason,
        usage: resp.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
        model: resp.model,
    })
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = build_request(&self.model_name, &request);

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder.send().await?;

        parse_response(&check_http_response(response).await?)
    }

    fn supports_tool_calling(&self) -> bool {
        self.tool_calling
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }
}
