//! LLM provider abstraction layer.
//!
//! Defines the [`LlmProvider`] trait and the chat transcript the analysis
//! engine builds. The only production implementation is
//! [`openai::OpenAiProvider`], which targets any OpenAI-compatible
//! `/v1/chat/completions` server (vLLM, KServe predictors, OpenAI itself).

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

pub mod openai;

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Who wrote a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The analysis request and ReAct observations.
    User,
    /// Model output.
    Assistant,
    /// Result of a native tool call.
    Tool,
}

impl Role {
    /// Wire name in the chat completions API.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool call the model asked for in native mode.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestedCall {
    /// Call identifier, echoed back with the result.
    pub id: String,
    /// Tool wire name.
    pub name: String,
    /// Decoded arguments. Arguments that are not JSON are kept as a string.
    pub arguments: Value,
}

/// One entry of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Text content, empty for a pure tool-call turn.
    pub content: String,
    /// Tool calls made in an assistant turn.
    pub tool_calls: Vec<RequestedCall>,
    /// Call this entry answers, for [`Role::Tool`].
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A user entry.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content.into())
    }

    /// A plain assistant entry.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content.into())
    }

    /// An assistant entry that carries native tool calls.
    pub fn assistant_calls(content: impl Into<String>, calls: Vec<RequestedCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::text(Role::Assistant, content.into())
        }
    }

    /// The result of one native tool call.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::text(Role::Tool, content.into())
        }
    }

    fn text(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Function definition offered to the model in native mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDefinition {
    /// Tool wire name.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema of the arguments.
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// One completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System instruction, sent first.
    pub system: String,
    /// Transcript so far.
    pub messages: Vec<ChatMessage>,
    /// Native tool definitions; empty in ReAct mode.
    pub tools: Vec<ToolDefinition>,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Stop sequences.
    pub stop: Vec<String>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end or a stop sequence.
    Stop,
    /// The model issued tool calls.
    ToolCalls,
    /// Cut off at the token limit.
    Length,
    /// Blocked by the server's content filter.
    ContentFilter,
    /// Anything else the server reported.
    Other(String),
}

impl FinishReason {
    /// Whether the turn was cut short, so its text may be incomplete.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Length | Self::ContentFilter)
    }
}

/// Token counts reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub prompt_tokens: u32,
    /// Generated tokens.
    pub completion_tokens: u32,
}

/// One model turn.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated text.
    pub text: String,
    /// Native tool calls, in order.
    pub tool_calls: Vec<RequestedCall>,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Token counts, when the server reports them.
    pub usage: Option<TokenUsage>,
    /// Model that served the turn.
    pub model: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by model providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure, including timeouts.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the chat completions schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// The server answered with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// The provider cannot serve the request.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether the request failed because it ran past its timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_timeout())
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

const MAX_ERROR_BODY_CHARS: usize = 256;

/// Return the body of a 2xx response, or a sanitized status error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure, `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }
    Err(ProviderError::HttpStatus {
        status: status.as_u16(),
        body: sanitize_http_error_body(&body),
    })
}

/// Collapse whitespace, redact token-like values and truncate an error body
/// so it is safe to log and to hand back to the model.
pub fn sanitize_http_error_body(raw: &str) -> String {
    let mut sanitized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    for pattern in [
        r"sk-[A-Za-z0-9]{32,}",
        r"(?i)bearer\s+[A-Za-z0-9._\-]{16,}",
        r"eyJ[A-Za-z0-9_\-]{10,}\.[A-Za-z0-9_\-]{10,}\.[A-Za-z0-9_\-]{10,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    match sanitized.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((cut, _)) => format!("{}...[truncated]", sanitized.get(..cut).unwrap_or_default()),
        None => sanitized,
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A chat model the engine can reason with.
///
/// Implementations must be `Send + Sync` so one provider can be shared by
/// the engine and moved into the reasoning task.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, status or parse failure.
    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    /// Whether the server parses native tool calls.
    fn supports_tool_calling(&self) -> bool;

    /// Model identifier this provider sends.
    fn model_id(&self) -> &str;
}
