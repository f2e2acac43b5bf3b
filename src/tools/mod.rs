//! Tools the reasoning loop can invoke.
//!
//! The toolset is closed: [`ToolName`] lists every tool and
//! [`BackstageTools`] dispatches with a `match` over it. Each tool is an async
//! function in its own module that returns a formatted string on success or a
//! [`ToolError`] on failure. Errors are turned into [`ToolResult::Error`] text
//! so the model can read them as an observation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::backstage::{CatalogLookup, NotificationSender};
use crate::providers::ToolDefinition;

pub mod catalog_groups;
pub mod send_notification;

// ---------------------------------------------------------------------------
// Tool names
// ---------------------------------------------------------------------------

/// Every tool the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolName {
    /// List Group entities from the Backstage catalog.
    CatalogGroups,
    /// Send a Backstage notification.
    SendNotification,
}

impl ToolName {
    /// All tools, in the order they are presented to the model.
    pub const ALL: [ToolName; 2] = [Self::CatalogGroups, Self::SendNotification];

    /// Wire name the model uses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CatalogGroups => "backstage_catalog_groups",
            Self::SendNotification => "send_backstage_notification",
        }
    }

    /// Look up a tool by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name.trim())
    }

    /// Argument the tool reads when the model passes a bare string.
    pub fn primary_argument(self) -> &'static str {
        match self {
            Self::CatalogGroups => "query",
            Self::SendNotification => "notification_data",
        }
    }

    /// Description shown to the model.
    pub fn description(self) -> &'static str {
        match self {
            Self::CatalogGroups => {
                "Look up and list all Groups from the Backstage Catalog. \
                 This can help identify team structures and ownership for routing messages. \
                 Input is not used, leave it empty to get all groups."
            }
            Self::SendNotification => {
                "Send a notification to Backstage when you have completed your analysis of a \
                 message routing failure. Input should be a JSON string with 'title' (required) \
                 and 'description' (required). \
                 Example: {\"title\": \"Routing Issue Found\", \"description\": \"Details...\"}"
            }
        }
    }

    /// JSON Schema of the tool arguments.
    pub fn input_schema(self) -> Value {
        match self {
            Self::CatalogGroups => json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Not used. Leave empty to list all groups.",
                        "default": ""
                    }
                }
            }),
            Self::SendNotification => json!({
                "type": "object",
                "properties": {
                    "notification_data": {
                        "type": "string",
                        "description": "JSON string containing notification data with fields: \
                            title (required) and description (required). \
                            Example: '{\"title\": \"Alert\", \"description\": \"Issue found\"}'"
                    }
                },
                "required": ["notification_data"]
            }),
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire names of every tool.
pub fn tool_names() -> Vec<&'static str> {
    ToolName::ALL.iter().map(|t| t.as_str()).collect()
}

/// Tool definitions for native tool calling.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    ToolName::ALL
        .iter()
        .map(|t| ToolDefinition {
            name: t.as_str().to_owned(),
            description: t.description().to_owned(),
            input_schema: t.input_schema(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Calls and results
// ---------------------------------------------------------------------------

/// A tool selected by the model, with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    /// Which tool.
    pub name: ToolName,
    /// Arguments, each rendered as a string.
    pub arguments: BTreeMap<String, String>,
}

impl ToolCall {
    /// Build a call from a tool name and the model's JSON input.
    ///
    /// A bare string becomes the tool's primary argument. Object values that
    /// are not strings are kept as their JSON text. A notification given as
    /// `{"title": .., "description": ..}` directly, without the
    /// `notification_data` wrapper, is re-encoded into `notification_data`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Validation`] if the name is not a known tool.
    pub fn from_json(name: &str, input: &Value) -> Result<Self, ToolError> {
        let tool = ToolName::parse(name).ok_or_else(|| unknown_tool(name))?;

        let mut arguments = BTreeMap::new();
        match input {
            Value::Null => {}
            Value::String(s) => {
                arguments.insert(tool.primary_argument().to_owned(), s.clone());
            }
            Value::Object(map) => {
                let primary = tool.primary_argument();
                let unwrapped_notification = tool == ToolName::SendNotification
                    && !map.contains_key(primary)
                    && (map.contains_key("title") || map.contains_key("description"));
                if unwrapped_notification {
                    arguments.insert(primary.to_owned(), input.to_string());
                } else {
                    for (key, value) in map {
                        let text = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        arguments.insert(key.clone(), text);
                    }
                }
            }
            other => {
                arguments.insert(tool.primary_argument().to_owned(), other.to_string());
            }
        }

        Ok(Self {
            name: tool,
            arguments,
        })
    }

    /// Value of an argument, if present.
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).map(String::as_str)
    }
}

fn unknown_tool(name: &str) -> ToolError {
    ToolError::Validation(format!(
        "{} is not a valid tool, try one of [{}].",
        name.trim(),
        tool_names().join(", ")
    ))
}

/// Error categories a tool call can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection failure or timeout.
    Transport,
    /// Malformed arguments, such as invalid JSON.
    Protocol,
    /// Missing required arguments or an unknown tool.
    Validation,
    /// Non-2xx answer from the downstream service.
    Upstream,
    /// Anything else.
    Unexpected,
}

impl ErrorKind {
    /// Whether a call that failed this way was rejected before any network
    /// request was made.
    pub fn is_local(self) -> bool {
        matches!(self, Self::Protocol | Self::Validation)
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResult {
    /// Tool output.
    Text(String),
    /// Tool failure, described for the model.
    Error {
        /// Failure category.
        kind: ErrorKind,
        /// Human-readable detail.
        detail: String,
    },
}

impl ToolResult {
    /// Text appended to the transcript as the observation.
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Error { detail, .. } => detail,
        }
    }

    /// Whether the call failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Failure category, if the call failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Text(_) => None,
            Self::Error { kind, .. } => Some(*kind),
        }
    }
}

/// Errors returned by tool functions.
///
/// Each message is the exact text the model will read.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Connection failure or timeout.
    #[error("{0}")]
    Transport(String),
    /// Malformed arguments.
    #[error("{0}")]
    Protocol(String),
    /// Missing required arguments or unknown tool.
    #[error("{0}")]
    Validation(String),
    /// Non-2xx answer from the downstream service.
    #[error("{0}")]
    Upstream(String),
    /// Anything else.
    #[error("{0}")]
    Unexpected(String),
}

impl ToolError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        Self::Error {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

impl From<Result<String, ToolError>> for ToolResult {
    fn from(result: Result<String, ToolError>) -> Self {
        match result {
            Ok(text) => Self::Text(text),
            Err(e) => e.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Executes tool calls.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run one tool call. Failures are returned as [`ToolResult::Error`].
    async fn invoke(&self, call: &ToolCall) -> ToolResult;
}

/// The production toolset, backed by the Backstage clients.
#[derive(Clone)]
pub struct BackstageTools {
    catalog: Arc<dyn CatalogLookup>,
    notifier: Arc<dyn NotificationSender>,
}

impl BackstageTools {
    /// Build the toolset from its two Backstage dependencies.
    pub fn new(catalog: Arc<dyn CatalogLookup>, notifier: Arc<dyn NotificationSender>) -> Self {
        Self { catalog, notifier }
    }
}

impl std::fmt::Debug for BackstageTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackstageTools")
            .field("tools", &tool_names())
            .finish()
    }
}

#[async_trait]
impl ToolInvoker for BackstageTools {
    async fn invoke(&self, call: &ToolCall) -> ToolResult {
        debug!(tool = %call.name, "invoking tool");
        let result: ToolResult = match call.name {
            ToolName::CatalogGroups => catalog_groups::catalog_groups(self.catalog.as_ref())
                .await
                .into(),
            ToolName::SendNotification => {
                send_notification::send_notification(self.notifier.as_ref(), call)
                    .await
                    .into()
            }
        };
        if let ToolResult::Error { kind, detail } = &result {
            warn!(tool = %call.name, ?kind, detail = %detail, "tool call failed");
        }
        result
    }
}
