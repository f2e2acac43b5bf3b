//! Bounded reasoning loop that triages one failed message.
//!
//! [`AnalysisEngine::analyze`] never fails outward. Every call ends with
//! exactly one notification attempt: the one the model makes through the
//! `send_backstage_notification` tool, or else one the engine sends through
//! [`NotificationFallback`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{Config, ToolMode};
use crate::fallback::NotificationFallback;
use crate::monitor::{AnalysisHandler, AnalysisRequest, MessageMetadata};
use crate::providers::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, ProviderError,
    ToolDefinition,
};
use crate::tools::{
    tool_definitions, tool_names, ErrorKind, ToolCall, ToolError, ToolInvoker, ToolName,
    ToolResult,
};

use super::prompt::{
    react_observation, react_question, react_system_prompt, task_prompt, SYSTEM_PROMPT,
};
use super::react::{input_value, parse_step, ProtocolError, ReactStep, STOP_SEQUENCE};

/// Returned to the model when it tries to notify twice.
const DUPLICATE_NOTIFICATION: &str = "Error: a notification has already been sent for this \
     message. Do not send another one; give your Final Answer.";

// ---------------------------------------------------------------------------
// Settings and status
// ---------------------------------------------------------------------------

/// The parts of [`Config`] the engine reads.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Model identifier.
    pub model: String,
    /// Inference server base URL, for status output.
    pub inference_url: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Upper bound on model calls per message.
    pub max_iterations: u32,
    /// Requested tool presentation mode.
    pub tool_mode: ToolMode,
    /// Title of notifications the engine sends for a finished analysis.
    pub notification_title: String,
    /// Service name, for status output.
    pub service_name: String,
}

impl EngineSettings {
    /// Extract the engine settings from the service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.name.clone(),
            inference_url: config.model.inference_url.clone(),
            temperature: config.model.temperature,
            max_tokens: config.model.max_tokens,
            max_iterations: config.model.max_iterations,
            tool_mode: config.model.tool_mode,
            notification_title: config.backstage.notification_title.clone(),
            service_name: config.service.name.clone(),
        }
    }
}

/// Read-only snapshot of the engine, served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    /// Model identifier.
    pub model: String,
    /// Inference server base URL.
    pub inference_server_url: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Upper bound on model calls per message.
    pub max_iterations: u32,
    /// Tool mode actually in use.
    pub tool_mode: String,
    /// Number of tools.
    pub tools_count: usize,
    /// Service name.
    pub service_name: String,
    /// Tool wire names.
    pub available_tools: Vec<String>,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How an analysis ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// The model gave a final answer.
    Completed {
        /// The model's summary.
        summary: String,
        /// Model calls made.
        iterations: u32,
        /// Whether Backstage accepted the notification.
        notified: bool,
    },
    /// The model never gave a final answer.
    ExhaustedIterations {
        /// Model calls made.
        iterations: u32,
        /// Whether Backstage accepted the notification.
        notified: bool,
    },
    /// The analysis failed and an "AI Agent Error" notification was sent.
    FallbackNotified {
        /// What went wrong.
        error: String,
        /// Whether Backstage accepted the fallback notification.
        delivered: bool,
    },
    /// The analysis failed after the model had already attempted its
    /// notification, so no fallback was sent.
    Aborted {
        /// What went wrong.
        error: String,
        /// Whether Backstage accepted the model's notification.
        notified: bool,
    },
}

impl AnalysisOutcome {
    /// Short name of the terminal state, for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::ExhaustedIterations { .. } => "exhausted_iterations",
            Self::FallbackNotified { .. } => "fallback_notified",
            Self::Aborted { .. } => "aborted",
        }
    }

    /// Whether a notification reached Backstage.
    pub fn notified(&self) -> bool {
        match self {
            Self::Completed { notified, .. }
            | Self::ExhaustedIterations { notified, .. }
            | Self::Aborted { notified, .. } => *notified,
            Self::FallbackNotified { delivered, .. } => *delivered,
        }
    }
}

/// Errors that end the reasoning loop early.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The model call failed.
    #[error("{0}")]
    Provider(#[from] ProviderError),
    /// The reasoning task panicked or was cancelled.
    #[error("reasoning task failed: {0}")]
    Task(String),
}

/// How the loop itself ended.
enum LoopEnd {
    Answered { summary: String, rounds: u32 },
    Exhausted { rounds: u32 },
}

/// Notification bookkeeping shared by the loop and the `analyze` boundary.
#[derive(Default)]
struct NotificationState {
    /// A send reached the network.
    attempted: AtomicBool,
    /// Backstage accepted it.
    delivered: AtomicBool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Triages failed messages with a language model and the Backstage tools.
#[derive(Clone)]
pub struct AnalysisEngine {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolInvoker>,
    fallback: NotificationFallback,
    settings: Arc<EngineSettings>,
}

impl std::fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("model", &self.provider.model_id())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AnalysisEngine {
    /// Assemble an engine.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolInvoker>,
        fallback: NotificationFallback,
        settings: EngineSettings,
    ) -> Self {
        Self {
            provider,
            tools,
            fallback,
            settings: Arc::new(settings),
        }
    }

    /// Tool mode in effect: native tool calling is only used when the
    /// provider supports it.
    pub fn effective_tool_mode(&self) -> ToolMode {
        match self.settings.tool_mode {
            ToolMode::Native if self.provider.supports_tool_calling() => ToolMode::Native,
            _ => ToolMode::React,
        }
    }

    /// Snapshot of the engine settings.
    pub fn status(&self) -> AgentStatus {
        let available_tools: Vec<String> = tool_names().into_iter().map(str::to_owned).collect();
        AgentStatus {
            model: self.settings.model.clone(),
            inference_server_url: self.settings.inference_url.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            max_iterations: self.settings.max_iterations,
            tool_mode: self.effective_tool_mode().as_str().to_owned(),
            tools_count: available_tools.len(),
            service_name: self.settings.service_name.clone(),
            available_tools,
        }
    }

    /// Analyze one failed message and make sure a notification is sent.
    pub async fn analyze(&self, content: &str, metadata: &MessageMetadata) -> AnalysisOutcome {
        let span = info_span!(
            "triage",
            topic = %metadata.topic,
            partition = metadata.partition,
            offset = metadata.offset
        );
        let preview: String = content.chars().take(100).collect();
        info!(parent: &span, preview = %preview, "analyzing failed message");

        let state = Arc::new(NotificationState::default());
        let run = ReasoningRun {
            provider: Arc::clone(&self.provider),
            tools: Arc::clone(&self.tools),
            settings: Arc::clone(&self.settings),
            mode: self.effective_tool_mode(),
            state: Arc::clone(&state),
        };
        let task = task_prompt(content, metadata);

        // The loop runs in its own task so a panic surfaces as a JoinError.
        let reasoning = async move { run.reason(task).await }.instrument(span.clone());
        let result = match tokio::spawn(reasoning).await {
            Ok(result) => result,
            Err(e) => Err(AnalysisError::Task(e.to_string())),
        };

        let attempted = state.attempted.load(Ordering::SeqCst);
        let delivered = state.delivered.load(Ordering::SeqCst);

        let outcome = match result {
            Ok(LoopEnd::Answered { summary, rounds }) => {
                let notified = if attempted {
                    delivered
                } else {
                    info!(parent: &span, "model did not notify, sending analysis on its behalf");
                    self.fallback
                        .notify_unreported_analysis(
                            &self.settings.notification_title,
                            Some(&summary),
                            rounds,
                            metadata,
                        )
                        .await
                };
                AnalysisOutcome::Completed {
                    summary,
                    iterations: rounds,
                    notified,
                }
            }
            Ok(LoopEnd::Exhausted { rounds }) => {
                warn!(parent: &span, rounds, "reasoning rounds exhausted without a final answer");
                let notified = if attempted {
                    delivered
                } else {
                    self.fallback
                        .notify_unreported_analysis(
                            &self.settings.notification_title,
                            None,
                            rounds,
                            metadata,
                        )
                        .await
                };
                AnalysisOutcome::ExhaustedIterations {
                    iterations: rounds,
                    notified,
                }
            }
            Err(e) => {
                let error = e.to_string();
                error!(parent: &span, error = %error, "analysis failed");
                if attempted {
                    AnalysisOutcome::Aborted {
                        error,
                        notified: delivered,
                    }
                } else {
                    let delivered = self.fallback.notify_analysis_failure(&error, metadata).await;
                    AnalysisOutcome::FallbackNotified { error, delivered }
                }
            }
        };

        info!(
            parent: &span,
            outcome = outcome.label(),
            notified = outcome.notified(),
            "analysis finished"
        );
        outcome
    }
}

#[async_trait]
impl AnalysisHandler for AnalysisEngine {
    async fn handle(&self, request: AnalysisRequest) -> anyhow::Result<()> {
        self.analyze(&request.content, &request.metadata).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reasoning loop
// ---------------------------------------------------------------------------

/// Everything one reasoning task owns.
struct ReasoningRun {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolInvoker>,
    settings: Arc<EngineSettings>,
    mode: ToolMode,
    state: Arc<NotificationState>,
}

impl ReasoningRun {
    async fn reason(&self, task: String) -> Result<LoopEnd, AnalysisError> {
        match self.mode {
            ToolMode::React => self.reason_react(task).await,
            ToolMode::Native => self.reason_native(task).await,
        }
    }

    /// Text protocol: tools described in the system prompt, one action per
    /// turn, results fed back as observations.
    async fn reason_react(&self, task: String) -> Result<LoopEnd, AnalysisError> {
        let system = react_system_prompt();
        let mut messages = vec![ChatMessage::user(react_question(&task))];

        for round in 1..=self.settings.max_iterations {
            let response = self
                .complete(round, &messages, &system, Vec::new(), vec![STOP_SEQUENCE.to_owned()])
                .await?;
            let text = response.text;
            debug!(round, response = %text, "model turn");

            let observation = match parse_step(&text) {
                Ok(ReactStep::FinalAnswer(summary)) => {
                    info!(round, summary = %summary, "model gave final answer");
                    return Ok(LoopEnd::Answered {
                        summary,
                        rounds: round,
                    });
                }
                Ok(ReactStep::Action { tool, input }) => {
                    match ToolCall::from_json(&tool, &input_value(&input)) {
                        Ok(call) => self.invoke(&call).await.text().to_owned(),
                        Err(e) => {
                            warn!(round, tool = %tool, "model selected an unknown tool");
                            e.to_string()
                        }
                    }
                }
                Err(e) => {
                    warn!(round, error = %e, "model turn did not follow the protocol");
                    e.to_string()
                }
            };

            messages.push(ChatMessage::assistant(text.trim()));
            messages.push(ChatMessage::user(react_observation(&observation)));
        }

        Ok(LoopEnd::Exhausted {
            rounds: self.settings.max_iterations,
        })
    }

    /// Native tool calling: tools sent as function definitions, a text-only
    /// answer ends the loop.
    async fn reason_native(&self, task: String) -> Result<LoopEnd, AnalysisError> {
        let definitions = tool_definitions();
        let mut messages = vec![ChatMessage::user(task)];

        for round in 1..=self.settings.max_iterations {
            let response = self
                .complete(round, &messages, SYSTEM_PROMPT, definitions.clone(), Vec::new())
                .await?;

            if response.tool_calls.is_empty() {
                let summary = response.text.trim().to_owned();
                info!(round, summary = %summary, "model gave final answer");
                return Ok(LoopEnd::Answered {
                    summary,
                    rounds: round,
                });
            }

            let calls = response.tool_calls;
            messages.push(ChatMessage::assistant_calls(response.text, calls.clone()));
            for call in calls {
                let result = match native_call(&call.name, &call.arguments) {
                    Ok(tool_call) => self.invoke(&tool_call).await,
                    Err(result) => {
                        warn!(round, tool = %call.name, detail = %result.text(), "rejected tool call");
                        result
                    }
                };
                messages.push(ChatMessage::tool_result(call.id, result.text()));
            }
        }

        Ok(LoopEnd::Exhausted {
            rounds: self.settings.max_iterations,
        })
    }

    async fn complete(
        &self,
        round: u32,
        messages: &[ChatMessage],
        system: &str,
        tools: Vec<ToolDefinition>,
        stop: Vec<String>,
    ) -> Result<CompletionResponse, AnalysisError> {
        let request = CompletionRequest {
            system: system.to_owned(),
            messages: messages.to_vec(),
            tools,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stop,
        };
        let response = self.provider.complete(request).await?;

        if let Some(usage) = response.usage {
            debug!(
                round,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "model usage"
            );
        }
        if response.finish_reason.is_truncated() {
            warn!(
                round,
                finish_reason = ?response.finish_reason,
                max_tokens = self.settings.max_tokens,
                "model turn was cut short"
            );
        }
        Ok(response)
    }

    /// Invoke a tool, allowing at most one notification attempt per message.
    async fn invoke(&self, call: &ToolCall) -> ToolResult {
        if call.name != ToolName::SendNotification {
            return self.tools.invoke(call).await;
        }

        if self.state.attempted.load(Ordering::SeqCst) {
            warn!("model tried to send a second notification");
            return ToolResult::Error {
                kind: ErrorKind::Validation,
                detail: DUPLICATE_NOTIFICATION.to_owned(),
            };
        }

        let result = self.tools.invoke(call).await;
        match result.error_kind() {
            // Rejected before the network; the model may try again.
            Some(kind) if kind.is_local() => {}
            Some(_) => self.state.attempted.store(true, Ordering::SeqCst),
            None => {
                self.state.attempted.store(true, Ordering::SeqCst);
                self.state.delivered.store(true, Ordering::SeqCst);
            }
        }
        result
    }
}

/// Validate a native tool call. Function arguments must be a JSON object.
fn native_call(name: &str, input: &serde_json::Value) -> Result<ToolCall, ToolResult> {
    if !(input.is_object() || input.is_null()) {
        let raw = match input {
            serde_json::Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        let err = ProtocolError::InvalidArguments {
            tool: name.to_owned(),
            raw,
        };
        return Err(ToolError::Protocol(err.to_string()).into());
    }
    ToolCall::from_json(name, input).map_err(ToolResult::from)
}
