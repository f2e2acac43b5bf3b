//! Shared fakes for the integration tests: scripted model, recording
//! Backstage doubles and a one-shot HTTP responder.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use routing_triage::agent::{AnalysisEngine, EngineSettings};
use routing_triage::backstage::{BackstageError, CatalogLookup, GroupRef, NotificationSender};
use routing_triage::config::{Config, ToolMode};
use routing_triage::fallback::NotificationFallback;
use routing_triage::monitor::MessageMetadata;
use routing_triage::providers::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ProviderError,
    RequestedCall, TokenUsage,
};
use routing_triage::tools::BackstageTools;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// One scripted model turn.
pub enum Turn {
    /// Reply with text.
    Text(String),
    /// Reply with native tool calls `(name, input)`.
    Calls(Vec<(String, serde_json::Value)>),
    /// Fail the call.
    Fail(String),
    /// Panic inside the provider.
    Panic,
}

/// Plays back a fixed list of turns. Once the script runs out it keeps
/// thinking without ever finishing.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicU32,
    tool_calling: bool,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            tool_calling: true,
        }
    }

    pub fn without_tool_calling(mut self) -> Self {
        self.tool_calling = false;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

pub fn text(content: &str) -> Turn {
    Turn::Text(content.to_owned())
}

pub fn action(tool: &str, input: &str) -> Turn {
    Turn::Text(format!(
        "Thought: I should use a tool.\nAction: {tool}\nAction Input: {input}"
    ))
}

pub fn final_answer(summary: &str) -> Turn {
    Turn::Text(format!("Thought: I now know the final answer.\nFinal Answer: {summary}"))
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let turn = self.turns.lock().ok().and_then(|mut t| t.pop_front());

        let (text, tool_calls, finish_reason) = match turn {
            Some(Turn::Text(text)) => (text, Vec::new(), FinishReason::Stop),
            Some(Turn::Calls(calls)) => (
                String::new(),
                calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, arguments))| RequestedCall {
                        id: format!("call_{i}"),
                        name,
                        arguments,
                    })
                    .collect(),
                FinishReason::ToolCalls,
            ),
            Some(Turn::Fail(message)) => return Err(ProviderError::Unavailable(message)),
            Some(Turn::Panic) => panic!("scripted provider panic"),
            None => (
                "Thought: I need to think about this some more.".to_owned(),
                Vec::new(),
                FinishReason::Stop,
            ),
        };

        Ok(CompletionResponse {
            text,
            tool_calls,
            finish_reason,
            usage: Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            }),
            model: "scripted".to_owned(),
        })
    }

    fn supports_tool_calling(&self) -> bool {
        self.tool_calling
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Backstage doubles
// ---------------------------------------------------------------------------

/// How the fake notification endpoint answers.
#[derive(Clone, Copy)]
pub enum SendBehavior {
    Accept,
    Reject(u16),
    /// Connection refused: a real transport error.
    Unreachable,
    /// The answer could not be read.
    Garbled,
}

/// Records every notification it is asked to send.
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    behavior: SendBehavior,
}

impl RecordingSender {
    pub fn new(behavior: SendBehavior) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            behavior,
        }
    }

    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::new(SendBehavior::Accept))
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.sent().len()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, title: &str, description: &str) -> Result<u16, BackstageError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((title.to_owned(), description.to_owned()));
        }
        match self.behavior {
            SendBehavior::Accept => Ok(201),
            SendBehavior::Reject(code) => Err(BackstageError::Server {
                code,
                body: "rejected".to_owned(),
            }),
            SendBehavior::Unreachable => Err(refused().await),
            SendBehavior::Garbled => Err(BackstageError::Unexpected(
                "response body was not readable".to_owned(),
            )),
        }
    }

    fn recipient(&self) -> &str {
        "user:default/oncall"
    }
}

/// A transport error from a connection nobody accepts.
pub async fn refused() -> BackstageError {
    match reqwest::get("http://127.0.0.1:9/").await {
        Err(err) => BackstageError::Network(err),
        Ok(response) => panic!("port 9 should refuse connections, got {}", response.status()),
    }
}

enum CatalogAnswer {
    Groups(Vec<GroupRef>),
    Status(u16),
    Refused,
}

/// Catalog with a fixed answer.
pub struct FakeCatalog {
    answer: CatalogAnswer,
    pub lookups: AtomicU32,
}

impl FakeCatalog {
    pub fn with_groups(groups: &[(&str, &str)]) -> Arc<Self> {
        Self::answering(CatalogAnswer::Groups(
            groups
                .iter()
                .map(|(entity_ref, display_name)| GroupRef {
                    entity_ref: (*entity_ref).to_owned(),
                    display_name: (*display_name).to_owned(),
                })
                .collect(),
        ))
    }

    pub fn failing(code: u16) -> Arc<Self> {
        Self::answering(CatalogAnswer::Status(code))
    }

    pub fn unreachable() -> Arc<Self> {
        Self::answering(CatalogAnswer::Refused)
    }

    fn answering(answer: CatalogAnswer) -> Arc<Self> {
        Arc::new(Self {
            answer,
            lookups: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl CatalogLookup for FakeCatalog {
    async fn list_groups(&self) -> Result<Vec<GroupRef>, BackstageError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            CatalogAnswer::Groups(groups) => Ok(groups.clone()),
            CatalogAnswer::Status(code) => Err(BackstageError::Server {
                code: *code,
                body: "catalog unavailable".to_owned(),
            }),
            CatalogAnswer::Refused => Err(refused().await),
        }
    }
}

pub fn platform_groups() -> Arc<FakeCatalog> {
    FakeCatalog::with_groups(&[
        ("group:default/payments", "Payments Team"),
        ("group:default/logistics", "Logistics"),
    ])
}

// ---------------------------------------------------------------------------
// Engine wiring
// ---------------------------------------------------------------------------

pub fn settings(max_iterations: u32, tool_mode: ToolMode) -> EngineSettings {
    let mut config = Config::default();
    config.model.max_iterations = max_iterations;
    config.model.tool_mode = tool_mode;
    EngineSettings::from_config(&config)
}

pub fn engine(
    provider: Arc<ScriptedProvider>,
    catalog: Arc<FakeCatalog>,
    sender: Arc<RecordingSender>,
    settings: EngineSettings,
) -> AnalysisEngine {
    let tools = BackstageTools::new(catalog, sender.clone());
    AnalysisEngine::new(
        provider,
        Arc::new(tools),
        NotificationFallback::new(sender),
        settings,
    )
}

pub fn metadata(partition: i32, offset: i64) -> MessageMetadata {
    MessageMetadata {
        topic: "review".to_owned(),
        partition,
        offset,
        timestamp: 1_700_000_000_000,
        key: Some("order-17".to_owned()),
        headers: BTreeMap::from([("source".to_owned(), "router".to_owned())]),
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Answer exactly one HTTP request with `status_line` and `body`, handing
/// the raw request back through the receiver. Returns the server base URL.
pub async fn serve_once(status_line: &str, body: &str) -> (String, oneshot::Receiver<String>) {
    let listener_result = TcpListener::bind("127.0.0.1:0").await;
    let listener = match listener_result {
        Ok(listener) => listener,
        Err(err) => panic!("listener should bind: {err}"),
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => panic!("listener should expose local addr: {err}"),
    };

    let (request_tx, request_rx) = oneshot::channel();
    let status_line_owned = status_line.to_owned();
    let body_owned = body.to_owned();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status_line_owned}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body_owned}",
                body_owned.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = request_tx.send(request);
        }
    });

    (format!("http://{addr}"), request_rx)
}

/// Accept connections and never answer them. Returns the server base URL.
pub async fn serve_silence() -> String {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => panic!("listener should bind: {err}"),
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => panic!("listener should expose local addr: {err}"),
    };
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}

/// Read one request: headers plus a `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body_start = header_end.saturating_add(4);
            if buf.len().saturating_sub(body_start) >= length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Split a raw HTTP request into its head and body.
pub fn split_request(raw: &str) -> (&str, &str) {
    raw.split_once("\r\n\r\n").unwrap_or((raw, ""))
}
