//! Status endpoint: `GET /health` and `GET /status`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::agent::AgentStatus;
use crate::config::KafkaConfig;

/// Consumer settings shown on the status page. Credentials are left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KafkaStatus {
    /// Bootstrap broker.
    pub broker: String,
    /// `security.protocol`.
    pub security_protocol: String,
    /// `sasl.mechanism`.
    pub sasl_mechanism: String,
    /// Consumer group id.
    pub consumer_group: String,
    /// Monitored topic.
    pub monitored_topic: String,
}

impl From<&KafkaConfig> for KafkaStatus {
    fn from(config: &KafkaConfig) -> Self {
        Self {
            broker: config.broker.clone(),
            security_protocol: config.security_protocol.clone(),
            sasl_mechanism: config.sasl_mechanism.clone(),
            consumer_group: config.consumer_group.clone(),
            monitored_topic: config.monitored_topic.clone(),
        }
    }
}

/// Body of the status response.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// `healthy` while running, `stopped` afterwards.
    pub status: &'static str,
    /// Service name.
    pub service_name: String,
    /// Crate version.
    pub version: &'static str,
    /// Engine snapshot.
    pub ai_agent: AgentStatus,
    /// Consumer settings.
    pub kafka: KafkaStatus,
}

/// Shared state of the status routes.
#[derive(Debug, Clone)]
pub struct StatusState {
    running: Arc<AtomicBool>,
    service_name: String,
    agent: AgentStatus,
    kafka: KafkaStatus,
}

impl StatusState {
    /// Build the state from the running flag and the static snapshots.
    pub fn new(
        running: Arc<AtomicBool>,
        service_name: impl Into<String>,
        agent: AgentStatus,
        kafka: KafkaStatus,
    ) -> Self {
        Self {
            running,
            service_name: service_name.into(),
            agent,
            kafka,
        }
    }

    fn response(&self) -> (StatusCode, StatusResponse) {
        let running = self.running.load(Ordering::SeqCst);
        let code = if running {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        let body = StatusResponse {
            status: if running { "healthy" } else { "stopped" },
            service_name: self.service_name.clone(),
            version: env!("CARGO_PKG_VERSION"),
            ai_agent: self.agent.clone(),
            kafka: self.kafka.clone(),
        };
        (code, body)
    }
}

/// Routes of the status endpoint. Unknown paths answer 404 with JSON.
pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(status))
        .route("/status", get(status))
        .fallback(not_found)
        .with_state(state)
}

async fn status(State(state): State<StatusState>) -> impl IntoResponse {
    let (code, body) = state.response();
    (code, Json(body))
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Not found",
            "path": uri.path(),
        })),
    )
}
