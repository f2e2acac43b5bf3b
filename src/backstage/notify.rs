//! Backstage notification send primitive.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::BackstageConfig;
use crate::providers::sanitize_http_error_body;

use super::{endpoint, http_client, with_token, BackstageError};

/// Status codes Backstage uses to acknowledge a notification.
const ACCEPTED_STATUS: [u16; 3] = [200, 201, 202];

/// A notification addressed to one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// Short headline.
    pub title: String,
    /// Markdown body.
    pub description: String,
    /// Entity reference of the recipient.
    pub recipient: String,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    payload: PayloadBody<'a>,
    recipients: Recipients<'a>,
}

#[derive(Serialize)]
struct PayloadBody<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct Recipients<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(rename = "entityRef")]
    entity_ref: &'a str,
}

impl NotificationPayload {
    /// JSON body for `POST /notifications`.
    pub fn to_request_body(&self) -> serde_json::Value {
        let body = RequestBody {
            payload: PayloadBody {
                title: &self.title,
                description: &self.description,
            },
            recipients: Recipients {
                kind: "entity",
                entity_ref: &self.recipient,
            },
        };
        serde_json::to_value(body).unwrap_or(serde_json::Value::Null)
    }
}

/// Sends a notification to the configured recipient.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Send one notification and return the acknowledging status code.
    ///
    /// Never retries.
    ///
    /// # Errors
    ///
    /// Returns [`BackstageError::Network`] on connection failure or timeout,
    /// [`BackstageError::Server`] when Backstage does not acknowledge the
    /// notification.
    async fn send(&self, title: &str, description: &str) -> Result<u16, BackstageError>;

    /// Entity reference every notification is addressed to.
    fn recipient(&self) -> &str;
}

/// HTTP client for `POST {base}/notifications`.
#[derive(Clone)]
pub struct NotificationClient {
    client: reqwest::Client,
    url: String,
    token: String,
    recipient: String,
}

impl std::fmt::Debug for NotificationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationClient")
            .field("url", &self.url)
            .field("recipient", &self.recipient)
            .finish_non_exhaustive()
    }
}

impl NotificationClient {
    /// Create a client for the configured Backstage instance and recipient.
    ///
    /// # Errors
    ///
    /// Returns [`BackstageError::Network`] if the HTTP client cannot be built.
    pub fn new(config: &BackstageConfig) -> Result<Self, BackstageError> {
        Ok(Self {
            client: http_client(Duration::from_secs(config.timeout_secs))?,
            url: endpoint(&config.api_url, "notifications"),
            token: config.token.clone(),
            recipient: config.recipient_entity.clone(),
        })
    }
}

#[async_trait]
impl NotificationSender for NotificationClient {
    async fn send(&self, title: &str, description: &str) -> Result<u16, BackstageError> {
        let payload = NotificationPayload {
            title: title.to_owned(),
            description: description.to_owned(),
            recipient: self.recipient.clone(),
        };

        info!(recipient = %self.recipient, title, "sending Backstage notification");
        let response = with_token(self.client.post(&self.url), &self.token)
            .json(&payload.to_request_body())
            .send()
            .await?;

        let code = response.status().as_u16();
        if ACCEPTED_STATUS.contains(&code) {
            info!(status = code, "notification accepted");
            return Ok(code);
        }

        let body = response.text().await.unwrap_or_default();
        let body = sanitize_http_error_body(&body);
        warn!(status = code, body = %body, "notification rejected");
        Err(BackstageError::Server { code, body })
    }

    fn recipient(&self) -> &str {
        &self.recipient
    }
}
