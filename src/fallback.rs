//! Notification delivery outside the reasoning loop.
//!
//! [`NotificationFallback`] is what keeps the one-notification-per-message
//! guarantee when the model never reports on its own: either because the
//! analysis failed ("AI Agent Error") or because the loop ended without a
//! notification attempt.

use std::sync::Arc;

use tracing::{error, info};

use crate::backstage::{BackstageError, NotificationSender};
use crate::monitor::MessageMetadata;

/// Title of the notification sent when analysis fails.
pub const ANALYSIS_ERROR_TITLE: &str = "AI Agent Error";

/// Best-effort notification delivery.
#[derive(Clone)]
pub struct NotificationFallback {
    sender: Arc<dyn NotificationSender>,
}

impl std::fmt::Debug for NotificationFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFallback")
            .field("recipient", &self.sender.recipient())
            .finish()
    }
}

impl NotificationFallback {
    /// Wrap a notification sender.
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    /// Send one notification to the configured recipient.
    ///
    /// # Errors
    ///
    /// Propagates the sender's [`BackstageError`]. Never retries.
    pub async fn send(&self, title: &str, description: &str) -> Result<u16, BackstageError> {
        self.sender.send(title, description).await
    }

    /// Report a failed analysis. Returns whether Backstage accepted it.
    ///
    /// A failed send is logged and swallowed.
    pub async fn notify_analysis_failure(&self, error: &str, metadata: &MessageMetadata) -> bool {
        let description = failure_description(error, metadata);
        self.deliver(ANALYSIS_ERROR_TITLE, &description, metadata)
            .await
    }

    /// Report an analysis the model finished without notifying.
    ///
    /// `summary` is the model's final answer, if it reached one. Returns
    /// whether Backstage accepted the notification.
    pub async fn notify_unreported_analysis(
        &self,
        title: &str,
        summary: Option<&str>,
        rounds: u32,
        metadata: &MessageMetadata,
    ) -> bool {
        let description = analysis_description(summary, rounds, metadata);
        self.deliver(title, &description, metadata).await
    }

    async fn deliver(&self, title: &str, description: &str, metadata: &MessageMetadata) -> bool {
        match self.send(title, description).await {
            Ok(status) => {
                info!(
                    title,
                    status,
                    topic = %metadata.topic,
                    partition = metadata.partition,
                    offset = metadata.offset,
                    "fallback notification sent"
                );
                true
            }
            Err(e) => {
                error!(
                    error = %e,
                    title,
                    topic = %metadata.topic,
                    partition = metadata.partition,
                    offset = metadata.offset,
                    "failed to send fallback notification"
                );
                false
            }
        }
    }
}

/// Description of the "AI Agent Error" notification.
pub fn failure_description(error: &str, metadata: &MessageMetadata) -> String {
    format!(
        "The AI agent encountered an error while analyzing a failed message:\n\n\
         **Error:** {error}\n\n\
         {}\n\n\
         Please investigate this message routing failure manually.",
        metadata_block(metadata)
    )
}

/// Description of a notification the engine sends on the model's behalf.
pub fn analysis_description(
    summary: Option<&str>,
    rounds: u32,
    metadata: &MessageMetadata,
) -> String {
    let analysis = match summary.map(str::trim).filter(|s| !s.is_empty()) {
        Some(text) => format!("**Analysis:** {text}"),
        None => format!(
            "**Analysis:** The AI agent did not reach a conclusion within {rounds} reasoning round(s)."
        ),
    };
    format!(
        "A message failed to be routed properly.\n\n{analysis}\n\n{}",
        metadata_block(metadata)
    )
}

fn metadata_block(metadata: &MessageMetadata) -> String {
    format!(
        "**Metadata:**\n\
         - Topic: {}\n\
         - Partition: {}\n\
         - Offset: {}\n\
         - Key: {}\n\
         - Timestamp: {}",
        metadata.topic,
        metadata.partition,
        metadata.offset,
        metadata.key.as_deref().unwrap_or("none"),
        metadata.timestamp
    )
}
