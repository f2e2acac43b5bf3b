//! `send_backstage_notification`: report the analysis to Backstage.

use serde_json::Value;
use tracing::info;

use crate::backstage::{BackstageError, NotificationSender};

use super::{ToolCall, ToolError};

/// Required arguments, validated before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationArgs {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub description: String,
}

/// Parse and validate the `notification_data` JSON string.
///
/// # Errors
///
/// Returns [`ToolError::Protocol`] for non-JSON input and
/// [`ToolError::Validation`] when `title` or `description` is missing or
/// empty.
pub fn parse_notification_data(raw: &str) -> Result<NotificationArgs, ToolError> {
    let data: Value = serde_json::from_str(raw.trim())
        .map_err(|e| ToolError::Protocol(format!("Failed to parse notification data JSON: {e}")))?;

    let field = |name: &str| {
        data.get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    let title = field("title")
        .ok_or_else(|| ToolError::Validation("Error: title is required".to_owned()))?;
    let description = field("description")
        .ok_or_else(|| ToolError::Validation("Error: description is required".to_owned()))?;

    Ok(NotificationArgs { title, description })
}

/// Validate the call and send the notification.
///
/// # Errors
///
/// Returns the validation errors of [`parse_notification_data`], then
/// [`ToolError::Upstream`] if Backstage does not acknowledge the notification
/// and [`ToolError::Transport`] on connection failure or timeout.
pub async fn send_notification(
    sender: &dyn NotificationSender,
    call: &ToolCall,
) -> Result<String, ToolError> {
    let raw = call
        .argument(call.name.primary_argument())
        .unwrap_or_default();
    let args = parse_notification_data(raw)?;

    info!(title = %args.title, "model requested notification");
    match sender.send(&args.title, &args.description).await {
        Ok(status) => Ok(format!(
            "Notification sent successfully to Backstage (status: {status})"
        )),
        Err(BackstageError::Server { code, body }) => Err(ToolError::Upstream(format!(
            "Error: Failed to send notification: {code} - {body}"
        ))),
        Err(BackstageError::Network(e)) => Err(ToolError::Transport(format!(
            "Error: Network error sending notification: {e}"
        ))),
        Err(BackstageError::Unexpected(e)) => Err(ToolError::Unexpected(format!(
            "Error: Unexpected error sending notification: {e}"
        ))),
    }
}
