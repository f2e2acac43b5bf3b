//! REST clients for the Backstage catalog and notification APIs.
//!
//! Both clients share a bearer token, a per-request timeout and the
//! [`BackstageError`] taxonomy. Callers depend on the [`CatalogLookup`] and
//! [`NotificationSender`] traits so tests can swap in fakes.

use std::time::Duration;

pub mod catalog;
pub mod notify;

pub use catalog::{CatalogClient, CatalogLookup, GroupRef};
pub use notify::{NotificationClient, NotificationPayload, NotificationSender};

/// Errors returned by the Backstage clients.
#[derive(Debug, thiserror::Error)]
pub enum BackstageError {
    /// Connection failure or timeout.
    #[error("{0}")]
    Network(#[from] reqwest::Error),
    /// Backstage answered with an unexpected status code.
    #[error("{code} - {body}")]
    Server {
        /// HTTP status code.
        code: u16,
        /// Sanitized response body.
        body: String,
    },
    /// Anything else, such as an unreadable response body.
    #[error("{0}")]
    Unexpected(String),
}

impl BackstageError {
    /// Whether the request ran past its timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Network(e) if e.is_timeout())
    }
}

/// Build the HTTP client used by both APIs.
fn http_client(timeout: Duration) -> Result<reqwest::Client, BackstageError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Join the API base URL and a path without doubling slashes.
fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Attach the bearer token when one is configured.
fn with_token(builder: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
    if token.is_empty() {
        builder
    } else {
        builder.bearer_auth(token)
    }
}
