//! Backstage catalog lookup of Group entities.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::BackstageConfig;
use crate::providers::sanitize_http_error_body;

use super::{endpoint, http_client, with_token, BackstageError};

/// Sentinel returned when the catalog holds no groups.
pub const NO_GROUPS: &str = "No groups found in the Backstage Catalog.";

/// A Group entity as presented to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRef {
    /// Full entity reference, `group:<namespace>/<name>`.
    pub entity_ref: String,
    /// `metadata.title`, or the name when no title is set.
    pub display_name: String,
}

/// Source of catalog groups.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// List every Group entity in the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`BackstageError`] on transport failure, a non-2xx status or an
    /// unparseable body.
    async fn list_groups(&self) -> Result<Vec<GroupRef>, BackstageError>;
}

#[derive(Debug, Deserialize)]
struct Entity {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: EntityMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct EntityMetadata {
    #[serde(default)]
    name: String,
    namespace: Option<String>,
    title: Option<String>,
}

/// Extract the Group entities from a catalog `/entities` response body.
///
/// Entities of other kinds and entities without a name are skipped.
///
/// # Errors
///
/// Returns [`BackstageError::Unexpected`] if the body is not a JSON array of
/// entities.
pub fn groups_from_entities(body: &str) -> Result<Vec<GroupRef>, BackstageError> {
    let entities: Vec<Entity> = serde_json::from_str(body)
        .map_err(|e| BackstageError::Unexpected(format!("invalid catalog response: {e}")))?;

    Ok(entities
        .into_iter()
        .filter(|e| e.kind == "Group" && !e.metadata.name.is_empty())
        .map(|e| {
            let namespace = e
                .metadata
                .namespace
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| "default".to_owned());
            let display_name = e
                .metadata
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| e.metadata.name.clone());
            GroupRef {
                entity_ref: format!("group:{namespace}/{}", e.metadata.name),
                display_name,
            }
        })
        .collect())
}

/// Render groups as the text the model reads.
pub fn render_groups(groups: &[GroupRef]) -> String {
    if groups.is_empty() {
        return NO_GROUPS.to_owned();
    }
    let mut out = format!("Found {} group(s) in Backstage Catalog:\n\n", groups.len());
    for group in groups {
        out.push_str(&format!(
            "- **{}** ({})\n",
            group.display_name, group.entity_ref
        ));
    }
    out
}

/// HTTP client for `GET {base}/catalog/entities?filter=kind=group`.
#[derive(Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl CatalogClient {
    /// Create a client for the configured Backstage instance.
    ///
    /// # Errors
    ///
    /// Returns [`BackstageError::Network`] if the HTTP client cannot be built.
    pub fn new(config: &BackstageConfig) -> Result<Self, BackstageError> {
        Ok(Self {
            client: http_client(Duration::from_secs(config.timeout_secs))?,
            url: endpoint(&config.api_url, "catalog/entities?filter=kind=group"),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl CatalogLookup for CatalogClient {
    async fn list_groups(&self) -> Result<Vec<GroupRef>, BackstageError> {
        info!("querying Backstage catalog for groups");
        let response = with_token(self.client.get(&self.url), &self.token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackstageError::Server {
                code: status.as_u16(),
                body: sanitize_http_error_body(&body),
            });
        }

        let groups = groups_from_entities(&body)?;
        debug!(count = groups.len(), "catalog groups retrieved");
        Ok(groups)
    }
}
