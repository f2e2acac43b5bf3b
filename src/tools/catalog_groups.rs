//! `backstage_catalog_groups`: list the Group entities in the catalog.

use crate::backstage::catalog::render_groups;
use crate::backstage::{BackstageError, CatalogLookup};

use super::ToolError;

/// List catalog groups as bullet lines, or the "no groups" sentinel.
///
/// The tool takes no arguments; an optional `query` is accepted and ignored.
///
/// # Errors
///
/// Returns [`ToolError::Transport`] on connection failure or timeout,
/// [`ToolError::Upstream`] on a non-2xx status and [`ToolError::Unexpected`]
/// on an unreadable response.
pub async fn catalog_groups(catalog: &dyn CatalogLookup) -> Result<String, ToolError> {
    match catalog.list_groups().await {
        Ok(groups) => Ok(render_groups(&groups)),
        Err(BackstageError::Server { code, body }) => Err(ToolError::Upstream(format!(
            "Error: Failed to query Backstage Catalog: {code} - {body}"
        ))),
        Err(BackstageError::Network(e)) => Err(ToolError::Transport(format!(
            "Error: Network error querying Backstage Catalog: {e}"
        ))),
        Err(BackstageError::Unexpected(e)) => Err(ToolError::Unexpected(format!(
            "Error: Unexpected error querying Backstage Catalog: {e}"
        ))),
    }
}
