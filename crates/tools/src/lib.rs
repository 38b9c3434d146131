//! Tool handlers for fundwise.
//!
//! Every known tool is served by a remote HTTP endpoint configured under
//! `[tools.<name>]`. Tools without an endpoint are left out of the catalog
//! and therefore never offered to the model.

pub mod remote;
pub mod schemas;

use fundwise_config::AppConfig;
use fundwise_core::error::ToolError;
use fundwise_core::tool::{KnownTool, ToolCatalog};
use std::sync::Arc;

pub use remote::RemoteTool;

/// Build the catalog from the configured tool endpoints.
pub fn default_catalog(config: &AppConfig) -> Result<ToolCatalog, ToolError> {
    let mut catalog = ToolCatalog::new();
    for tool in KnownTool::ALL {
        if let Some(endpoint) = config.tool_endpoint(tool) {
            catalog.register(tool, Arc::new(RemoteTool::new(tool, endpoint)?));
            tracing::debug!(tool = %tool, endpoint = %endpoint.endpoint, "Registered remote tool");
        }
    }
    if catalog.is_empty() {
        tracing::warn!("No tools configured; the assistant will answer without tools");
    }
    Ok(catalog)
}
