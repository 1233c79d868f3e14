//! Probe helpers shared by discovery and polling

use altherma_core::document::{self, render_value};
use altherma_core::ResourcePath;
use tracing::debug;

use crate::envelope::{QueryResponse, CONTENT_PATH};
use crate::error::TransportError;
use crate::transport::Transport;

/// Query the latest content instance of `path` (`<path>/la`)
pub async fn probe_latest<T>(transport: &mut T, path: &ResourcePath) -> Result<QueryResponse, TransportError>
where
    T: Transport + ?Sized,
{
    transport.query(&path.latest()).await
}

/// Read a leaf's latest value as published text
///
/// `Ok(None)` when the resource is absent or carries no content.
pub async fn read_latest_value<T>(transport: &mut T, path: &ResourcePath) -> Result<Option<String>, TransportError>
where
    T: Transport + ?Sized,
{
    let response = probe_latest(transport, path).await?;
    if !response.is_found() {
        debug!(path = %path, rsc = response.code, "No value");
        return Ok(None);
    }
    Ok(document::resolve(&response.body, &CONTENT_PATH, false).and_then(render_value))
}
