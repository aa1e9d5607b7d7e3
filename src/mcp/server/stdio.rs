use super::{ServerIdentity, ServerSession};
use crate::mcp::transport::stdio::process_connection;
use crate::mcp::SessionState;
use crate::tools::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const STDOUT_DRAIN_TIMEOUT_SECONDS: u64 = 5;

/// Serves a single session over this process's stdin/stdout until the client
/// hangs up or `shutdown` fires.
pub async fn serve_stdio(
    registry: Arc<ToolRegistry>,
    identity: ServerIdentity,
    shutdown: &CancellationToken,
) -> SessionState {
    info!(server = %identity.name, tools = registry.len(), "Serving MCP over stdio");
    let (connection, writer) = process_connection(shutdown);
    let state = ServerSession::new(registry, identity, "stdio")
        .run(connection)
        .await;
    if tokio::time::timeout(Duration::from_secs(STDOUT_DRAIN_TIMEOUT_SECONDS), writer)
        .await
        .is_err()
    {
        warn!("Timed out flushing MCP replies to stdout");
    }
    state
}
