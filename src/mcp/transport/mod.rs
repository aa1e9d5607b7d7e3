//! Frame transports.
//!
//! A binding moves opaque frames (one JSON-RPC document each) between two
//! endpoints and hands the session a [`Connection`]. Sessions never see
//! processes or sockets; closing the connection's shutdown token tears the
//! binding down on every exit path.

use crate::core::config::Config;
use crate::mcp::McpError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod memory;
pub mod sse;
pub mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Supported transport bindings.
///
/// - [`TransportKind::Stdio`] for a locally spawned process (newline-delimited JSON).
/// - [`TransportKind::Sse`] for the HTTP event stream plus POSTed client messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
}

impl TransportKind {
    pub fn from_name(name: &str) -> Result<Self, String> {
        match name.trim().to_ascii_lowercase().as_str() {
            "stdio" | "pipe" => Ok(TransportKind::Stdio),
            "sse" | "http" | "stream" => Ok(TransportKind::Sse),
            other => Err(format!("Unsupported MCP transport: {other}")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// Both directions of an open binding.
pub struct Connection {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inbound,
            outbound,
            shutdown,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
        CancellationToken,
    ) {
        (self.inbound, self.outbound, self.shutdown)
    }
}

/// Client-side binding that can be opened into a [`Connection`].
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn open(&self) -> Result<Connection, McpError>;
}

/// Builds the client binding selected by `[client]` configuration.
pub fn client_transport(
    kind: TransportKind,
    config: &Config,
) -> Result<Box<dyn Transport>, McpError> {
    match kind {
        TransportKind::Stdio => Ok(Box::new(StdioTransport::from_config(config)?)),
        TransportKind::Sse => Ok(Box::new(SseTransport::new(
            config.client_url(),
            config.client_request_timeout(),
        )?)),
    }
}
