use super::wire::{self, InboundFrame, RpcRequest, RpcResponse};
use crate::mcp::transport::Connection;
use crate::mcp::SessionState;
use crate::tools::{ToolInvocationRequest, ToolRegistry};
use rust_mcp_schema::LATEST_PROTOCOL_VERSION;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Protocol revisions this server answers with when a client asks for them.
const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[
    LATEST_PROTOCOL_VERSION,
    "2025-11-25",
    "2025-06-18",
    "2025-03-26",
    "2024-11-05",
];

/// How the server introduces itself in `initialize`.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
}

impl ServerIdentity {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|requested| {
            SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .copied()
                .find(|supported| *supported == requested)
        })
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Server side of one MCP session. Frames are handled strictly one at a time,
/// so a slow tool only delays its own session.
pub struct ServerSession {
    registry: Arc<ToolRegistry>,
    identity: ServerIdentity,
    state: SessionState,
    label: String,
}

impl ServerSession {
    pub fn new(
        registry: Arc<ToolRegistry>,
        identity: ServerIdentity,
        label: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            identity,
            state: SessionState::Connecting,
            label: label.into(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn advance(&mut self, next: SessionState) {
        let from = self.state;
        if self.state.advance(next).is_ok() {
            debug!(session = %self.label, from = %from, to = %next, "MCP session state changed");
        }
    }

    /// Serves `connection` until the peer leaves or violates the protocol.
    /// Returns the terminal state.
    pub async fn run(mut self, connection: Connection) -> SessionState {
        let (mut inbound, outbound, shutdown) = connection.into_parts();
        info!(session = %self.label, "MCP session opened");
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => None,
                frame = inbound.recv() => frame,
            };
            let Some(frame) = frame else {
                self.advance(SessionState::Closed);
                break;
            };
            if let Some(reply) = self.handle_frame(&frame).await {
                if outbound.send(reply).is_err() {
                    self.advance(SessionState::Closed);
                    break;
                }
            }
            if self.state.is_terminal() {
                break;
            }
        }
        // Writers drain queued replies before they observe the shutdown.
        drop(outbound);
        shutdown.cancel();
        info!(session = %self.label, state = %self.state, "MCP session ended");
        self.state
    }

    /// Handles one inbound frame and returns the reply frame, if any.
    pub async fn handle_frame(&mut self, frame: &str) -> Option<String> {
        if self.state.is_terminal() {
            return None;
        }
        match wire::parse_frame(frame) {
            Ok(InboundFrame::Request(request)) => self
                .handle_request(request)
                .await
                .map(|response| response.to_frame()),
            Ok(InboundFrame::Response(value)) => {
                warn!(
                    session = %self.label,
                    id = ?value.get("id"),
                    "Response for a request this server never sent"
                );
                self.advance(SessionState::Errored);
                None
            }
            Err(reply) => {
                warn!(session = %self.label, error = ?reply.error, "Malformed MCP frame");
                self.advance(SessionState::Errored);
                Some(reply.to_frame())
            }
        }
    }

    async fn handle_request(&mut self, request: RpcRequest) -> Option<RpcResponse> {
        debug!(
            session = %self.label,
            method = %request.method,
            id = ?request.id,
            "Received MCP request"
        );
        if request.is_notification() {
            match request.method.as_str() {
                "notifications/initialized" => {
                    if self.state == SessionState::Initialized {
                        debug!(session = %self.label, "Client confirmed initialization");
                        self.advance(SessionState::Ready);
                    }
                }
                other => debug!(session = %self.label, method = %other, "Ignoring notification"),
            }
            return None;
        }

        let id = request.id.clone();
        let response = match request.method.as_str() {
            "initialize" => self.initialize(id, request.params.as_ref()),
            "ping" => RpcResponse::success(id, json!({})),
            "tools/list" => {
                if !self.state.is_ready() {
                    RpcResponse::not_initialized(id)
                } else {
                    self.list_tools(id)
                }
            }
            "tools/call" => {
                if !self.state.is_ready() {
                    RpcResponse::not_initialized(id)
                } else {
                    self.call_tool(id, request.params).await
                }
            }
            other => RpcResponse::method_not_found(id, other),
        };
        Some(response)
    }

    fn initialize(&mut self, id: Option<Value>, params: Option<&Value>) -> RpcResponse {
        if self.state != SessionState::Connecting {
            return RpcResponse::invalid_request(id, "Session is already initialized.");
        }
        let requested = params
            .and_then(|params| params.get("protocolVersion"))
            .and_then(Value::as_str);
        let protocol_version = negotiate_protocol_version(requested);
        let client = params
            .and_then(|params| params.get("clientInfo"))
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(
            session = %self.label,
            client = %client,
            requested = ?requested,
            protocol_version = %protocol_version,
            "MCP client initialized"
        );

        // Tool methods wait for `notifications/initialized`.
        self.advance(SessionState::Initialized);
        RpcResponse::success(
            id,
            json!({
                "protocolVersion": protocol_version,
                "capabilities": {
                    "tools": {"listChanged": false}
                },
                "serverInfo": {
                    "name": self.identity.name,
                    "version": self.identity.version,
                    "icons": []
                }
            }),
        )
    }

    fn list_tools(&self, id: Option<Value>) -> RpcResponse {
        let tools: Vec<Value> = self
            .registry
            .descriptors()
            .map(|descriptor| descriptor.to_wire())
            .collect();
        RpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn call_tool(&self, id: Option<Value>, params: Option<Value>) -> RpcResponse {
        let Some(mut params) = params else {
            return RpcResponse::error(id, wire::INVALID_PARAMS, "Missing tools/call params.");
        };
        let Some(name) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
            return RpcResponse::error(id, wire::INVALID_PARAMS, "Missing tool name.");
        };
        let arguments = params
            .get_mut("arguments")
            .map(Value::take)
            .unwrap_or(Value::Null);

        let result = self
            .registry
            .dispatch(ToolInvocationRequest {
                tool_name: name.clone(),
                arguments,
            })
            .await;
        debug!(
            session = %self.label,
            tool = %name,
            is_error = result.is_failure(),
            "Tool call finished"
        );
        RpcResponse::success(id, result.to_wire())
    }
}
