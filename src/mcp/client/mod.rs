//! Caller side of an MCP session.
//!
//! A [`ClientSession`] owns one [`Connection`]. A reader task routes
//! responses to the request that is waiting for them; callers are serialized
//! through a gate so a session never has more than one request in flight.

use crate::mcp::transport::{Connection, Transport};
use crate::mcp::{McpError, SessionState};
use crate::tools::ToolInvocationResult;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolRequestParams, InitializeResult, PaginatedRequestParams, RequestId, RpcError, Tool,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod protocol;


const MCP_MAX_TOOL_LIST: usize = 100;

type PendingMap = HashMap<RequestId, oneshot::Sender<Result<ServerMessage, McpError>>>;

struct SessionInner {
    label: String,
    state: watch::Sender<SessionState>,
    pending: Mutex<PendingMap>,
    outbound: mpsc::UnboundedSender<String>,
    next_request_id: AtomicI64,
    shutdown: CancellationToken,
    server_details: RwLock<Option<InitializeResult>>,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut from = None;
        let changed = self.state.send_if_modified(|state| {
            from = Some(*state);
            state.advance(next).is_ok()
        });
        if changed {
            debug!(session = %self.label, from = ?from, to = %next, "MCP session state changed");
        }
        changed
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Moves to a terminal state, stops the binding, and fails every waiter.
    async fn terminate(&self, next: SessionState, error: McpError) {
        self.transition(next);
        self.shutdown.cancel();
        let waiters: Vec<_> = self.pending.lock().await.drain().collect();
        for (request_id, tx) in waiters {
            debug!(session = %self.label, request_id = ?request_id, "Failing pending MCP request");
            let _ = tx.send(Err(error.clone()));
        }
    }

    fn send_frame(&self, message: &ClientMessage) -> Result<(), McpError> {
        let payload =
            serde_json::to_string(message).map_err(|err| McpError::Protocol(err.to_string()))?;
        self.outbound
            .send(payload)
            .map_err(|_| McpError::SessionClosed)
    }

    async fn dispatch_message(&self, message: ServerMessage) -> Result<(), McpError> {
        match &message {
            ServerMessage::Response(response) => {
                let request_id = response.id.clone();
                debug!(session = %self.label, response_id = ?request_id, "Received MCP response");
                self.complete(request_id, message).await
            }
            ServerMessage::Error(error) => {
                debug!(
                    session = %self.label,
                    error_id = ?error.id,
                    error_code = error.error.code,
                    "Received MCP error"
                );
                match error.id.clone() {
                    Some(request_id) => self.complete(request_id, message).await,
                    None => Err(McpError::Protocol(format!(
                        "Server reported an error without a request id: {}",
                        error.error.message
                    ))),
                }
            }
            ServerMessage::Request(request) => {
                debug!(
                    session = %self.label,
                    method = %request.method(),
                    request_id = ?request.request_id(),
                    "Declining MCP server request"
                );
                let error = RpcError::method_not_found()
                    .with_message(&format!("Client does not handle {}.", request.method()));
                let reply = ClientMessage::from_message(
                    MessageFromClient::Error(error),
                    Some(request.request_id().clone()),
                )
                .map_err(|err| McpError::Protocol(err.to_string()))?;
                self.send_frame(&reply)
            }
            ServerMessage::Notification(_) => {
                debug!(session = %self.label, "Ignoring MCP server notification");
                Ok(())
            }
        }
    }

    async fn complete(
        &self,
        request_id: RequestId,
        message: ServerMessage,
    ) -> Result<(), McpError> {
        match self.pending.lock().await.remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(Ok(message));
                Ok(())
            }
            None => Err(McpError::Protocol(format!(
                "Response for unknown request id {request_id:?}."
            ))),
        }
    }
}

fn spawn_reader(inner: Arc<SessionInner>, mut inbound: mpsc::UnboundedReceiver<String>) {
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = inner.shutdown.cancelled() => None,
                frame = inbound.recv() => frame,
            };
            let Some(frame) = frame else {
                inner
                    .terminate(SessionState::Closed, McpError::SessionClosed)
                    .await;
                return;
            };
            let outcome = match serde_json::from_str::<ServerMessage>(&frame) {
                Ok(message) => inner.dispatch_message(message).await,
                Err(err) => Err(McpError::Protocol(format!("Malformed frame: {err}"))),
            };
            if let Err(err) = outcome {
                warn!(session = %inner.label, error = %err, "MCP protocol violation");
                inner.terminate(SessionState::Errored, err).await;
                return;
            }
        }
    });
}

/// Closes a session from another task while calls may be in flight.
#[derive(Clone)]
pub struct SessionCloser {
    inner: Arc<SessionInner>,
}

impl SessionCloser {
    pub async fn close(&self) {
        self.inner
            .terminate(SessionState::Closed, McpError::SessionClosed)
            .await;
    }
}

pub struct ClientSession {
    inner: Arc<SessionInner>,
    call_gate: Mutex<()>,
    request_timeout: Duration,
}

impl ClientSession {
    /// Takes ownership of an open connection. The session starts in `Connecting`.
    pub fn connect(
        connection: Connection,
        label: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        let (inbound, outbound, shutdown) = connection.into_parts();
        let (state, _) = watch::channel(SessionState::Connecting);
        let inner = Arc::new(SessionInner {
            label: label.into(),
            state,
            pending: Mutex::new(HashMap::new()),
            outbound,
            next_request_id: AtomicI64::new(0),
            shutdown,
            server_details: RwLock::new(None),
        });
        spawn_reader(inner.clone(), inbound);
        Self {
            inner,
            call_gate: Mutex::new(()),
            request_timeout,
        }
    }

    /// Opens `transport` and wraps the resulting connection.
    pub async fn open(
        transport: &dyn Transport,
        request_timeout: Duration,
    ) -> Result<Self, McpError> {
        let connection = transport.open().await?;
        Ok(Self::connect(
            connection,
            transport.kind().as_str(),
            request_timeout,
        ))
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            inner: self.inner.clone(),
        }
    }

    pub async fn server_details(&self) -> Option<InitializeResult> {
        self.inner.server_details.read().await.clone()
    }

    pub async fn close(&self) {
        self.closer().close().await;
    }

    /// Runs the handshake: `initialize`, then `notifications/initialized`.
    ///
    /// Any failure leaves the session `Errored`.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        self.initialize_with_version(None).await
    }

    pub async fn initialize_with_version(
        &self,
        protocol_version: Option<&str>,
    ) -> Result<InitializeResult, McpError> {
        let _gate = self.call_gate.lock().await;
        let state = self.state();
        if state != SessionState::Connecting {
            return Err(McpError::Protocol(format!(
                "Cannot initialize a session that is {state}."
            )));
        }

        match self.handshake(protocol_version).await {
            Ok(result) => {
                info!(
                    session = %self.inner.label,
                    server = %result.server_info.name,
                    protocol_version = %result.protocol_version,
                    "MCP session ready"
                );
                Ok(result)
            }
            Err(err) => {
                self.inner
                    .terminate(SessionState::Errored, err.clone())
                    .await;
                Err(err)
            }
        }
    }

    async fn handshake(
        &self,
        protocol_version: Option<&str>,
    ) -> Result<InitializeResult, McpError> {
        let details = protocol::client_details(protocol_version);
        let response = self
            .send_request(RequestFromClient::InitializeRequest(details))
            .await?;
        let result = protocol::parse_initialize_result(response)?;
        *self.inner.server_details.write().await = Some(result.clone());
        self.inner.transition(SessionState::Initialized);

        let notification = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(
                NotificationFromClient::InitializedNotification(None),
            ),
            None,
        )
        .map_err(|err| McpError::Protocol(err.to_string()))?;
        self.inner.send_frame(&notification)?;

        if !self.inner.transition(SessionState::Ready) {
            return Err(McpError::SessionClosed);
        }
        Ok(result)
    }

    /// Returns every tool the server advertises, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let _gate = self.call_gate.lock().await;
        self.require_ready()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.take().map(|cursor| PaginatedRequestParams {
                cursor: Some(cursor),
                meta: None,
            });
            let response = self
                .send_request(RequestFromClient::ListToolsRequest(params))
                .await?;
            let page = protocol::parse_list_tools(response)?;
            tools.extend(page.tools);
            if tools.len() >= MCP_MAX_TOOL_LIST {
                tools.truncate(MCP_MAX_TOOL_LIST);
                break;
            }
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        debug!(session = %self.inner.label, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Invokes `name` and returns exactly one result for it.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolInvocationResult, McpError> {
        let _gate = self.call_gate.lock().await;
        self.require_ready()?;

        debug!(session = %self.inner.label, tool = %name, "Calling MCP tool");
        let params = CallToolRequestParams::new(name).with_arguments(arguments);
        let response = self
            .send_request(RequestFromClient::CallToolRequest(params))
            .await?;
        let result = protocol::parse_call_tool(response)?;
        Ok(protocol::invocation_result(result))
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        let _gate = self.call_gate.lock().await;
        self.require_ready()?;
        let response = self
            .send_request(RequestFromClient::PingRequest(None))
            .await?;
        protocol::parse_response_value(response).map(|_| ())
    }

    fn require_ready(&self) -> Result<(), McpError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            other => Err(McpError::NotReady(other)),
        }
    }

    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, McpError> {
        let request_id = self.inner.next_request_id();
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| McpError::Protocol(err.to_string()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            // Checked under the lock so a concurrent close cannot miss this waiter.
            if self.inner.state().is_terminal() {
                return Err(McpError::SessionClosed);
            }
            pending.insert(request_id.clone(), tx);
        }

        debug!(session = %self.inner.label, request_id = ?request_id, "Sending MCP request");
        if let Err(err) = self.inner.send_frame(&message) {
            self.inner.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::SessionClosed),
            Err(_) => {
                self.inner.pending.lock().await.remove(&request_id);
                warn!(
                    session = %self.inner.label,
                    request_id = ?request_id,
                    timeout_secs = self.request_timeout.as_secs(),
                    "MCP request timed out"
                );
                self.inner
                    .terminate(SessionState::Errored, McpError::Timeout)
                    .await;
                Err(McpError::Timeout)
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}
