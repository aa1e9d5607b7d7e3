use crate::mcp::session::SessionState;
use std::fmt;

/// Connection and protocol level failures seen by a session.
///
/// Cloneable so one transport failure can be handed to every caller that was
/// waiting on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    /// The binding could not be opened or failed while moving frames.
    Transport(String),
    /// The peer violated the protocol (bad frame, unknown response id).
    Protocol(String),
    /// The session was closed before the operation completed.
    SessionClosed,
    /// The operation requires a `Ready` session.
    NotReady(SessionState),
    /// No response arrived within the request timeout.
    Timeout,
    /// The peer answered with a JSON-RPC error.
    Rpc { code: i64, message: String },
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::Transport(message) => write!(f, "MCP transport error: {message}"),
            McpError::Protocol(message) => write!(f, "MCP protocol error: {message}"),
            McpError::SessionClosed => write!(f, "MCP session closed."),
            McpError::NotReady(state) => {
                write!(f, "MCP session is not ready (state: {state}).")
            }
            McpError::Timeout => write!(f, "MCP request timed out."),
            McpError::Rpc { code, message } => write!(f, "MCP error {code}: {message}"),
        }
    }
}

impl std::error::Error for McpError {}
