//! Model Context Protocol plumbing shared by the server and the client.
//!
//! Frames are JSON-RPC 2.0 documents moved by a [`transport`] binding. The
//! [`client`] drives the handshake and tool calls from the caller's side, the
//! [`server`] answers them by routing into a [`crate::tools::ToolRegistry`].

pub mod client;
pub mod error;
pub mod server;
pub mod session;
pub mod transport;

pub use error::McpError;
pub use session::SessionState;

/// JSON-RPC code for unknown methods.
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;
