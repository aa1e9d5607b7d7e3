//! Server side of MCP: one [`ServerSession`] per connection, answering from a
//! shared [`crate::tools::ToolRegistry`].

use std::fmt;
use std::net::SocketAddr;

pub mod session;
pub mod sse;
pub mod stdio;
pub mod wire;

pub use session::{ServerIdentity, ServerSession};


#[derive(Debug)]
pub enum ServerError {
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    Serve(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind { addr, source } => {
                write!(f, "Failed to bind MCP server on {addr}: {source}")
            }
            ServerError::Serve(source) => write!(f, "MCP server stopped unexpectedly: {source}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind { source, .. } => Some(source),
            ServerError::Serve(source) => Some(source),
        }
    }
}
