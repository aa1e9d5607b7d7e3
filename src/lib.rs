//! Cambista serves currency exchange tools over the Model Context Protocol.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`exchange`] talks to ExchangeRate-API and wraps it as two MCP tools.
//! - [`tools`] holds the tool descriptors, results, and the registry a
//!   server dispatches into.
//! - [`mcp`] implements sessions, the stdio and event-stream transports, and
//!   both the server and client halves of the protocol.
//! - [`agent`] runs a planner-driven tool loop with memory and a step budget;
//!   [`api`] defines the chat-completion payloads the planner sends.
//! - [`core`] owns configuration, constants, and runtime helpers.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod agent;
pub mod api;
pub mod cli;
pub mod core;
pub mod exchange;
pub mod mcp;
pub mod tools;
pub mod utils;
