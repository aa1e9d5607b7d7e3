//! JSON-RPC 2.0 envelopes as the server reads and writes them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// Tool methods received before a successful `initialize`.
pub const NOT_INITIALIZED: i64 = -32002;

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    pub fn parse_error(details: impl Into<String>) -> Self {
        Self::error(None, PARSE_ERROR, format!("Parse error: {}", details.into()))
    }

    pub fn invalid_request(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, INVALID_REQUEST, message)
    }

    pub fn method_not_found(id: Option<Value>, method: &str) -> Self {
        Self::error(
            id,
            METHOD_NOT_FOUND,
            format!("Method '{method}' is not supported by this MCP server."),
        )
    }

    pub fn not_initialized(id: Option<Value>) -> Self {
        Self::error(id, NOT_INITIALIZED, "session not initialized")
    }

    pub fn to_frame(&self) -> String {
        // Plain structs of strings and JSON values always serialize.
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{{\"code\":{},\"message\":\"Internal error\"}}}}",
                -32603
            )
        })
    }
}

/// What an inbound frame turned out to be.
#[derive(Debug)]
pub enum InboundFrame {
    Request(RpcRequest),
    /// A response object; the server never issues requests, so any is unexpected.
    Response(Value),
}

/// Classifies one frame. `Err` carries the reply to send before the session
/// gives up on the peer.
pub fn parse_frame(frame: &str) -> Result<InboundFrame, RpcResponse> {
    let value: Value =
        serde_json::from_str(frame).map_err(|err| RpcResponse::parse_error(err.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(RpcResponse::invalid_request(
            None,
            "Expected a single JSON-RPC object.",
        ));
    };
    let id = object.get("id").cloned();
    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(RpcResponse::invalid_request(
            id,
            "Unsupported or missing jsonrpc version.",
        ));
    }
    if !object.contains_key("method")
        && (object.contains_key("result") || object.contains_key("error"))
    {
        return Ok(InboundFrame::Response(value));
    }
    serde_json::from_value::<RpcRequest>(value)
        .map(InboundFrame::Request)
        .map_err(|err| RpcResponse::invalid_request(id, format!("Invalid request: {err}")))
}
