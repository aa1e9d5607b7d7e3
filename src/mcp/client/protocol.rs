use crate::mcp::McpError;
use crate::tools::{ContentItem, ToolInvocationResult};
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{
    CallToolResult, ClientCapabilities, ContentBlock, Implementation, InitializeRequestParams,
    InitializeResult, ListToolsResult, RpcError, LATEST_PROTOCOL_VERSION,
};
use serde_json::Value;

pub(crate) fn client_details(protocol_version: Option<&str>) -> InitializeRequestParams {
    let protocol_version = protocol_version
        .filter(|version| !version.trim().is_empty())
        .unwrap_or(LATEST_PROTOCOL_VERSION)
        .to_string();
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "cambista".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Cambista MCP Client".to_string()),
            description: Some("Currency exchange MCP probe and chat client".to_string()),
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version,
    }
}

pub(crate) fn parse_initialize_result(
    message: ServerMessage,
) -> Result<InitializeResult, McpError> {
    let value = parse_response_value(message)?;
    let result = serde_json::from_value::<InitializeResult>(value)
        .map_err(|err| McpError::Protocol(format!("Unexpected initialize response: {err}")))?;
    if result.protocol_version.trim().is_empty() {
        return Err(McpError::Protocol(
            "Unexpected initialize response.".to_string(),
        ));
    }
    Ok(result)
}

pub(crate) fn parse_list_tools(message: ServerMessage) -> Result<ListToolsResult, McpError> {
    parse_response(message)
}

pub(crate) fn parse_call_tool(message: ServerMessage) -> Result<CallToolResult, McpError> {
    parse_response(message)
}

fn parse_response<T: serde::de::DeserializeOwned>(message: ServerMessage) -> Result<T, McpError> {
    let value = parse_response_value(message)?;
    serde_json::from_value::<T>(value).map_err(|err| McpError::Protocol(err.to_string()))
}

pub(crate) fn parse_response_value(message: ServerMessage) -> Result<Value, McpError> {
    match message {
        ServerMessage::Response(response) => serde_json::to_value(&response.result)
            .map_err(|err| McpError::Protocol(err.to_string())),
        ServerMessage::Error(error) => Err(rpc_error(&error.error)),
        ServerMessage::Request(_) => Err(McpError::Protocol(
            "Expected a response, got a server request.".to_string(),
        )),
        ServerMessage::Notification(_) => Err(McpError::Protocol(
            "Expected a response, got a server notification.".to_string(),
        )),
    }
}

fn rpc_error(error: &RpcError) -> McpError {
    let mut message = error.message.clone();
    if let Some(details) = error
        .data
        .as_ref()
        .and_then(|data| data.get("details"))
        .and_then(Value::as_str)
        .filter(|details| !details.is_empty())
    {
        message.push_str(": ");
        message.push_str(details);
    }
    McpError::Rpc {
        code: error.code,
        message,
    }
}

/// `isError` results become failures carrying their joined text.
pub(crate) fn invocation_result(result: CallToolResult) -> ToolInvocationResult {
    let content: Vec<ContentItem> = result
        .content
        .iter()
        .map(|block| ContentItem::Text(content_block_text(block)))
        .collect();
    if result.is_error.unwrap_or(false) {
        let reason = content
            .iter()
            .map(ContentItem::as_text)
            .collect::<Vec<_>>()
            .join("\n");
        ToolInvocationResult::Failure { reason }
    } else {
        ToolInvocationResult::Success { content }
    }
}

fn content_block_text(block: &ContentBlock) -> String {
    match block {
        ContentBlock::TextContent(text) => text.text.clone(),
        other => serde_json::to_string(other)
            .unwrap_or_else(|_| "Unsupported tool content.".to_string()),
    }
}
