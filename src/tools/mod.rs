//! Tool definitions and the dispatcher that runs them.
//!
//! A tool is a [`ToolDescriptor`] (name, description, ordered parameters)
//! paired with a [`ToolHandler`]. The [`ToolRegistry`] validates invocation
//! arguments and always answers with a [`ToolInvocationResult`]; nothing a
//! handler does escapes it as an error.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::fmt;

pub mod registry;

pub use registry::{RegistryError, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParameterKind {
    pub fn json_type(self) -> &'static str {
        match self {
            ParameterKind::String => "string",
            ParameterKind::Number => "number",
            ParameterKind::Integer => "integer",
            ParameterKind::Boolean => "boolean",
            ParameterKind::Object => "object",
            ParameterKind::Array => "array",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub description: String,
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(name: &str, kind: ParameterKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParameterKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// JSON Schema for the arguments object. Property order follows the
    /// declared parameter order.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for parameter in &self.parameters {
            properties.insert(
                parameter.name.clone(),
                json!({
                    "type": parameter.kind.json_type(),
                    "description": parameter.description,
                }),
            );
            if parameter.required {
                required.push(Value::String(parameter.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Entry for a `tools/list` result.
    pub fn to_wire(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
            "icons": [],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentItem {
    Text(String),
}

impl ContentItem {
    pub fn as_text(&self) -> &str {
        match self {
            ContentItem::Text(text) => text,
        }
    }

    pub fn to_wire(&self) -> Value {
        match self {
            ContentItem::Text(text) => json!({"type": "text", "text": text}),
        }
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocationResult {
    Success { content: Vec<ContentItem> },
    Failure { reason: String },
}

impl ToolInvocationResult {
    pub fn text(text: impl Into<String>) -> Self {
        ToolInvocationResult::Success {
            content: vec![ContentItem::Text(text.into())],
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        ToolInvocationResult::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ToolInvocationResult::Failure { .. })
    }

    /// All text content joined by newlines, or the failure reason.
    pub fn text_content(&self) -> String {
        match self {
            ToolInvocationResult::Success { content } => content
                .iter()
                .map(ContentItem::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
            ToolInvocationResult::Failure { reason } => reason.clone(),
        }
    }

    /// `tools/call` result body.
    pub fn to_wire(&self) -> Value {
        match self {
            ToolInvocationResult::Success { content } => json!({
                "content": content.iter().map(ContentItem::to_wire).collect::<Vec<_>>(),
                "isError": false,
            }),
            ToolInvocationResult::Failure { reason } => json!({
                "content": [ContentItem::Text(reason.clone()).to_wire()],
                "isError": true,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationRequest {
    pub tool_name: String,
    /// Expected to be a JSON object; `null` is read as no arguments.
    pub arguments: Value,
}

impl ToolInvocationRequest {
    pub fn new(tool_name: &str, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            arguments,
        }
    }
}

/// Handler-level failure, reported to the caller as a `Failure` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExecutionError(pub String);

impl fmt::Display for ToolExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ToolExecutionError {}

impl From<String> for ToolExecutionError {
    fn from(message: String) -> Self {
        ToolExecutionError(message)
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with arguments that already passed schema validation.
    async fn call(&self, arguments: &Map<String, Value>)
        -> Result<Vec<ContentItem>, ToolExecutionError>;
}

/// Reads a string argument that schema validation has already guaranteed.
pub fn string_argument<'a>(
    arguments: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, ToolExecutionError> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolExecutionError(format!("missing string argument '{name}'")))
}
