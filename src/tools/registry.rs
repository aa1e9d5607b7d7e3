use super::{ToolDescriptor, ToolHandler, ToolInvocationRequest, ToolInvocationResult};
use futures_util::FutureExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateTool(String),
    InvalidSchema { tool: String, message: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateTool(name) => write!(f, "tool '{name}' is already registered"),
            RegistryError::InvalidSchema { tool, message } => {
                write!(f, "tool '{tool}' has an invalid parameter schema: {message}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    validator: jsonschema::Validator,
    handler: Arc<dyn ToolHandler>,
}

/// Named tools in registration order. Built once at startup, then shared
/// read-only across sessions.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: impl ToolHandler + 'static,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }
        let validator = jsonschema::validator_for(&descriptor.input_schema()).map_err(|err| {
            RegistryError::InvalidSchema {
                tool: descriptor.name.clone(),
                message: err.to_string(),
            }
        })?;
        debug!(
            tool = %descriptor.name,
            parameters = descriptor.parameters.len(),
            "Registered tool"
        );
        self.index
            .insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            validator,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i].descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().map(|tool| &tool.descriptor)
    }

    /// Routes one invocation. Every outcome, including a panicking handler,
    /// comes back as a result.
    pub async fn dispatch(&self, request: ToolInvocationRequest) -> ToolInvocationResult {
        let Some(tool) = self
            .index
            .get(&request.tool_name)
            .map(|&i| &self.tools[i])
        else {
            warn!(tool = %request.tool_name, "Call for unknown tool");
            return ToolInvocationResult::failure(format!("unknown tool: {}", request.tool_name));
        };

        let arguments = match validate_arguments(tool, request.arguments) {
            Ok(arguments) => arguments,
            Err(reason) => {
                debug!(tool = %tool.descriptor.name, reason = %reason, "Rejected tool arguments");
                return ToolInvocationResult::failure(format!("invalid arguments: {reason}"));
            }
        };

        debug!(tool = %tool.descriptor.name, "Dispatching tool call");
        let outcome = AssertUnwindSafe(tool.handler.call(&arguments))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(content)) => ToolInvocationResult::Success { content },
            Ok(Err(err)) => {
                debug!(tool = %tool.descriptor.name, error = %err, "Tool reported failure");
                ToolInvocationResult::failure(err.0)
            }
            Err(_) => {
                error!(tool = %tool.descriptor.name, "Tool handler panicked");
                ToolInvocationResult::failure(format!(
                    "tool '{}' panicked",
                    tool.descriptor.name
                ))
            }
        }
    }
}

fn validate_arguments(
    tool: &RegisteredTool,
    arguments: Value,
) -> Result<Map<String, Value>, String> {
    let arguments = match arguments {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(format!(
                "expected an object, got {}",
                json_kind(&other)
            ))
        }
    };

    if let Some(missing) = tool
        .descriptor
        .parameters
        .iter()
        .find(|parameter| parameter.required && !arguments.contains_key(&parameter.name))
    {
        return Err(format!("missing required parameter '{}'", missing.name));
    }

    let instance = Value::Object(arguments);
    let problems: Vec<String> = tool
        .validator
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !problems.is_empty() {
        return Err(problems.join("; "));
    }

    match instance {
        Value::Object(arguments) => Ok(arguments),
        _ => Ok(Map::new()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|tool| &tool.descriptor.name))
            .finish()
    }
}
