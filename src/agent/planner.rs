//! Deciding the agent's next step.
//!
//! A [`Planner`] sees the transcript and the tool catalog and answers with a
//! [`PlannerDecision`]. [`ChatCompletionPlanner`] asks an OpenAI-compatible
//! chat model for a JSON directive.

use super::memory::{Turn, TurnRole};
use crate::api::{ChatMessage, ChatRequest, ChatResponse};
use crate::core::config::{read_secret, Config, ConfigError};
use crate::utils::url::construct_api_url;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_CORRECTIONS: usize = 3;

/// What the planner knows about one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<&rust_mcp_schema::Tool> for ToolSummary {
    fn from(tool: &rust_mcp_schema::Tool) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            input_schema: serde_json::to_value(&tool.input_schema).unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerDecision {
    Final {
        text: String,
    },
    CallTool {
        name: String,
        arguments: Map<String, Value>,
    },
}

#[derive(Debug)]
pub enum PlannerError {
    Http(reqwest::Error),
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    Decode(String),
    EmptyReply,
    /// The model never produced a usable directive.
    InvalidReply(String),
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::Http(err) => write!(f, "Completion request failed: {err}"),
            PlannerError::Status { status, body } => {
                write!(f, "Completion request failed with status {status}: {body}")
            }
            PlannerError::Decode(message) => {
                write!(f, "Unexpected completion response: {message}")
            }
            PlannerError::EmptyReply => write!(f, "The model returned an empty reply."),
            PlannerError::InvalidReply(reason) => {
                write!(f, "The model did not return a valid directive: {reason}")
            }
        }
    }
}

impl std::error::Error for PlannerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlannerError::Http(err) => Some(err),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn decide(
        &self,
        transcript: &[Turn],
        tools: &[ToolSummary],
    ) -> Result<PlannerDecision, PlannerError>;
}

#[derive(Clone)]
pub struct PlannerSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl PlannerSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let api_key = read_secret(config.planner_api_key_env())?;
        Ok(Self {
            base_url: config.planner_base_url().to_string(),
            api_key,
            model: config.planner_model().to_string(),
            temperature: config.planner.temperature,
            timeout: config.planner_timeout(),
        })
    }
}

impl fmt::Debug for PlannerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannerSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct ChatCompletionPlanner {
    http: reqwest::Client,
    settings: PlannerSettings,
}

impl ChatCompletionPlanner {
    pub fn new(settings: PlannerSettings) -> Result<Self, PlannerError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(PlannerError::Http)?;
        Ok(Self { http, settings })
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, PlannerError> {
        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: messages.to_vec(),
            stream: false,
            temperature: self.settings.temperature,
        };
        let url = construct_api_url(&self.settings.base_url, "chat/completions");
        debug!(model = %self.settings.model, messages = messages.len(), "Requesting completion");

        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header(
                "Authorization",
                format!("Bearer {}", self.settings.api_key),
            )
            .json(&request)
            .send()
            .await
            .map_err(PlannerError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PlannerError::Status { status, body });
        }

        let response = response
            .json::<ChatResponse>()
            .await
            .map_err(|err| PlannerError::Decode(err.to_string()))?;
        response
            .first_content()
            .filter(|content| !content.trim().is_empty())
            .ok_or(PlannerError::EmptyReply)
    }
}

#[async_trait]
impl Planner for ChatCompletionPlanner {
    async fn decide(
        &self,
        transcript: &[Turn],
        tools: &[ToolSummary],
    ) -> Result<PlannerDecision, PlannerError> {
        let mut messages = build_messages(transcript, tools);
        let mut last_problem = String::new();
        for attempt in 0..=MAX_CORRECTIONS {
            let reply = self.complete(&messages).await?;
            match parse_directive(&reply) {
                Ok(decision) => return Ok(decision),
                Err(problem) => {
                    warn!(attempt, problem = %problem, "Planner reply was not a valid directive");
                    messages.push(ChatMessage::assistant(reply));
                    messages.push(ChatMessage::user(correction_prompt(&problem)));
                    last_problem = problem;
                }
            }
        }
        Err(PlannerError::InvalidReply(last_problem))
    }
}

pub fn system_prompt(tools: &[ToolSummary]) -> String {
    let mut lines = vec![
        "You are a currency assistant that answers questions by calling tools.".to_string(),
        "Reply with exactly one JSON object and nothing else.".to_string(),
        "To call a tool: {\"action\":\"call_tool\",\"tool\":\"tool_name\",\"input\":{...}}".to_string(),
        "To answer the user: {\"action\":\"final\",\"response\":\"...\"}".to_string(),
        "Tool results arrive as {\"tool_result\":{...}} messages.".to_string(),
    ];
    if tools.is_empty() {
        lines.push("No tools are available.".to_string());
    } else {
        lines.push("Available tools:".to_string());
        for tool in tools {
            lines.push(format!(
                "- {}: {} Input schema: {}",
                tool.name, tool.description, tool.input_schema
            ));
        }
    }
    lines.join("\n")
}

fn correction_prompt(problem: &str) -> String {
    format!(
        "Your previous reply could not be used ({problem}). Respond again with a single JSON object: either {{\"action\":\"call_tool\",\"tool\":...,\"input\":{{...}}}} or {{\"action\":\"final\",\"response\":...}}."
    )
}

pub fn build_messages(transcript: &[Turn], tools: &[ToolSummary]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt(tools))];
    for turn in transcript {
        let message = match turn.role {
            TurnRole::User => ChatMessage::user(turn.content.clone()),
            TurnRole::Assistant => ChatMessage::assistant(turn.content.clone()),
            TurnRole::Observation => ChatMessage::user(
                json!({
                    "tool_result": {
                        "tool": turn.tool,
                        "output": turn.content,
                    }
                })
                .to_string(),
            ),
        };
        messages.push(message);
    }
    messages
}

/// Removes `<think>…</think>` reasoning blocks. An unclosed block swallows
/// the rest of the reply.
pub fn strip_think_blocks(reply: &str) -> String {
    let mut out = String::with_capacity(reply.len());
    let mut rest = reply;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Finds the JSON object in a reply: the whole text, a fenced block, or the
/// outermost `{…}` span.
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(start) = trimmed.find("```") {
        let fenced = &trimmed[start + 3..];
        let fenced = fenced
            .strip_prefix("json")
            .or_else(|| fenced.strip_prefix("JSON"))
            .unwrap_or(fenced);
        if let Some(end) = fenced.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(fenced[..end].trim()) {
                return Some(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Some(value);
            }
        }
    }
    None
}

/// Reads a directive out of a model reply. Prose without any JSON object is
/// taken as the final answer; anything that looks like a directive but is
/// not one is an error to send back to the model.
pub fn parse_directive(reply: &str) -> Result<PlannerDecision, String> {
    let reply = strip_think_blocks(reply);
    if reply.is_empty() {
        return Err("the reply was empty".to_string());
    }
    let Some(value) = extract_json(&reply) else {
        if reply.contains('{') {
            return Err("the reply contained malformed JSON".to_string());
        }
        return Ok(PlannerDecision::Final { text: reply });
    };

    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing 'action' field".to_string())?;
    match action {
        "call_tool" => {
            let name = value
                .get("tool")
                .or_else(|| value.get("tool_name"))
                .or_else(|| value.get("name"))
                .and_then(Value::as_str)
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| "call_tool is missing the tool name".to_string())?;
            let arguments = match value.get("input").or_else(|| value.get("arguments")) {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => return Err("call_tool input must be a JSON object".to_string()),
            };
            Ok(PlannerDecision::CallTool {
                name: name.to_string(),
                arguments,
            })
        }
        "final" => value
            .get("response")
            .or_else(|| value.get("answer"))
            .and_then(Value::as_str)
            .map(|text| PlannerDecision::Final {
                text: text.to_string(),
            })
            .ok_or_else(|| "final is missing the response text".to_string()),
        other => Err(format!("unknown action '{other}'")),
    }
}
