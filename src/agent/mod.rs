//! Planner-driven tool loop on top of a ready [`ClientSession`].

use crate::mcp::client::ClientSession;
use crate::mcp::McpError;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, info, warn};

pub mod budget;
pub mod memory;
pub mod planner;

pub use budget::{BudgetPolicy, StepBudget};
pub use memory::{ConversationMemory, Turn, TurnRole};
pub use planner::{
    ChatCompletionPlanner, Planner, PlannerDecision, PlannerError, PlannerSettings, ToolSummary,
};

#[cfg(test)]
mod tests;

#[derive(Debug)]
pub enum AgentError {
    Planner(PlannerError),
    Mcp(McpError),
    /// Ctrl+C arrived while a turn was running.
    Interrupted,
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Planner(err) => write!(f, "{err}"),
            AgentError::Mcp(err) => write!(f, "{err}"),
            AgentError::Interrupted => write!(f, "Interrupted."),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Planner(err) => Some(err),
            AgentError::Mcp(err) => Some(err),
            AgentError::Interrupted => None,
        }
    }
}

impl From<PlannerError> for AgentError {
    fn from(err: PlannerError) -> Self {
        AgentError::Planner(err)
    }
}

impl From<McpError> for AgentError {
    fn from(err: McpError) -> Self {
        AgentError::Mcp(err)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentStep {
    pub tool: String,
    pub arguments: Map<String, Value>,
    pub success: bool,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub text: String,
    /// The step budget ran out before the planner gave a final answer.
    pub partial: bool,
    pub steps: Vec<AgentStep>,
}

#[derive(Debug, Clone, Copy)]
pub struct AgentOptions {
    pub max_steps: usize,
    pub memory_enabled: bool,
    pub budget_policy: BudgetPolicy,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_steps: crate::core::constants::DEFAULT_AGENT_MAX_STEPS,
            memory_enabled: true,
            budget_policy: BudgetPolicy::PerTurn,
        }
    }
}

pub struct Agent<P: Planner> {
    session: ClientSession,
    planner: P,
    tools: Vec<ToolSummary>,
    memory: ConversationMemory,
    memory_enabled: bool,
    budget: StepBudget,
    policy: BudgetPolicy,
}

impl<P: Planner> Agent<P> {
    /// Reads the tool catalog from `session`, which must already be `Ready`.
    pub async fn connect(
        session: ClientSession,
        planner: P,
        options: AgentOptions,
    ) -> Result<Self, AgentError> {
        let tools: Vec<ToolSummary> = session
            .list_tools()
            .await?
            .iter()
            .map(ToolSummary::from)
            .collect();
        info!(
            tools = tools.len(),
            max_steps = options.max_steps,
            policy = %options.budget_policy,
            "Agent ready"
        );
        Ok(Self {
            session,
            planner,
            tools,
            memory: ConversationMemory::new(),
            memory_enabled: options.memory_enabled,
            budget: StepBudget::new(options.max_steps),
            policy: options.budget_policy,
        })
    }

    pub fn tools(&self) -> &[ToolSummary] {
        &self.tools
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn budget(&self) -> StepBudget {
        self.budget
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    pub fn reset_budget(&mut self) {
        self.budget.reset();
    }

    pub async fn close(&self) {
        self.session.close().await;
    }

    pub async fn run_turn(&mut self, user_text: &str) -> Result<TurnOutcome, AgentError> {
        if self.policy == BudgetPolicy::PerTurn {
            self.budget.reset();
        }
        // Prior memory plus this turn. Memory only takes the new turns once the turn
        // completes, so a failed or interrupted turn leaves it as it was.
        let mut transcript: Vec<Turn> = if self.memory_enabled {
            self.memory.turns().to_vec()
        } else {
            Vec::new()
        };
        let first_new = transcript.len();
        transcript.push(Turn::user(user_text));
        let mut steps: Vec<AgentStep> = Vec::new();

        while !self.budget.is_exhausted() {
            debug!(remaining = self.budget.remaining(), "Asking planner for the next step");
            match self.planner.decide(&transcript, &self.tools).await? {
                PlannerDecision::Final { text } => {
                    info!(steps = steps.len(), "Agent returned final response");
                    transcript.push(Turn::assistant(text.clone()));
                    self.remember(transcript, first_new);
                    return Ok(TurnOutcome {
                        text,
                        partial: false,
                        steps,
                    });
                }
                PlannerDecision::CallTool { name, arguments } => {
                    self.budget.consume();
                    info!(
                        tool = %name,
                        remaining = self.budget.remaining(),
                        "Agent requested tool execution"
                    );
                    let result = self
                        .session
                        .call_tool(&name, arguments.clone())
                        .await?;
                    let observation = if result.is_failure() {
                        format!("Tool error: {}", result.text_content())
                    } else {
                        result.text_content()
                    };
                    let directive = serde_json::json!({
                        "action": "call_tool",
                        "tool": name,
                        "input": arguments,
                    });
                    transcript.push(Turn::assistant(directive.to_string()));
                    transcript.push(Turn::observation(&name, observation.clone()));
                    steps.push(AgentStep {
                        tool: name,
                        arguments,
                        success: !result.is_failure(),
                        observation,
                    });
                }
            }
        }

        warn!(max_steps = self.budget.max(), "Agent exhausted its step budget");
        let text = partial_answer(self.budget.max(), steps.last());
        transcript.push(Turn::assistant(text.clone()));
        self.remember(transcript, first_new);
        Ok(TurnOutcome {
            text,
            partial: true,
            steps,
        })
    }

    fn remember(&mut self, transcript: Vec<Turn>, first_new: usize) {
        if self.memory_enabled {
            self.memory.extend(transcript.into_iter().skip(first_new));
        }
    }
}

fn partial_answer(max_steps: usize, last: Option<&AgentStep>) -> String {
    let stopped =
        format!("Agent stopped after reaching the maximum number of steps ({max_steps}).");
    match last {
        Some(step) => format!("{stopped} Last result from {}: {}", step.tool, step.observation),
        None => stopped,
    }
}
