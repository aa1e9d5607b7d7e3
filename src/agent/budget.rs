use std::fmt;
use std::str::FromStr;

/// When the step budget is refilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BudgetPolicy {
    /// Every `run_turn` starts with a full budget.
    #[default]
    PerTurn,
    /// One budget for the whole conversation, refilled only by `reset_budget`.
    Cumulative,
}

impl BudgetPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            BudgetPolicy::PerTurn => "per-turn",
            BudgetPolicy::Cumulative => "cumulative",
        }
    }
}

impl FromStr for BudgetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-turn" | "per_turn" | "turn" => Ok(BudgetPolicy::PerTurn),
            "cumulative" | "session" => Ok(BudgetPolicy::Cumulative),
            other => Err(format!(
                "Unknown budget policy '{other}'. Expected 'per-turn' or 'cumulative'."
            )),
        }
    }
}

impl fmt::Display for BudgetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remaining tool calls the agent may make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    max: usize,
    remaining: usize,
}

impl StepBudget {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            remaining: max,
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Takes one step; `false` when nothing is left.
    pub fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn reset(&mut self) {
        self.remaining = self.max;
    }
}
