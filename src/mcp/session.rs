use std::fmt;

/// Lifecycle of one MCP session, shared by the client and server sides.
///
/// `Connecting -> Initialized -> Ready` in order; `Closed` and `Errored` are
/// terminal and reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Initialized,
    Ready,
    Closed,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }

    pub fn is_ready(self) -> bool {
        self == SessionState::Ready
    }

    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Connecting, Initialized) | (Initialized, Ready) => true,
            (from, Closed | Errored) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Moves to `next` if the lifecycle allows it.
    pub fn advance(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if self.can_advance_to(next) {
            *self = next;
            Ok(())
        } else {
            Err(InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Initialized => "initialized",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
