// Controller state machine
use super::stage::Stage;
use std::fmt;

/// States a run moves through, each recorded before the controller proceeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Configuring,
    Scheduling,
    Executing { stage: Stage, index: usize },
    Aggregating,
    Dispatching,
    Completed,
    Aborted,
}

impl RunState {
    /// Label stored in the transitions table
    pub fn label(&self) -> String {
        match self {
            RunState::Init => "init".to_string(),
            RunState::Configuring => "configuring".to_string(),
            RunState::Scheduling => "scheduling".to_string(),
            RunState::Executing { stage, .. } => format!("executing:{}", stage.tag()),
            RunState::Aggregating => "aggregating".to_string(),
            RunState::Dispatching => "dispatching".to_string(),
            RunState::Completed => "completed".to_string(),
            RunState::Aborted => "aborted".to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }

    /// Whether the machine may move from `self` to `next`
    pub fn can_advance_to(&self, next: &RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (_, Aborted) => !self.is_terminal(),
            (Init, Configuring) | (Configuring, Scheduling) => true,
            (Scheduling, Executing { index: 0, .. }) => true,
            (Scheduling, Aggregating) => true,
            (Executing { index: a, .. }, Executing { index: b, .. }) => *b == a + 1,
            (Executing { .. }, Aggregating) => true,
            (Aggregating, Dispatching) | (Dispatching, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
