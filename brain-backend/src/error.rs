//! Error taxonomy for the brain core

use thiserror::Error;

/// Why the planner could not produce a usable plan
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("planner generation failed: {0}")]
    Generation(String),

    #[error("planner output is not a valid plan: {0}")]
    Malformed(String),

    #[error("planner returned an empty plan")]
    Empty,

    #[error("plan step {step} references unknown agent '{agent_id}'")]
    UnknownAgent { step: usize, agent_id: String },

    #[error("plan step {step} depends on step {dependency}, which is not a prior step")]
    InvalidDependency { step: usize, dependency: usize },
}

#[derive(Error, Debug, Clone)]
pub enum BrainError {
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Capability violation: agent '{agent_id}' is not allowed to call tool '{tool}'")]
    CapabilityViolation { agent_id: String, tool: String },

    #[error("Tool call error ({tool}): {message}")]
    ToolCall { tool: String, message: String },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Session store error: {0}")]
    SessionStore(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BrainError {
    /// Errors that end the request instead of being annotated in the response
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrainError::Routing(_) | BrainError::SessionStore(_))
    }
}

impl From<rusqlite::Error> for BrainError {
    fn from(e: rusqlite::Error) -> Self {
        BrainError::SessionStore(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_routing_and_store_errors_are_fatal() {
        assert!(BrainError::SessionStore("down".into()).is_fatal());
        assert!(BrainError::Routing("no default".into()).is_fatal());
        assert!(!BrainError::Generation("timeout".into()).is_fatal());
        assert!(!BrainError::Planning(PlanningError::Empty).is_fatal());
    }

    #[test]
    fn test_sqlite_errors_map_to_store_errors() {
        let err: BrainError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, BrainError::SessionStore(_)));
    }
}
